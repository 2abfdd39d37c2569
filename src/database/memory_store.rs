//! In-memory store used by the test-suite and `SKIP_EXTERNALS` mode
//!
//! `begin` takes a single async mutex, so transactions are fully serialised.
//! Writes go to a working copy that `commit` publishes; dropping the handle
//! discards them.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::warn;
use uuid::Uuid;

use crate::database::entities::{
    Address, CartLine, CatalogEntry, CatalogRef, Event, FulfillmentState, NewOrder, Order,
    OrderItem, PaymentState, Product, Seat, ShippingSnapshot, Ticket, TicketClaim,
};
use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::repository::{
    CartRepository, CatalogRepository, CommerceStore, DbResult, FulfillmentRepository,
    OrderRepository, StoreTransaction,
};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    next_id: i64,
    products: BTreeMap<i64, Product>,
    events: BTreeMap<i64, Event>,
    seats: BTreeMap<i64, Seat>,
    addresses: BTreeMap<i64, Address>,
    cart_lines: BTreeMap<i64, CartLine>,
    orders: HashMap<Uuid, Order>,
    shipping: HashMap<Uuid, ShippingSnapshot>,
    tickets: HashMap<Uuid, Ticket>,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    failing_commits: Arc<AtomicU32>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` commits fail with a connection error.
    pub fn fail_next_commits(&self, count: u32) {
        self.failing_commits.store(count, Ordering::SeqCst);
    }

    pub async fn seed_product(&self, name: &str, price: BigDecimal, stock: i32) -> Product {
        let mut state = self.state.lock().await;
        let product = Product {
            id: state.next_id(),
            name: name.to_string(),
            price,
            stock,
            is_active: true,
        };
        state.products.insert(product.id, product.clone());
        product
    }

    pub async fn seed_event(&self, name: &str, price: BigDecimal, available: i32) -> Event {
        let mut state = self.state.lock().await;
        let event = Event {
            id: state.next_id(),
            name: name.to_string(),
            location: "Village ground".to_string(),
            starts_at: Utc::now() + chrono::Duration::days(7),
            price,
            available_tickets: available,
            is_active: true,
        };
        state.events.insert(event.id, event.clone());
        event
    }

    pub async fn seed_seat(&self, event_id: i64, section: &str, row: i32, number: i32) -> Seat {
        let mut state = self.state.lock().await;
        let seat = Seat {
            id: state.next_id(),
            event_id,
            section: section.to_string(),
            row_number: row,
            seat_number: number,
            is_sold: false,
            held_by: None,
        };
        state.seats.insert(seat.id, seat.clone());
        seat
    }

    pub async fn seed_address(&self, user_id: Uuid, full_name: &str) -> Address {
        let mut state = self.state.lock().await;
        let address = Address {
            id: state.next_id(),
            user_id,
            full_name: full_name.to_string(),
            phone_number: "9876543210".to_string(),
            address_line_1: "12 Mill Road".to_string(),
            address_line_2: None,
            city: "Nashik".to_string(),
            state: "Maharashtra".to_string(),
            postal_code: "422001".to_string(),
        };
        state.addresses.insert(address.id, address.clone());
        address
    }

    pub async fn set_product_price(&self, product_id: i64, price: BigDecimal) {
        let mut state = self.state.lock().await;
        if let Some(product) = state.products.get_mut(&product_id) {
            product.price = price;
        }
    }

    pub async fn set_product_active(&self, product_id: i64, active: bool) {
        let mut state = self.state.lock().await;
        if let Some(product) = state.products.get_mut(&product_id) {
            product.is_active = active;
        }
    }

    pub async fn update_address_line(&self, address_id: i64, line: &str) {
        let mut state = self.state.lock().await;
        if let Some(address) = state.addresses.get_mut(&address_id) {
            address.address_line_1 = line.to_string();
        }
    }

    /// Shifts an order's creation time into the past.
    pub async fn backdate_order(&self, order_id: Uuid, created_at: DateTime<Utc>) {
        let mut state = self.state.lock().await;
        if let Some(order) = state.orders.get_mut(&order_id) {
            order.created_at = created_at;
        }
    }

    pub async fn order(&self, order_id: Uuid) -> Option<Order> {
        self.state.lock().await.orders.get(&order_id).cloned()
    }

    pub async fn cart(&self, user_id: Uuid) -> Vec<CartLine> {
        self.state
            .lock()
            .await
            .cart_lines
            .values()
            .filter(|l| l.user_id == user_id)
            .cloned()
            .collect()
    }

    pub async fn tickets(&self, order_id: Uuid) -> Vec<Ticket> {
        let state = self.state.lock().await;
        sorted_tickets(&state, order_id)
    }

    pub async fn shipping(&self, order_id: Uuid) -> Option<ShippingSnapshot> {
        self.state.lock().await.shipping.get(&order_id).cloned()
    }

    pub async fn seat(&self, seat_id: i64) -> Option<Seat> {
        self.state.lock().await.seats.get(&seat_id).cloned()
    }
}

fn sorted_tickets(state: &MemoryState, order_id: Uuid) -> Vec<Ticket> {
    let mut tickets: Vec<Ticket> = state
        .tickets
        .values()
        .filter(|t| t.order_id == order_id)
        .cloned()
        .collect();
    tickets.sort_by_key(|t| (t.seat_id.is_none(), t.seat_id, t.admission_no));
    tickets
}

#[async_trait]
impl CommerceStore for MemoryStore {
    async fn begin(&self) -> DbResult<Box<dyn StoreTransaction>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTransaction {
            guard,
            working,
            failing_commits: self.failing_commits.clone(),
        }))
    }

    async fn ping(&self) -> DbResult<()> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

pub struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    failing_commits: Arc<AtomicU32>,
}

#[async_trait]
impl CatalogRepository for MemoryTransaction {
    async fn find_product(&mut self, id: i64) -> DbResult<Option<Product>> {
        Ok(self.working.products.get(&id).cloned())
    }

    async fn find_event(&mut self, id: i64) -> DbResult<Option<Event>> {
        Ok(self.working.events.get(&id).cloned())
    }

    async fn find_catalog_entry(&mut self, reference: CatalogRef) -> DbResult<Option<CatalogEntry>> {
        Ok(match reference {
            CatalogRef::Product(id) => self.working.products.get(&id).map(CatalogEntry::from),
            CatalogRef::Event(id) => self.working.events.get(&id).map(CatalogEntry::from),
        })
    }

    async fn find_seats(&mut self, seat_ids: &[i64]) -> DbResult<Vec<Seat>> {
        Ok(seat_ids
            .iter()
            .filter_map(|id| self.working.seats.get(id).cloned())
            .collect())
    }

    async fn hold_seat(&mut self, seat_id: i64, order_id: Uuid) -> DbResult<bool> {
        match self.working.seats.get_mut(&seat_id) {
            Some(seat) if seat.is_available_for(order_id) => {
                seat.held_by = Some(order_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_seats_sold(&mut self, order_id: Uuid) -> DbResult<u64> {
        let mut count = 0;
        for seat in self.working.seats.values_mut() {
            if seat.held_by == Some(order_id) {
                seat.is_sold = true;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn release_seats(&mut self, order_id: Uuid) -> DbResult<u64> {
        let mut count = 0;
        for seat in self.working.seats.values_mut() {
            if seat.held_by == Some(order_id) && !seat.is_sold {
                seat.held_by = None;
                count += 1;
            }
        }
        Ok(count)
    }
}

#[async_trait]
impl CartRepository for MemoryTransaction {
    async fn cart_lines(&mut self, user_id: Uuid) -> DbResult<Vec<CartLine>> {
        Ok(self
            .working
            .cart_lines
            .values()
            .filter(|l| l.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn merge_cart_line(
        &mut self,
        user_id: Uuid,
        reference: CatalogRef,
        quantity: i32,
    ) -> DbResult<CartLine> {
        let existing = self.working.cart_lines.values_mut().find(|l| {
            l.user_id == user_id
                && l.product_id == reference.product_id()
                && l.event_id == reference.event_id()
        });
        if let Some(line) = existing {
            line.quantity = line
                .quantity
                .checked_add(quantity)
                .ok_or_else(|| DatabaseError::invalid_data("cart line quantity overflow"))?;
            return Ok(line.clone());
        }

        let line = CartLine {
            id: self.working.next_id(),
            user_id,
            product_id: reference.product_id(),
            event_id: reference.event_id(),
            quantity,
        };
        self.working.cart_lines.insert(line.id, line.clone());
        Ok(line)
    }

    async fn remove_cart_line(&mut self, user_id: Uuid, line_id: i64) -> DbResult<bool> {
        match self.working.cart_lines.get(&line_id) {
            Some(line) if line.user_id == user_id => {
                self.working.cart_lines.remove(&line_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn clear_cart(&mut self, user_id: Uuid) -> DbResult<u64> {
        let before = self.working.cart_lines.len();
        self.working.cart_lines.retain(|_, l| l.user_id != user_id);
        Ok((before - self.working.cart_lines.len()) as u64)
    }
}

#[async_trait]
impl OrderRepository for MemoryTransaction {
    async fn insert_order(&mut self, order: NewOrder) -> DbResult<Order> {
        let order_id = Uuid::new_v4();
        let now = Utc::now();
        let total_amount = order.total();

        let mut items = Vec::with_capacity(order.items.len());
        for item in &order.items {
            items.push(OrderItem {
                id: self.working.next_id(),
                order_id,
                product_id: item.reference.product_id(),
                event_id: item.reference.event_id(),
                quantity: item.quantity,
                unit_price: item.unit_price.clone(),
            });
        }

        let stored = Order {
            id: order_id,
            user_id: order.user_id,
            kind: order.kind,
            from_cart: order.from_cart,
            currency: order.currency,
            total_amount,
            gateway_order_id: None,
            gateway_payment_id: None,
            payment_session_id: None,
            payment_state: PaymentState::Pending,
            fulfillment_state: FulfillmentState::NotFulfilled,
            address_id: order.address_id,
            customer_email: order.customer_email,
            customer_phone: order.customer_phone,
            review_reason: None,
            created_at: now,
            updated_at: now,
            paid_at: None,
            items,
            seat_ids: order.seat_ids,
        };
        self.working.orders.insert(order_id, stored.clone());
        Ok(stored)
    }

    async fn find_order(&mut self, order_id: Uuid) -> DbResult<Option<Order>> {
        Ok(self.working.orders.get(&order_id).cloned())
    }

    async fn lock_order(&mut self, order_id: Uuid) -> DbResult<Option<Order>> {
        self.find_order(order_id).await
    }

    async fn lock_order_by_gateway_id(
        &mut self,
        gateway_order_id: &str,
    ) -> DbResult<Option<Order>> {
        Ok(self
            .working
            .orders
            .values()
            .find(|o| o.gateway_order_id.as_deref() == Some(gateway_order_id))
            .cloned())
    }

    async fn gateway_order_id_exists(&mut self, gateway_order_id: &str) -> DbResult<bool> {
        Ok(self
            .working
            .orders
            .values()
            .any(|o| o.gateway_order_id.as_deref() == Some(gateway_order_id)))
    }

    async fn set_gateway_order_id(
        &mut self,
        order_id: Uuid,
        gateway_order_id: &str,
    ) -> DbResult<bool> {
        let unassigned = self
            .working
            .orders
            .get(&order_id)
            .is_some_and(|o| o.gateway_order_id.is_none());
        if !unassigned {
            return Ok(false);
        }
        if self.gateway_order_id_exists(gateway_order_id).await? {
            return Err(DatabaseError::new(DatabaseErrorKind::UniqueViolation {
                constraint: "orders_gateway_order_id_key".to_string(),
            }));
        }
        if let Some(order) = self.working.orders.get_mut(&order_id) {
            order.gateway_order_id = Some(gateway_order_id.to_string());
            order.updated_at = Utc::now();
        }
        Ok(true)
    }

    async fn set_payment_session(&mut self, order_id: Uuid, session_id: &str) -> DbResult<()> {
        let order = self
            .working
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| DatabaseError::not_found("order", order_id))?;
        order.payment_session_id = Some(session_id.to_string());
        order.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_paid(
        &mut self,
        order_id: Uuid,
        gateway_payment_id: Option<&str>,
        paid_at: DateTime<Utc>,
    ) -> DbResult<bool> {
        match self.working.orders.get_mut(&order_id) {
            Some(order) if order.payment_state == PaymentState::Pending => {
                order.payment_state = PaymentState::Successful;
                order.gateway_payment_id = gateway_payment_id.map(str::to_string);
                order.paid_at = Some(paid_at);
                order.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_failed(&mut self, order_id: Uuid) -> DbResult<bool> {
        match self.working.orders.get_mut(&order_id) {
            Some(order) if order.payment_state == PaymentState::Pending => {
                order.payment_state = PaymentState::Failed;
                order.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_fulfilled(&mut self, order_id: Uuid) -> DbResult<()> {
        let order = self
            .working
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| DatabaseError::not_found("order", order_id))?;
        order.fulfillment_state = FulfillmentState::Fulfilled;
        order.updated_at = Utc::now();
        Ok(())
    }

    async fn flag_for_review(&mut self, order_id: Uuid, reason: &str) -> DbResult<()> {
        let order = self
            .working
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| DatabaseError::not_found("order", order_id))?;
        order.review_reason = Some(reason.to_string());
        order.updated_at = Utc::now();
        Ok(())
    }

    async fn orders_for_user(&mut self, user_id: Uuid) -> DbResult<Vec<Order>> {
        let mut orders: Vec<Order> = self
            .working
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn stale_pending_orders(
        &mut self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> DbResult<Vec<Order>> {
        let mut orders: Vec<Order> = self
            .working
            .orders
            .values()
            .filter(|o| {
                o.payment_state == PaymentState::Pending
                    && o.review_reason.is_none()
                    && o.created_at < created_before
            })
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.created_at);
        orders.truncate(limit.max(0) as usize);
        Ok(orders)
    }
}

#[async_trait]
impl FulfillmentRepository for MemoryTransaction {
    async fn find_address(&mut self, address_id: i64) -> DbResult<Option<Address>> {
        Ok(self.working.addresses.get(&address_id).cloned())
    }

    async fn shipping_snapshot(&mut self, order_id: Uuid) -> DbResult<Option<ShippingSnapshot>> {
        Ok(self.working.shipping.get(&order_id).cloned())
    }

    async fn insert_shipping_snapshot(
        &mut self,
        snapshot: ShippingSnapshot,
    ) -> DbResult<ShippingSnapshot> {
        if self.working.shipping.contains_key(&snapshot.order_id) {
            return Err(DatabaseError::new(DatabaseErrorKind::UniqueViolation {
                constraint: "order_shipping_pkey".to_string(),
            }));
        }
        self.working
            .shipping
            .insert(snapshot.order_id, snapshot.clone());
        Ok(snapshot)
    }

    async fn claim_ticket(&mut self, claim: TicketClaim) -> DbResult<(Ticket, bool)> {
        if let Some(existing) = self.working.tickets.values().find(|t| claim.matches(t)) {
            return Ok((existing.clone(), false));
        }

        let ticket = Ticket {
            ticket_id: Uuid::new_v4(),
            order_id: claim.order_id,
            user_id: claim.user_id,
            event_id: claim.event_id,
            seat_id: claim.seat_id,
            admission_no: claim.admission_no,
            used: false,
            used_at: None,
            issued_at: Utc::now(),
        };
        self.working.tickets.insert(ticket.ticket_id, ticket.clone());
        Ok((ticket, true))
    }

    async fn tickets_for_order(&mut self, order_id: Uuid) -> DbResult<Vec<Ticket>> {
        Ok(sorted_tickets(&self.working, order_id))
    }

    async fn find_ticket(&mut self, ticket_id: Uuid) -> DbResult<Option<Ticket>> {
        Ok(self.working.tickets.get(&ticket_id).cloned())
    }

    async fn lock_ticket(&mut self, ticket_id: Uuid) -> DbResult<Option<Ticket>> {
        self.find_ticket(ticket_id).await
    }

    async fn mark_ticket_used(&mut self, ticket_id: Uuid, at: DateTime<Utc>) -> DbResult<bool> {
        match self.working.tickets.get_mut(&ticket_id) {
            Some(ticket) if !ticket.used => {
                ticket.used = true;
                ticket.used_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn commit(self: Box<Self>) -> DbResult<()> {
        let MemoryTransaction {
            mut guard,
            working,
            failing_commits,
        } = *self;

        let injected = failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            warn!("memory store commit failed (injected)");
            return Err(DatabaseError::new(DatabaseErrorKind::ConnectionError {
                message: "injected commit failure".to_string(),
            }));
        }

        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> DbResult<()> {
        Ok(())
    }
}
