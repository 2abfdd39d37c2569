//! Repository traits implemented by a store transaction handle
//!
//! Every read and write happens inside a [`StoreTransaction`]. Dropping a
//! handle without calling [`StoreTransaction::commit`] discards its writes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::database::entities::{
    Address, CartLine, CatalogEntry, CatalogRef, Event, NewOrder, Order, Product, Seat,
    ShippingSnapshot, Ticket, TicketClaim,
};
use crate::database::error::DatabaseError;

pub type DbResult<T> = Result<T, DatabaseError>;

#[async_trait]
pub trait CatalogRepository: Send {
    async fn find_product(&mut self, id: i64) -> DbResult<Option<Product>>;

    async fn find_event(&mut self, id: i64) -> DbResult<Option<Event>>;

    /// Current price and availability of a product or event.
    async fn find_catalog_entry(&mut self, reference: CatalogRef) -> DbResult<Option<CatalogEntry>>;

    async fn find_seats(&mut self, seat_ids: &[i64]) -> DbResult<Vec<Seat>>;

    /// Holds a free seat for `order_id`. Returns false when the seat is sold
    /// or held by another order.
    async fn hold_seat(&mut self, seat_id: i64, order_id: Uuid) -> DbResult<bool>;

    /// Marks every seat held by the order as sold.
    async fn mark_seats_sold(&mut self, order_id: Uuid) -> DbResult<u64>;

    /// Frees unsold seats held by the order.
    async fn release_seats(&mut self, order_id: Uuid) -> DbResult<u64>;
}

#[async_trait]
pub trait CartRepository: Send {
    async fn cart_lines(&mut self, user_id: Uuid) -> DbResult<Vec<CartLine>>;

    /// Adds `quantity` to the user's line for `reference`, creating it if absent.
    async fn merge_cart_line(
        &mut self,
        user_id: Uuid,
        reference: CatalogRef,
        quantity: i32,
    ) -> DbResult<CartLine>;

    async fn remove_cart_line(&mut self, user_id: Uuid, line_id: i64) -> DbResult<bool>;

    /// Deletes every line of the user's cart.
    async fn clear_cart(&mut self, user_id: Uuid) -> DbResult<u64>;
}

#[async_trait]
pub trait OrderRepository: Send {
    /// Persists a PENDING order with its items and seat references.
    async fn insert_order(&mut self, order: NewOrder) -> DbResult<Order>;

    async fn find_order(&mut self, order_id: Uuid) -> DbResult<Option<Order>>;

    /// Loads the order with its row locked for the rest of the transaction.
    async fn lock_order(&mut self, order_id: Uuid) -> DbResult<Option<Order>>;

    async fn lock_order_by_gateway_id(&mut self, gateway_order_id: &str)
        -> DbResult<Option<Order>>;

    async fn gateway_order_id_exists(&mut self, gateway_order_id: &str) -> DbResult<bool>;

    /// Sets the gateway id only if none is set. Returns false otherwise.
    async fn set_gateway_order_id(&mut self, order_id: Uuid, gateway_order_id: &str)
        -> DbResult<bool>;

    async fn set_payment_session(&mut self, order_id: Uuid, session_id: &str) -> DbResult<()>;

    /// PENDING → SUCCESSFUL. Returns false if the order was not PENDING.
    async fn mark_paid(
        &mut self,
        order_id: Uuid,
        gateway_payment_id: Option<&str>,
        paid_at: DateTime<Utc>,
    ) -> DbResult<bool>;

    /// PENDING → FAILED. Returns false if the order was not PENDING.
    async fn mark_failed(&mut self, order_id: Uuid) -> DbResult<bool>;

    async fn mark_fulfilled(&mut self, order_id: Uuid) -> DbResult<()>;

    async fn flag_for_review(&mut self, order_id: Uuid, reason: &str) -> DbResult<()>;

    /// Newest first.
    async fn orders_for_user(&mut self, user_id: Uuid) -> DbResult<Vec<Order>>;

    /// PENDING orders created before `created_before`, oldest first. Orders
    /// flagged for review are left to operators and never returned.
    async fn stale_pending_orders(
        &mut self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> DbResult<Vec<Order>>;
}

#[async_trait]
pub trait FulfillmentRepository: Send {
    async fn find_address(&mut self, address_id: i64) -> DbResult<Option<Address>>;

    async fn shipping_snapshot(&mut self, order_id: Uuid) -> DbResult<Option<ShippingSnapshot>>;

    async fn insert_shipping_snapshot(
        &mut self,
        snapshot: ShippingSnapshot,
    ) -> DbResult<ShippingSnapshot>;

    /// Get-or-create keyed by the claim. The flag is true when a new ticket
    /// was issued.
    async fn claim_ticket(&mut self, claim: TicketClaim) -> DbResult<(Ticket, bool)>;

    async fn tickets_for_order(&mut self, order_id: Uuid) -> DbResult<Vec<Ticket>>;

    async fn find_ticket(&mut self, ticket_id: Uuid) -> DbResult<Option<Ticket>>;

    async fn lock_ticket(&mut self, ticket_id: Uuid) -> DbResult<Option<Ticket>>;

    /// Sets `used` only if it is still false. Returns false otherwise.
    async fn mark_ticket_used(&mut self, ticket_id: Uuid, at: DateTime<Utc>) -> DbResult<bool>;
}

/// A unit of work over all repositories.
#[async_trait]
pub trait StoreTransaction:
    CatalogRepository + CartRepository + OrderRepository + FulfillmentRepository + Send
{
    async fn commit(self: Box<Self>) -> DbResult<()>;

    async fn rollback(self: Box<Self>) -> DbResult<()>;
}

#[async_trait]
pub trait CommerceStore: Send + Sync {
    async fn begin(&self) -> DbResult<Box<dyn StoreTransaction>>;

    /// Cheap liveness probe for health checks.
    async fn ping(&self) -> DbResult<()>;

    fn backend(&self) -> &'static str;
}
