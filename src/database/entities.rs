//! Plain value structs returned by the repositories
//!
//! Catalog rows, cart lines, orders (both product orders and event bookings),
//! shipping snapshots and tickets. None of these save themselves; every
//! mutation goes through a named repository method.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::database::error::DatabaseError;
use crate::error::DomainError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub price: BigDecimal,
    pub stock: i32,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub name: String,
    pub location: String,
    pub starts_at: DateTime<Utc>,
    pub price: BigDecimal,
    pub available_tickets: i32,
    pub is_active: bool,
}

/// A seat is unique per (event, section, row, seat number).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seat {
    pub id: i64,
    pub event_id: i64,
    pub section: String,
    pub row_number: i32,
    pub seat_number: i32,
    pub is_sold: bool,
    /// Order currently holding the seat
    pub held_by: Option<Uuid>,
}

impl Seat {
    pub fn label(&self) -> String {
        format!(
            "{} / row {} / seat {}",
            self.section, self.row_number, self.seat_number
        )
    }

    pub fn is_available_for(&self, order_id: Uuid) -> bool {
        !self.is_sold && self.held_by.map_or(true, |holder| holder == order_id)
    }
}

/// Mutable address book entry owned by a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub id: i64,
    pub user_id: Uuid,
    pub full_name: String,
    pub phone_number: String,
    pub address_line_1: String,
    pub address_line_2: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogRef {
    Product(i64),
    Event(i64),
}

impl CatalogRef {
    pub fn product_id(&self) -> Option<i64> {
        match self {
            CatalogRef::Product(id) => Some(*id),
            CatalogRef::Event(_) => None,
        }
    }

    pub fn event_id(&self) -> Option<i64> {
        match self {
            CatalogRef::Event(id) => Some(*id),
            CatalogRef::Product(_) => None,
        }
    }

    /// Builds a reference from a nullable column pair; exactly one must be set.
    pub fn from_columns(product_id: Option<i64>, event_id: Option<i64>) -> Result<Self, DomainError> {
        match (product_id, event_id) {
            (Some(id), None) => Ok(CatalogRef::Product(id)),
            (None, Some(id)) => Ok(CatalogRef::Event(id)),
            (Some(_), Some(_)) => Err(DomainError::InvalidLineItem {
                reason: "line references both a product and an event".to_string(),
            }),
            (None, None) => Err(DomainError::InvalidLineItem {
                reason: "line references neither a product nor an event".to_string(),
            }),
        }
    }
}

impl fmt::Display for CatalogRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogRef::Product(id) => write!(f, "product:{}", id),
            CatalogRef::Event(id) => write!(f, "event:{}", id),
        }
    }
}

/// Catalog read model: current price and availability of a product or event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub reference: CatalogRef,
    pub name: String,
    pub unit_price: BigDecimal,
    pub available: i32,
    pub is_active: bool,
}

impl From<&Product> for CatalogEntry {
    fn from(p: &Product) -> Self {
        Self {
            reference: CatalogRef::Product(p.id),
            name: p.name.clone(),
            unit_price: p.price.clone(),
            available: p.stock,
            is_active: p.is_active,
        }
    }
}

impl From<&Event> for CatalogEntry {
    fn from(e: &Event) -> Self {
        Self {
            reference: CatalogRef::Event(e.id),
            name: e.name.clone(),
            unit_price: e.price.clone(),
            available: e.available_tickets,
            is_active: e.is_active,
        }
    }
}

/// Upper bound for the quantity of a single cart or order line.
pub const MAX_LINE_QUANTITY: i32 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub id: i64,
    pub user_id: Uuid,
    pub product_id: Option<i64>,
    pub event_id: Option<i64>,
    pub quantity: i32,
}

impl CartLine {
    pub fn catalog_ref(&self) -> Result<CatalogRef, DomainError> {
        CatalogRef::from_columns(self.product_id, self.event_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderKind {
    ProductOrder,
    EventBooking,
}

impl OrderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderKind::ProductOrder => "PRODUCT_ORDER",
            OrderKind::EventBooking => "EVENT_BOOKING",
        }
    }

    /// Prefix of gateway order ids minted for this kind
    pub fn gateway_prefix(&self) -> &'static str {
        match self {
            OrderKind::ProductOrder => "store",
            OrderKind::EventBooking => "booking",
        }
    }
}

impl FromStr for OrderKind {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PRODUCT_ORDER" => Ok(OrderKind::ProductOrder),
            "EVENT_BOOKING" => Ok(OrderKind::EventBooking),
            other => Err(DatabaseError::invalid_data(format!(
                "unknown order kind: {}",
                other
            ))),
        }
    }
}

/// PENDING → SUCCESSFUL or PENDING → FAILED; both branches are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentState {
    Pending,
    Successful,
    Failed,
}

impl PaymentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentState::Pending => "PENDING",
            PaymentState::Successful => "SUCCESSFUL",
            PaymentState::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentState::Pending)
    }
}

impl fmt::Display for PaymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentState {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(PaymentState::Pending),
            "SUCCESSFUL" => Ok(PaymentState::Successful),
            "FAILED" => Ok(PaymentState::Failed),
            other => Err(DatabaseError::invalid_data(format!(
                "unknown payment state: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FulfillmentState {
    NotFulfilled,
    Fulfilled,
}

impl FulfillmentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FulfillmentState::NotFulfilled => "NOT_FULFILLED",
            FulfillmentState::Fulfilled => "FULFILLED",
        }
    }
}

impl FromStr for FulfillmentState {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NOT_FULFILLED" => Ok(FulfillmentState::NotFulfilled),
            "FULFILLED" => Ok(FulfillmentState::Fulfilled),
            other => Err(DatabaseError::invalid_data(format!(
                "unknown fulfillment state: {}",
                other
            ))),
        }
    }
}

/// A line captured at order creation. `unit_price` is never recomputed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: i64,
    pub order_id: Uuid,
    pub product_id: Option<i64>,
    pub event_id: Option<i64>,
    pub quantity: i32,
    pub unit_price: BigDecimal,
}

impl OrderItem {
    pub fn subtotal(&self) -> BigDecimal {
        &self.unit_price * BigDecimal::from(self.quantity)
    }

    pub fn catalog_ref(&self) -> Result<CatalogRef, DomainError> {
        CatalogRef::from_columns(self.product_id, self.event_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: OrderKind,
    /// Paid from the owner's cart; the cart is cleared on success
    pub from_cart: bool,
    pub currency: String,
    pub total_amount: BigDecimal,
    pub gateway_order_id: Option<String>,
    pub gateway_payment_id: Option<String>,
    pub payment_session_id: Option<String>,
    pub payment_state: PaymentState,
    pub fulfillment_state: FulfillmentState,
    pub address_id: Option<i64>,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub review_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub items: Vec<OrderItem>,
    pub seat_ids: Vec<i64>,
}

impl Order {
    pub fn items_total(&self) -> BigDecimal {
        self.items
            .iter()
            .fold(BigDecimal::from(0), |acc, item| acc + item.subtotal())
    }

    pub fn total_matches_items(&self) -> bool {
        self.items_total() == self.total_amount
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOrderItem {
    pub reference: CatalogRef,
    pub quantity: i32,
    pub unit_price: BigDecimal,
}

impl NewOrderItem {
    pub fn subtotal(&self) -> BigDecimal {
        &self.unit_price * BigDecimal::from(self.quantity)
    }
}

/// Insert payload for a PENDING order with no gateway id yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOrder {
    pub user_id: Uuid,
    pub kind: OrderKind,
    pub from_cart: bool,
    pub currency: String,
    pub items: Vec<NewOrderItem>,
    pub seat_ids: Vec<i64>,
    pub address_id: Option<i64>,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
}

impl NewOrder {
    pub fn total(&self) -> BigDecimal {
        self.items
            .iter()
            .fold(BigDecimal::from(0), |acc, item| acc + item.subtotal())
    }
}

/// Address frozen at purchase time; one per order, never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShippingSnapshot {
    pub order_id: Uuid,
    pub full_name: String,
    pub phone: String,
    pub address_line_1: String,
    pub address_line_2: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub created_at: DateTime<Utc>,
}

impl ShippingSnapshot {
    pub fn from_address(order_id: Uuid, address: &Address) -> Self {
        Self {
            order_id,
            full_name: address.full_name.clone(),
            phone: address.phone_number.clone(),
            address_line_1: address.address_line_1.clone(),
            address_line_2: address.address_line_2.clone().unwrap_or_default(),
            city: address.city.clone(),
            state: address.state.clone(),
            postal_code: address.postal_code.clone(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub ticket_id: Uuid,
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub event_id: i64,
    /// `None` for general admission
    pub seat_id: Option<i64>,
    pub admission_no: i32,
    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub issued_at: DateTime<Utc>,
}

/// Composite key a ticket is claimed under; claiming twice returns the same ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TicketClaim {
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub event_id: i64,
    pub seat_id: Option<i64>,
    pub admission_no: i32,
}

impl TicketClaim {
    pub fn matches(&self, ticket: &Ticket) -> bool {
        ticket.order_id == self.order_id
            && ticket.user_id == self.user_id
            && ticket.event_id == self.event_id
            && ticket.seat_id == self.seat_id
            && ticket.admission_no == self.admission_no
    }
}
