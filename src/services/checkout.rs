//! Order/booking creation and payment initiation
//!
//! Orders are created PENDING with prices snapshotted from the catalog. The
//! gateway order id is minted lazily on the first payment attempt and never
//! changes afterwards. No transaction is open while the gateway is called.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::CheckoutConfig;
use crate::database::entities::{CatalogRef, NewOrder, NewOrderItem, Order, OrderKind, PaymentState};
use crate::database::repository::{
    CartRepository, CatalogRepository, FulfillmentRepository, OrderRepository,
};
use crate::database::{CommerceStore, StoreTransaction};
use crate::error::{
    AppError, AppErrorKind, AppResult, DomainError, ExternalError, InfrastructureError,
    ValidationError,
};
use crate::logging::mask_email;
use crate::payments::types::{CustomerContact, Money, PaymentSession, SessionRequest};
use crate::payments::{PaymentError, PaymentGateway};
use crate::services::cart::check_line_quantity;

/// What the buyer is checking out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Selection {
    /// Everything in the buyer's cart
    Cart,
    /// A single catalog item, bypassing the cart
    BuyNow { item: CatalogRef, quantity: i32 },
    /// Specific seats of one event
    Seats { event_id: i64, seat_ids: Vec<i64> },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerDetails {
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub selection: Selection,
    #[serde(default)]
    pub customer: CustomerDetails,
    #[serde(default)]
    pub address_id: Option<i64>,
}

#[derive(Clone)]
pub struct CheckoutService {
    store: Arc<dyn CommerceStore>,
    gateway: Arc<dyn PaymentGateway>,
    config: CheckoutConfig,
}

impl CheckoutService {
    pub fn new(
        store: Arc<dyn CommerceStore>,
        gateway: Arc<dyn PaymentGateway>,
        config: CheckoutConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            config,
        }
    }

    pub async fn create_pending_order(
        &self,
        user_id: Uuid,
        request: CheckoutRequest,
    ) -> AppResult<Order> {
        let mut tx = self.store.begin().await?;

        let (kind, from_cart, items, seat_ids) = match &request.selection {
            Selection::Cart => {
                let items = self.items_from_cart(tx.as_mut(), user_id).await?;
                (OrderKind::ProductOrder, true, items, Vec::new())
            }
            Selection::BuyNow { item, quantity } => {
                if *quantity < 1 {
                    return Err(DomainError::EmptySelection {
                        reason: "quantity must be at least 1".to_string(),
                    }
                    .into());
                }
                check_line_quantity(*quantity)?;
                let unit_price = active_price(tx.as_mut(), *item).await?;
                let line = NewOrderItem {
                    reference: *item,
                    quantity: *quantity,
                    unit_price,
                };
                (OrderKind::ProductOrder, false, vec![line], Vec::new())
            }
            Selection::Seats { event_id, seat_ids } => {
                let seat_ids = dedup(seat_ids);
                let line = seat_line(tx.as_mut(), *event_id, &seat_ids).await?;
                (OrderKind::EventBooking, false, vec![line], seat_ids)
            }
        };

        if let Some(address_id) = request.address_id {
            let owned = tx
                .find_address(address_id)
                .await?
                .is_some_and(|a| a.user_id == user_id);
            if !owned {
                return Err(AppError::validation(ValidationError::MissingField {
                    field: "address_id".to_string(),
                }));
            }
        }

        let new_order = NewOrder {
            user_id,
            kind,
            from_cart,
            currency: self.config.currency.clone(),
            items,
            seat_ids: seat_ids.clone(),
            address_id: request.address_id,
            customer_email: request.customer.email.clone(),
            customer_phone: request.customer.phone.clone(),
        };

        if new_order.total() <= bigdecimal::BigDecimal::from(0) {
            return Err(AppError::validation(ValidationError::OutOfRange {
                field: "total_amount".to_string(),
                min: Some("0.01".to_string()),
                max: None,
            }));
        }

        let order = tx.insert_order(new_order).await?;

        for seat_id in &seat_ids {
            if !tx.hold_seat(*seat_id, order.id).await? {
                info!(order_id = %order.id, seat_id, "Seat already claimed; booking abandoned");
                return Err(DomainError::SeatUnavailable { seat_id: *seat_id }.into());
            }
        }

        tx.commit().await?;

        info!(
            order_id = %order.id,
            user_id = %user_id,
            kind = order.kind.as_str(),
            total = %order.total_amount,
            items = order.items.len(),
            seats = order.seat_ids.len(),
            email = %order.customer_email.as_deref().map(mask_email).unwrap_or_default(),
            "🧾 Pending order created"
        );
        Ok(order)
    }

    async fn items_from_cart(
        &self,
        tx: &mut dyn StoreTransaction,
        user_id: Uuid,
    ) -> AppResult<Vec<NewOrderItem>> {
        let lines = tx.cart_lines(user_id).await?;
        if lines.is_empty() {
            return Err(DomainError::EmptySelection {
                reason: "cart is empty".to_string(),
            }
            .into());
        }

        let mut items = Vec::with_capacity(lines.len());
        for line in lines {
            let reference = line.catalog_ref()?;
            let unit_price = active_price(tx, reference).await?;
            items.push(NewOrderItem {
                reference,
                quantity: line.quantity,
                unit_price,
            });
        }
        Ok(items)
    }

    /// Returns the existing id when one is already set.
    pub async fn assign_gateway_order_id(&self, order_id: Uuid) -> AppResult<String> {
        let attempts = self.config.gateway_order_id_attempts.max(1);

        for attempt in 1..=attempts {
            let mut tx = self.store.begin().await?;
            let order = tx
                .lock_order(order_id)
                .await?
                .ok_or_else(|| order_not_found(order_id))?;

            if let Some(existing) = order.gateway_order_id {
                return Ok(existing);
            }

            let candidate = format!("{}_{}", order.kind.gateway_prefix(), Uuid::new_v4().simple());
            if tx.gateway_order_id_exists(&candidate).await? {
                warn!(order_id = %order_id, attempt, "Gateway order id collision, regenerating");
                continue;
            }

            match tx.set_gateway_order_id(order_id, &candidate).await {
                Ok(true) => {
                    tx.commit().await?;
                    info!(order_id = %order_id, gateway_order_id = %candidate, "Gateway order id assigned");
                    return Ok(candidate);
                }
                Ok(false) => {
                    drop(tx);
                    let mut tx = self.store.begin().await?;
                    return tx
                        .find_order(order_id)
                        .await?
                        .and_then(|o| o.gateway_order_id)
                        .ok_or_else(|| order_not_found(order_id));
                }
                Err(e) if e.is_unique_violation() => {
                    warn!(order_id = %order_id, attempt, "Gateway order id taken concurrently, regenerating");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }

        error!(order_id = %order_id, attempts, "Could not allocate a unique gateway order id");
        Err(AppError::new(AppErrorKind::Infrastructure(
            InfrastructureError::Database {
                message: "gateway order id allocation exhausted".to_string(),
                is_retryable: true,
            },
        )))
    }

    /// Creates or reuses the gateway session for a PENDING order of `user_id`.
    pub async fn initiate_payment(&self, user_id: Uuid, order_id: Uuid) -> AppResult<PaymentSession> {
        let order = {
            let mut tx = self.store.begin().await?;
            let found = tx.find_order(order_id).await?;
            found
                .filter(|o| o.user_id == user_id)
                .ok_or_else(|| order_not_found(order_id))?
        };

        if order.payment_state != PaymentState::Pending {
            return Err(DomainError::OrderNotPayable {
                order_id: order_id.to_string(),
                state: order.payment_state.to_string(),
            }
            .into());
        }

        if let (Some(gateway_order_id), Some(session_id)) =
            (&order.gateway_order_id, &order.payment_session_id)
        {
            info!(order_id = %order_id, "Reusing stored payment session");
            return Ok(PaymentSession {
                gateway_order_id: gateway_order_id.clone(),
                session_id: session_id.clone(),
                provider_reference: None,
            });
        }

        let gateway_order_id = self.assign_gateway_order_id(order_id).await?;
        let request = SessionRequest {
            gateway_order_id: gateway_order_id.clone(),
            amount: Money::from_decimal(&order.total_amount, order.currency.clone()),
            customer: CustomerContact {
                customer_id: user_id.simple().to_string(),
                email: order.customer_email.clone(),
                phone: order.customer_phone.clone(),
            },
            notify_url: self.config.notify_url.clone(),
            return_url: self.config.return_url.clone(),
            metadata: Some(serde_json::json!({
                "order_id": order.id,
                "kind": order.kind.as_str(),
            })),
        };

        let session = match self.gateway.create_session(request).await {
            Ok(session) => session,
            Err(PaymentError::Conflict { message }) => {
                info!(
                    order_id = %order_id,
                    gateway_order_id = %gateway_order_id,
                    message = %message,
                    "Remote order already exists, recovering its session"
                );
                self.recover_session(&gateway_order_id).await?
            }
            Err(e) => {
                warn!(
                    order_id = %order_id,
                    gateway_order_id = %gateway_order_id,
                    error = %e,
                    "Payment session creation failed; order left pending"
                );
                return Err(e.into());
            }
        };

        let mut tx = self.store.begin().await?;
        if tx.lock_order(order_id).await?.is_some() {
            tx.set_payment_session(order_id, &session.session_id).await?;
            tx.commit().await?;
        }

        info!(
            order_id = %order_id,
            gateway_order_id = %session.gateway_order_id,
            provider = %self.gateway.name(),
            "💳 Payment session ready"
        );
        Ok(session)
    }

    async fn recover_session(&self, gateway_order_id: &str) -> AppResult<PaymentSession> {
        let remote = self.gateway.fetch_order(gateway_order_id).await?;
        match remote.session_id {
            Some(session_id) if !session_id.is_empty() => Ok(PaymentSession {
                gateway_order_id: remote.gateway_order_id,
                session_id,
                provider_reference: None,
            }),
            _ => Err(AppError::new(AppErrorKind::External(
                ExternalError::GatewayInitiation {
                    provider: self.gateway.name().to_string(),
                    message: "existing remote order has no payment session".to_string(),
                    is_retryable: false,
                },
            ))),
        }
    }
}

fn order_not_found(order_id: Uuid) -> AppError {
    DomainError::OrderNotFound {
        order_id: order_id.to_string(),
    }
    .into()
}

fn dedup(seat_ids: &[i64]) -> Vec<i64> {
    let mut ids = seat_ids.to_vec();
    ids.sort_unstable();
    ids.dedup();
    ids
}

async fn active_price(
    tx: &mut dyn StoreTransaction,
    reference: CatalogRef,
) -> AppResult<bigdecimal::BigDecimal> {
    match tx.find_catalog_entry(reference).await? {
        Some(entry) if entry.is_active => Ok(entry.unit_price),
        _ => Err(DomainError::CatalogItemNotFound {
            reference: reference.to_string(),
        }
        .into()),
    }
}

/// One event line covering every requested seat, priced at the event price.
async fn seat_line(
    tx: &mut dyn StoreTransaction,
    event_id: i64,
    seat_ids: &[i64],
) -> AppResult<NewOrderItem> {
    if seat_ids.is_empty() {
        return Err(DomainError::EmptySelection {
            reason: "no seats selected".to_string(),
        }
        .into());
    }

    let reference = CatalogRef::Event(event_id);
    let unit_price = active_price(tx, reference).await?;

    let seats = tx.find_seats(seat_ids).await?;
    for seat_id in seat_ids {
        let belongs = seats
            .iter()
            .any(|s| s.id == *seat_id && s.event_id == event_id);
        if !belongs {
            return Err(DomainError::InvalidLineItem {
                reason: format!("seat {} does not belong to event {}", seat_id, event_id),
            }
            .into());
        }
    }

    Ok(NewOrderItem {
        reference,
        quantity: seat_ids.len() as i32,
        unit_price,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_deserializes_from_tagged_json() {
        let cart: Selection = serde_json::from_str(r#"{"type":"cart"}"#).unwrap();
        assert_eq!(cart, Selection::Cart);

        let buy_now: Selection =
            serde_json::from_str(r#"{"type":"buy_now","item":{"product":4},"quantity":2}"#)
                .unwrap();
        assert_eq!(
            buy_now,
            Selection::BuyNow {
                item: CatalogRef::Product(4),
                quantity: 2
            }
        );

        let seats: Selection =
            serde_json::from_str(r#"{"type":"seats","event_id":1,"seat_ids":[3,3,2]}"#).unwrap();
        match seats {
            Selection::Seats { seat_ids, .. } => assert_eq!(dedup(&seat_ids), vec![2, 3]),
            other => panic!("unexpected selection {:?}", other),
        }
    }
}
