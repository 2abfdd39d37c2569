use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::database::entities::{Order, OrderKind, PaymentState};
use crate::logging::{mask_email, mask_phone};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NotificationType {
    OrderConfirmed,
    BookingConfirmed,
    PaymentFailed,
}

/// Post-commit message for the buyer. Delivery is best effort.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationNotice {
    pub notification_type: NotificationType,
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub gateway_order_id: Option<String>,
    pub amount: BigDecimal,
    pub currency: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub ticket_ids: Vec<Uuid>,
}

impl ConfirmationNotice {
    pub fn for_order(order: &Order, ticket_ids: Vec<Uuid>) -> Self {
        let notification_type = match (order.payment_state, order.kind) {
            (PaymentState::Failed, _) => NotificationType::PaymentFailed,
            (_, OrderKind::EventBooking) => NotificationType::BookingConfirmed,
            (_, OrderKind::ProductOrder) if !ticket_ids.is_empty() => {
                NotificationType::BookingConfirmed
            }
            (_, OrderKind::ProductOrder) => NotificationType::OrderConfirmed,
        };

        Self {
            notification_type,
            order_id: order.id,
            user_id: order.user_id,
            gateway_order_id: order.gateway_order_id.clone(),
            amount: order.total_amount.clone(),
            currency: order.currency.clone(),
            email: order.customer_email.clone(),
            phone: order.customer_phone.clone(),
            ticket_ids,
        }
    }
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("no contact channel for order {0}")]
    NoRecipient(Uuid),

    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

/// Outbound email/SMS channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notice: &ConfirmationNotice) -> Result<(), NotificationError>;
}

/// Writes notices to the log instead of a real channel.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notice: &ConfirmationNotice) -> Result<(), NotificationError> {
        if notice.email.is_none() && notice.phone.is_none() {
            return Err(NotificationError::NoRecipient(notice.order_id));
        }

        let email = notice.email.as_deref().map(mask_email).unwrap_or_default();
        let phone = notice.phone.as_deref().map(mask_phone).unwrap_or_default();

        match notice.notification_type {
            NotificationType::OrderConfirmed => {
                info!(
                    order_id = %notice.order_id,
                    amount = %notice.amount,
                    currency = %notice.currency,
                    email = %email,
                    phone = %phone,
                    "🔔 NOTIFICATION: Order confirmed"
                );
            }
            NotificationType::BookingConfirmed => {
                info!(
                    order_id = %notice.order_id,
                    tickets = notice.ticket_ids.len(),
                    email = %email,
                    phone = %phone,
                    "🔔 NOTIFICATION: Booking confirmed"
                );
            }
            NotificationType::PaymentFailed => {
                warn!(
                    order_id = %notice.order_id,
                    email = %email,
                    phone = %phone,
                    "🔔 NOTIFICATION: Payment failed"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::entities::FulfillmentState;
    use chrono::Utc;

    fn order(kind: OrderKind, state: PaymentState) -> Order {
        Order {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            kind,
            from_cart: false,
            currency: "INR".to_string(),
            total_amount: BigDecimal::from(25),
            gateway_order_id: Some("store_abc".to_string()),
            gateway_payment_id: None,
            payment_session_id: None,
            payment_state: state,
            fulfillment_state: FulfillmentState::NotFulfilled,
            address_id: None,
            customer_email: Some("buyer@example.com".to_string()),
            customer_phone: None,
            review_reason: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            paid_at: None,
            items: vec![],
            seat_ids: vec![],
        }
    }

    #[test]
    fn notice_type_follows_order_kind_and_state() {
        let paid = order(OrderKind::EventBooking, PaymentState::Successful);
        assert_eq!(
            ConfirmationNotice::for_order(&paid, vec![]).notification_type,
            NotificationType::BookingConfirmed
        );

        let failed = order(OrderKind::ProductOrder, PaymentState::Failed);
        assert_eq!(
            ConfirmationNotice::for_order(&failed, vec![]).notification_type,
            NotificationType::PaymentFailed
        );
    }

    #[tokio::test]
    async fn log_notifier_requires_a_channel() {
        let mut o = order(OrderKind::ProductOrder, PaymentState::Successful);
        let notifier = LogNotifier::new();
        assert!(notifier
            .send(&ConfirmationNotice::for_order(&o, vec![]))
            .await
            .is_ok());

        o.customer_email = None;
        assert!(matches!(
            notifier.send(&ConfirmationNotice::for_order(&o, vec![])).await,
            Err(NotificationError::NoRecipient(_))
        ));
    }
}
