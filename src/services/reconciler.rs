//! Webhook reconciliation: PENDING → SUCCESSFUL | FAILED, exactly once.
//!
//! Every transition runs in one store transaction with the order row locked.
//! On success the payment flip, seat sale, ticket/shipping emission, cart clear
//! and fulfillment flag commit together or not at all. Notifications are sent
//! only after commit and can never turn an applied transition into an error.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::WebhookConfig;
use crate::database::entities::{Order, PaymentState};
use crate::database::error::DatabaseError;
use crate::database::repository::{CartRepository, CatalogRepository, DbResult, OrderRepository};
use crate::database::{CommerceStore, StoreTransaction};
use crate::payments::providers::cashfree::timestamp_is_fresh;
use crate::payments::types::{GatewayEventKind, Money};
use crate::payments::PaymentGateway;
use crate::services::fulfillment::FulfillmentEmitter;
use crate::services::notification::{ConfirmationNotice, Notifier};

/// Source-verification headers of a gateway callback.
#[derive(Debug, Clone, Default)]
pub struct WebhookHeaders {
    pub signature: Option<String>,
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Applied { order_id: Uuid, state: PaymentState },
    AlreadyProcessed { order_id: Uuid },
    Ignored { reason: String },
    Ping,
    Flagged { order_id: Uuid, reason: String },
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("webhook signature rejected: {0}")]
    InvalidSignature(String),

    #[error("invalid webhook payload: {0}")]
    InvalidPayload(String),

    #[error("storage failure during reconciliation: {0}")]
    Storage(#[from] DatabaseError),
}

impl ReconcileError {
    /// 5xx asks the gateway to redeliver; 4xx does not.
    pub fn status_code(&self) -> u16 {
        match self {
            ReconcileError::InvalidSignature(_) => 401,
            ReconcileError::InvalidPayload(_) => 400,
            ReconcileError::Storage(_) => 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderKey {
    GatewayOrderId(String),
    OrderId(Uuid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionSource {
    Webhook,
    StatusPoll,
    Expiry,
}

impl TransitionSource {
    fn as_str(&self) -> &'static str {
        match self {
            TransitionSource::Webhook => "webhook",
            TransitionSource::StatusPoll => "status_poll",
            TransitionSource::Expiry => "expiry",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentVerdict {
    Succeeded {
        gateway_payment_id: Option<String>,
        /// Amount the gateway reports as paid, compared against the order total
        amount: Option<Money>,
    },
    Failed {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentTransition {
    pub order: OrderKey,
    pub verdict: PaymentVerdict,
    pub source: TransitionSource,
}

#[derive(Clone)]
pub struct WebhookReconciler {
    store: Arc<dyn CommerceStore>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn Notifier>,
    emitter: FulfillmentEmitter,
    config: WebhookConfig,
}

impl WebhookReconciler {
    pub fn new(
        store: Arc<dyn CommerceStore>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
        config: WebhookConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            notifier,
            emitter: FulfillmentEmitter::new(),
            config,
        }
    }

    pub async fn handle_callback(
        &self,
        raw_body: &[u8],
        headers: &WebhookHeaders,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let provider = self.gateway.name();

        if self.config.require_signature {
            let verification = self
                .gateway
                .verify_webhook(
                    raw_body,
                    headers.signature.as_deref().unwrap_or_default(),
                    headers.timestamp.as_deref().unwrap_or_default(),
                )
                .map_err(|e| ReconcileError::InvalidSignature(e.to_string()))?;

            if !verification.valid {
                let reason = verification
                    .reason
                    .unwrap_or_else(|| "signature mismatch".to_string());
                warn!(provider = %provider, reason = %reason, "Rejected unverified webhook");
                return Err(ReconcileError::InvalidSignature(reason));
            }

            let timestamp = headers.timestamp.as_deref().unwrap_or_default();
            if !timestamp_is_fresh(timestamp, Utc::now(), self.config.timestamp_tolerance) {
                warn!(
                    provider = %provider,
                    timestamp = %timestamp,
                    "Rejected webhook outside the timestamp window"
                );
                return Err(ReconcileError::InvalidSignature(
                    "webhook timestamp outside the accepted window".to_string(),
                ));
            }
        }

        let event = self.gateway.parse_webhook_event(raw_body).map_err(|e| {
            warn!(provider = %provider, error = %e, "Malformed webhook payload");
            ReconcileError::InvalidPayload(e.to_string())
        })?;

        if event.kind == GatewayEventKind::Test {
            info!(provider = %provider, "Webhook test delivery acknowledged");
            return Ok(ReconcileOutcome::Ping);
        }

        let Some(gateway_order_id) = event.gateway_order_id.clone() else {
            return Ok(ReconcileOutcome::Ignored {
                reason: format!("{} carries no order id", event.event_type),
            });
        };

        let verdict = if event.confirms_success() {
            PaymentVerdict::Succeeded {
                gateway_payment_id: event.gateway_payment_id.clone(),
                amount: event.amount.clone(),
            }
        } else if event.confirms_failure() {
            PaymentVerdict::Failed {
                reason: event.event_type.clone(),
            }
        } else {
            info!(
                gateway_order_id = %gateway_order_id,
                event_type = %event.event_type,
                payment_status = ?event.payment_status,
                "Webhook is not a definitive payment outcome; ignoring"
            );
            return Ok(ReconcileOutcome::Ignored {
                reason: format!(
                    "{} with status {:?} is not a definitive outcome",
                    event.event_type, event.payment_status
                ),
            });
        };

        let outcome = self
            .apply_transition(PaymentTransition {
                order: OrderKey::GatewayOrderId(gateway_order_id),
                verdict,
                source: TransitionSource::Webhook,
            })
            .await?;
        Ok(outcome)
    }

    pub async fn apply_transition(&self, transition: PaymentTransition) -> DbResult<ReconcileOutcome> {
        let mut tx = self.store.begin().await?;

        let order = match &transition.order {
            OrderKey::GatewayOrderId(id) => tx.lock_order_by_gateway_id(id).await?,
            OrderKey::OrderId(id) => tx.lock_order(*id).await?,
        };
        let Some(order) = order else {
            info!(
                order = ?transition.order,
                source = transition.source.as_str(),
                "No local order for payment outcome; ignoring"
            );
            return Ok(ReconcileOutcome::Ignored {
                reason: "unknown order".to_string(),
            });
        };

        match transition.verdict {
            PaymentVerdict::Succeeded {
                gateway_payment_id,
                amount,
            } => {
                self.apply_success(tx, order, gateway_payment_id, amount, transition.source)
                    .await
            }
            PaymentVerdict::Failed { reason } => {
                self.apply_failure(tx, order, &reason, transition.source).await
            }
        }
    }

    async fn apply_success(
        &self,
        mut tx: Box<dyn StoreTransaction>,
        order: Order,
        gateway_payment_id: Option<String>,
        amount: Option<Money>,
        source: TransitionSource,
    ) -> DbResult<ReconcileOutcome> {
        match order.payment_state {
            PaymentState::Successful => {
                info!(order_id = %order.id, source = source.as_str(), "Payment already processed");
                return Ok(ReconcileOutcome::AlreadyProcessed { order_id: order.id });
            }
            PaymentState::Failed => {
                return flag(tx, &order, "payment success reported for a FAILED order").await;
            }
            PaymentState::Pending => {}
        }

        if !order.total_matches_items() {
            let reason = format!(
                "order total {} differs from line items {}",
                order.total_amount,
                order.items_total()
            );
            return flag(tx, &order, &reason).await;
        }

        if let Some(reported) = &amount {
            if let Some(reason) = amount_mismatch(&order, reported) {
                return flag(tx, &order, &reason).await;
            }
        }

        let paid_at = Utc::now();
        if !tx
            .mark_paid(order.id, gateway_payment_id.as_deref(), paid_at)
            .await?
        {
            return Ok(ReconcileOutcome::AlreadyProcessed { order_id: order.id });
        }
        let seats_sold = tx.mark_seats_sold(order.id).await?;
        let report = self.emitter.fulfill(tx.as_mut(), &order).await?;
        let cleared = if order.from_cart {
            tx.clear_cart(order.user_id).await?
        } else {
            0
        };
        tx.mark_fulfilled(order.id).await?;
        tx.commit().await?;

        info!(
            order_id = %order.id,
            gateway_payment_id = ?gateway_payment_id,
            source = source.as_str(),
            seats_sold,
            tickets = report.tickets.len(),
            shipping_created = report.shipping_created,
            cart_lines_cleared = cleared,
            "✅ Payment confirmed and order fulfilled"
        );

        let mut paid = order;
        paid.payment_state = PaymentState::Successful;
        paid.gateway_payment_id = gateway_payment_id;
        paid.paid_at = Some(paid_at);
        let ticket_ids = report.tickets.iter().map(|t| t.ticket_id).collect();
        self.notify(ConfirmationNotice::for_order(&paid, ticket_ids))
            .await;

        Ok(ReconcileOutcome::Applied {
            order_id: paid.id,
            state: PaymentState::Successful,
        })
    }

    async fn apply_failure(
        &self,
        mut tx: Box<dyn StoreTransaction>,
        order: Order,
        reason: &str,
        source: TransitionSource,
    ) -> DbResult<ReconcileOutcome> {
        match order.payment_state {
            PaymentState::Failed => {
                return Ok(ReconcileOutcome::AlreadyProcessed { order_id: order.id });
            }
            PaymentState::Successful => {
                info!(
                    order_id = %order.id,
                    reason = %reason,
                    "Failure reported for a paid order; ignoring"
                );
                return Ok(ReconcileOutcome::Ignored {
                    reason: "order already paid".to_string(),
                });
            }
            PaymentState::Pending => {}
        }

        if !tx.mark_failed(order.id).await? {
            return Ok(ReconcileOutcome::AlreadyProcessed { order_id: order.id });
        }
        let released = tx.release_seats(order.id).await?;
        tx.commit().await?;

        warn!(
            order_id = %order.id,
            reason = %reason,
            source = source.as_str(),
            seats_released = released,
            "❌ Payment failed; order closed"
        );

        let mut failed = order;
        failed.payment_state = PaymentState::Failed;
        self.notify(ConfirmationNotice::for_order(&failed, Vec::new()))
            .await;

        Ok(ReconcileOutcome::Applied {
            order_id: failed.id,
            state: PaymentState::Failed,
        })
    }

    async fn notify(&self, notice: ConfirmationNotice) {
        let order_id = notice.order_id;
        match tokio::time::timeout(self.config.notification_timeout, self.notifier.send(&notice))
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(order_id = %order_id, error = %e, "Confirmation notice not delivered");
            }
            Err(_) => {
                warn!(
                    order_id = %order_id,
                    timeout_ms = self.config.notification_timeout.as_millis() as u64,
                    "Confirmation notice timed out"
                );
            }
        }
    }
}

/// Persists the review reason and acknowledges without applying anything.
async fn flag(
    mut tx: Box<dyn StoreTransaction>,
    order: &Order,
    reason: &str,
) -> DbResult<ReconcileOutcome> {
    tx.flag_for_review(order.id, reason).await?;
    tx.commit().await?;
    error!(
        order_id = %order.id,
        payment_state = %order.payment_state,
        reason = %reason,
        "🚩 Order flagged for operator review"
    );
    Ok(ReconcileOutcome::Flagged {
        order_id: order.id,
        reason: reason.to_string(),
    })
}

fn amount_mismatch(order: &Order, reported: &Money) -> Option<String> {
    if !reported.currency.eq_ignore_ascii_case(&order.currency) {
        return Some(format!(
            "gateway currency {} differs from order currency {}",
            reported.currency, order.currency
        ));
    }
    match reported.to_decimal() {
        Ok(value) if value == order.total_amount => None,
        Ok(value) => Some(format!(
            "gateway amount {} differs from order total {}",
            value, order.total_amount
        )),
        Err(_) => Some(format!("unparseable gateway amount {}", reported.amount)),
    }
}
