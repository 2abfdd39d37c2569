//! Background reconciliation of orders the webhook never settled.
//!
//! Each cycle loads PENDING orders older than `check_after`, asks the gateway
//! for the remote status and feeds definitive outcomes through the same
//! [`WebhookReconciler::apply_transition`] path webhooks use. Orders past
//! `pending_ttl` that the gateway does not report as paid are expired to
//! FAILED, releasing their seat holds.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::PendingOrderMonitorConfig;
use crate::database::entities::Order;
use crate::database::repository::OrderRepository;
use crate::database::CommerceStore;
use crate::payments::types::GatewayOrderStatus;
use crate::payments::PaymentGateway;
use crate::services::reconciler::{
    OrderKey, PaymentTransition, PaymentVerdict, ReconcileOutcome, TransitionSource,
    WebhookReconciler,
};

const MAX_CONCURRENT_CHECKS: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("database error: {0}")]
    Database(#[from] crate::database::error::DatabaseError),

    #[error("gateway error: {0}")]
    Gateway(#[from] crate::payments::PaymentError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorAction {
    Confirmed,
    Failed,
    Expired,
    StillPending,
    Skipped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorCycleReport {
    pub examined: usize,
    pub confirmed: usize,
    pub failed: usize,
    pub expired: usize,
    pub still_pending: usize,
    pub errors: usize,
}

impl MonitorCycleReport {
    fn record(&mut self, result: &Result<MonitorAction, MonitorError>) {
        self.examined += 1;
        match result {
            Ok(MonitorAction::Confirmed) => self.confirmed += 1,
            Ok(MonitorAction::Failed) => self.failed += 1,
            Ok(MonitorAction::Expired) => self.expired += 1,
            Ok(MonitorAction::StillPending) | Ok(MonitorAction::Skipped) => {
                self.still_pending += 1
            }
            Err(_) => self.errors += 1,
        }
    }
}

pub struct PendingOrderMonitor {
    store: Arc<dyn CommerceStore>,
    gateway: Arc<dyn PaymentGateway>,
    reconciler: WebhookReconciler,
    config: PendingOrderMonitorConfig,
}

impl PendingOrderMonitor {
    pub fn new(
        store: Arc<dyn CommerceStore>,
        gateway: Arc<dyn PaymentGateway>,
        reconciler: WebhookReconciler,
        config: PendingOrderMonitorConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            reconciler,
            config,
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            check_after_secs = self.config.check_after.as_secs(),
            pending_ttl_secs = self.config.pending_ttl.as_secs(),
            batch_size = self.config.batch_size,
            "pending order monitor started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("pending order monitor stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    match self.run_cycle().await {
                        Ok(report) if report.examined > 0 => {
                            info!(
                                examined = report.examined,
                                confirmed = report.confirmed,
                                failed = report.failed,
                                expired = report.expired,
                                errors = report.errors,
                                "pending order monitor cycle finished"
                            );
                        }
                        Ok(_) => debug!("no stale pending orders"),
                        Err(e) => warn!(error = %e, "pending order monitor cycle failed"),
                    }
                }
            }
        }

        info!("pending order monitor stopped");
    }

    pub async fn run_cycle(&self) -> anyhow::Result<MonitorCycleReport> {
        let cutoff = Utc::now() - chrono::Duration::from_std(self.config.check_after)?;
        let stale = {
            let mut tx = self.store.begin().await?;
            let orders = tx
                .stale_pending_orders(cutoff, self.config.batch_size)
                .await?;
            orders
        };

        let results: Vec<Result<MonitorAction, MonitorError>> = stream::iter(stale)
            .map(|order| async move {
                let order_id = order.id;
                let result = self.check_order(order).await;
                if let Err(e) = &result {
                    warn!(order_id = %order_id, error = %e, "pending order check failed");
                }
                result
            })
            .buffer_unordered(MAX_CONCURRENT_CHECKS)
            .collect()
            .await;

        let mut report = MonitorCycleReport::default();
        for result in &results {
            report.record(result);
        }
        Ok(report)
    }

    async fn check_order(&self, order: Order) -> Result<MonitorAction, MonitorError> {
        if order.review_reason.is_some() {
            return Ok(MonitorAction::Skipped);
        }

        if let Some(gateway_order_id) = order.gateway_order_id.as_deref() {
            let remote = self.gateway.fetch_order(gateway_order_id).await?;
            let key = OrderKey::GatewayOrderId(gateway_order_id.to_string());

            match remote.status {
                GatewayOrderStatus::Paid => {
                    let outcome = self
                        .reconciler
                        .apply_transition(PaymentTransition {
                            order: key,
                            verdict: PaymentVerdict::Succeeded {
                                gateway_payment_id: remote.payment_id,
                                amount: remote.amount,
                            },
                            source: TransitionSource::StatusPoll,
                        })
                        .await?;
                    return Ok(action_for(outcome, MonitorAction::Confirmed));
                }
                GatewayOrderStatus::Expired | GatewayOrderStatus::Terminated => {
                    let outcome = self
                        .reconciler
                        .apply_transition(PaymentTransition {
                            order: key,
                            verdict: PaymentVerdict::Failed {
                                reason: format!("gateway order {:?}", remote.status),
                            },
                            source: TransitionSource::StatusPoll,
                        })
                        .await?;
                    return Ok(action_for(outcome, MonitorAction::Failed));
                }
                GatewayOrderStatus::Active | GatewayOrderStatus::Unknown => {}
            }
        }

        let age = Utc::now().signed_duration_since(order.created_at);
        let ttl = chrono::Duration::from_std(self.config.pending_ttl)
            .unwrap_or_else(|_| chrono::Duration::days(36_500));
        if age <= ttl {
            return Ok(MonitorAction::StillPending);
        }

        let outcome = self
            .reconciler
            .apply_transition(PaymentTransition {
                order: OrderKey::OrderId(order.id),
                verdict: PaymentVerdict::Failed {
                    reason: "pending order expired".to_string(),
                },
                source: TransitionSource::Expiry,
            })
            .await?;
        Ok(action_for(outcome, MonitorAction::Expired))
    }
}

fn action_for(outcome: ReconcileOutcome, applied: MonitorAction) -> MonitorAction {
    match outcome {
        ReconcileOutcome::Applied { .. } => applied,
        _ => MonitorAction::Skipped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_counts_each_result() {
        let mut report = MonitorCycleReport::default();
        report.record(&Ok(MonitorAction::Confirmed));
        report.record(&Ok(MonitorAction::Expired));
        report.record(&Ok(MonitorAction::StillPending));
        report.record(&Err(MonitorError::Database(
            crate::database::error::DatabaseError::invalid_data("x"),
        )));

        assert_eq!(report.examined, 4);
        assert_eq!(report.confirmed, 1);
        assert_eq!(report.expired, 1);
        assert_eq!(report.still_pending, 1);
        assert_eq!(report.errors, 1);
    }

    #[test]
    fn only_applied_outcomes_count_as_actions() {
        let applied = ReconcileOutcome::Applied {
            order_id: uuid::Uuid::new_v4(),
            state: crate::database::entities::PaymentState::Failed,
        };
        assert_eq!(action_for(applied, MonitorAction::Expired), MonitorAction::Expired);
        assert_eq!(
            action_for(ReconcileOutcome::Ping, MonitorAction::Expired),
            MonitorAction::Skipped
        );
    }
}
