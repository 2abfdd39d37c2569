//! Fulfillment: tickets and shipping snapshots for paid orders, plus ticket
//! scanning and export.
//!
//! [`FulfillmentEmitter::fulfill`] only ever runs inside the reconciliation
//! transaction. Every write it makes is get-or-create, so running it twice for
//! the same order issues nothing new.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::database::entities::{Order, ShippingSnapshot, Ticket, TicketClaim};
use crate::database::error::DatabaseError;
use crate::database::repository::{
    CatalogRepository, DbResult, FulfillmentRepository, OrderRepository,
};
use crate::database::{CommerceStore, StoreTransaction};
use crate::error::{AppError, AppResult, DomainError};
use crate::services::ticket_document::TicketDocument;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FulfillmentReport {
    /// All tickets of the order, new and previously issued
    pub tickets: Vec<Ticket>,
    pub tickets_issued: usize,
    pub shipping: Option<ShippingSnapshot>,
    pub shipping_created: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FulfillmentEmitter;

impl FulfillmentEmitter {
    pub fn new() -> Self {
        Self
    }

    pub async fn fulfill(
        &self,
        tx: &mut dyn StoreTransaction,
        order: &Order,
    ) -> DbResult<FulfillmentReport> {
        let mut report = FulfillmentReport::default();

        let seats = if order.seat_ids.is_empty() {
            Vec::new()
        } else {
            tx.find_seats(&order.seat_ids).await?
        };
        if seats.len() != order.seat_ids.len() {
            return Err(DatabaseError::invalid_data(format!(
                "order {} references {} seats but {} exist",
                order.id,
                order.seat_ids.len(),
                seats.len()
            )));
        }

        let mut seated_per_event: HashMap<i64, i32> = HashMap::new();
        for seat in &seats {
            *seated_per_event.entry(seat.event_id).or_default() += 1;
            let claim = TicketClaim {
                order_id: order.id,
                user_id: order.user_id,
                event_id: seat.event_id,
                seat_id: Some(seat.id),
                admission_no: 0,
            };
            self.claim(tx, claim, &mut report).await?;
        }

        // Event lines not covered by a seat are general admission.
        for item in &order.items {
            let Some(event_id) = item.event_id else {
                continue;
            };
            let seated = seated_per_event.get(&event_id).copied().unwrap_or(0);
            for admission_no in 0..(item.quantity - seated).max(0) {
                let claim = TicketClaim {
                    order_id: order.id,
                    user_id: order.user_id,
                    event_id,
                    seat_id: None,
                    admission_no,
                };
                self.claim(tx, claim, &mut report).await?;
            }
        }

        let ships_goods = order.items.iter().any(|item| item.product_id.is_some());
        if ships_goods {
            self.snapshot_address(tx, order, &mut report).await?;
        }

        info!(
            order_id = %order.id,
            tickets = report.tickets.len(),
            tickets_issued = report.tickets_issued,
            shipping_created = report.shipping_created,
            "Fulfillment emitted"
        );
        Ok(report)
    }

    async fn claim(
        &self,
        tx: &mut dyn StoreTransaction,
        claim: TicketClaim,
        report: &mut FulfillmentReport,
    ) -> DbResult<()> {
        let (ticket, created) = tx.claim_ticket(claim).await?;
        if created {
            report.tickets_issued += 1;
        }
        report.tickets.push(ticket);
        Ok(())
    }

    async fn snapshot_address(
        &self,
        tx: &mut dyn StoreTransaction,
        order: &Order,
        report: &mut FulfillmentReport,
    ) -> DbResult<()> {
        if let Some(existing) = tx.shipping_snapshot(order.id).await? {
            report.shipping = Some(existing);
            return Ok(());
        }

        let Some(address_id) = order.address_id else {
            warn!(order_id = %order.id, "Product order has no shipping address");
            return Ok(());
        };

        match tx.find_address(address_id).await? {
            Some(address) => {
                let snapshot = tx
                    .insert_shipping_snapshot(ShippingSnapshot::from_address(order.id, &address))
                    .await?;
                report.shipping = Some(snapshot);
                report.shipping_created = true;
            }
            None => {
                warn!(order_id = %order.id, address_id, "Shipping address no longer exists");
            }
        }
        Ok(())
    }
}

/// Outcome of presenting a ticket at the gate.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "result", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanResult {
    Valid {
        ticket_id: Uuid,
        event: String,
        seat: Option<String>,
    },
    Invalid {
        reason: String,
    },
}

#[derive(Clone)]
pub struct FulfillmentService {
    store: Arc<dyn CommerceStore>,
}

impl FulfillmentService {
    pub fn new(store: Arc<dyn CommerceStore>) -> Self {
        Self { store }
    }

    /// One-shot consumption under the ticket's row lock.
    pub async fn scan_ticket(&self, ticket_id: Uuid) -> AppResult<ScanResult> {
        let mut tx = self.store.begin().await?;

        let Some(ticket) = tx.lock_ticket(ticket_id).await? else {
            return Ok(ScanResult::Invalid {
                reason: "unknown ticket".to_string(),
            });
        };
        if ticket.used {
            info!(ticket_id = %ticket_id, "Rejected scan of used ticket");
            return Ok(ScanResult::Invalid {
                reason: "already used".to_string(),
            });
        }

        if !tx.mark_ticket_used(ticket_id, chrono::Utc::now()).await? {
            return Ok(ScanResult::Invalid {
                reason: "already used".to_string(),
            });
        }

        let event = tx.find_event(ticket.event_id).await?;
        let seat = match ticket.seat_id {
            Some(seat_id) => tx.find_seats(&[seat_id]).await?.into_iter().next(),
            None => None,
        };
        tx.commit().await?;

        info!(ticket_id = %ticket_id, event_id = ticket.event_id, "✅ Ticket admitted");
        Ok(ScanResult::Valid {
            ticket_id,
            event: event
                .map(|e| e.name)
                .unwrap_or_else(|| format!("event {}", ticket.event_id)),
            seat: seat.map(|s| s.label()),
        })
    }

    pub async fn export_ticket(&self, user_id: Uuid, ticket_id: Uuid) -> AppResult<TicketDocument> {
        let mut tx = self.store.begin().await?;
        let not_found = || {
            AppError::domain(DomainError::TicketNotFound {
                ticket_id: ticket_id.to_string(),
            })
        };

        let ticket = tx
            .find_ticket(ticket_id)
            .await?
            .filter(|t| t.user_id == user_id)
            .ok_or_else(not_found)?;
        let event = tx.find_event(ticket.event_id).await?.ok_or_else(not_found)?;
        let seat = match ticket.seat_id {
            Some(seat_id) => tx.find_seats(&[seat_id]).await?.into_iter().next(),
            None => None,
        };

        Ok(TicketDocument::new(&ticket, &event, seat.as_ref()))
    }

    pub async fn tickets_for_order(&self, user_id: Uuid, order_id: Uuid) -> AppResult<Vec<Ticket>> {
        let mut tx = self.store.begin().await?;
        let order = tx
            .find_order(order_id)
            .await?
            .filter(|o| o.user_id == user_id)
            .ok_or_else(|| {
                AppError::domain(DomainError::OrderNotFound {
                    order_id: order_id.to_string(),
                })
            })?;
        let tickets = tx.tickets_for_order(order.id).await?;
        Ok(tickets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::entities::{CatalogRef, NewOrder, NewOrderItem, OrderKind};
    use crate::database::MemoryStore;
    use bigdecimal::BigDecimal;

    async fn seeded_booking(store: &MemoryStore) -> Order {
        let event = store.seed_event("Cup Final", BigDecimal::from(50), 100).await;
        let a = store.seed_seat(event.id, "East", 1, 1).await;
        let b = store.seed_seat(event.id, "East", 1, 2).await;

        let mut tx = store.begin().await.unwrap();
        let order = tx
            .insert_order(NewOrder {
                user_id: Uuid::new_v4(),
                kind: OrderKind::EventBooking,
                from_cart: false,
                currency: "INR".to_string(),
                items: vec![NewOrderItem {
                    reference: CatalogRef::Event(event.id),
                    quantity: 2,
                    unit_price: BigDecimal::from(50),
                }],
                seat_ids: vec![a.id, b.id],
                address_id: None,
                customer_email: None,
                customer_phone: None,
            })
            .await
            .unwrap();
        tx.commit().await.unwrap();
        order
    }

    #[tokio::test]
    async fn fulfill_twice_issues_one_ticket_per_seat() {
        let store = MemoryStore::new();
        let order = seeded_booking(&store).await;
        let emitter = FulfillmentEmitter::new();

        let mut tx = store.begin().await.unwrap();
        let first = emitter.fulfill(tx.as_mut(), &order).await.unwrap();
        let second = emitter.fulfill(tx.as_mut(), &order).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(first.tickets_issued, 2);
        assert_eq!(second.tickets_issued, 0);
        assert_eq!(first.tickets, second.tickets);
        assert_eq!(store.tickets(order.id).await.len(), 2);
    }

    #[tokio::test]
    async fn scan_is_single_use() {
        let store = MemoryStore::new();
        let order = seeded_booking(&store).await;
        let mut tx = store.begin().await.unwrap();
        let report = FulfillmentEmitter::new()
            .fulfill(tx.as_mut(), &order)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let service = FulfillmentService::new(Arc::new(store.clone()));
        let ticket_id = report.tickets[0].ticket_id;

        let first = service.scan_ticket(ticket_id).await.unwrap();
        assert!(matches!(first, ScanResult::Valid { ref seat, .. } if seat.is_some()));
        let second = service.scan_ticket(ticket_id).await.unwrap();
        assert!(matches!(second, ScanResult::Invalid { .. }));
    }

    #[tokio::test]
    async fn export_hides_other_users_tickets() {
        let store = MemoryStore::new();
        let order = seeded_booking(&store).await;
        let mut tx = store.begin().await.unwrap();
        let report = FulfillmentEmitter::new()
            .fulfill(tx.as_mut(), &order)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let service = FulfillmentService::new(Arc::new(store.clone()));
        let ticket_id = report.tickets[0].ticket_id;

        let doc = service.export_ticket(order.user_id, ticket_id).await.unwrap();
        assert_eq!(doc.event_name, "Cup Final");
        assert_eq!(doc.scan_payload, format!("TICKET:{}", ticket_id));

        let err = service
            .export_ticket(Uuid::new_v4(), ticket_id)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 404);
    }
}
