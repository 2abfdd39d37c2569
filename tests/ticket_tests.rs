//! Ticket lifecycle after a confirmed booking: listing, export and gate scans

mod common;

use common::*;
use rural_sports_backend::error::{AppErrorKind, DomainError};
use rural_sports_backend::services::ticket_document::{parse_scan_payload, SCAN_PAYLOAD_PREFIX};
use rural_sports_backend::services::{CheckoutRequest, CustomerDetails, ScanResult, Selection};
use uuid::Uuid;

async fn confirmed_booking(h: &Harness, user: Uuid) -> Uuid {
    let event = h.store.seed_event("Bullock cart race", dec("75.00"), 40).await;
    let seat = h.store.seed_seat(event.id, "Pavilion", 3, 14).await;
    let order = h
        .checkout
        .create_pending_order(
            user,
            CheckoutRequest {
                selection: Selection::Seats {
                    event_id: event.id,
                    seat_ids: vec![seat.id],
                },
                customer: CustomerDetails::default(),
                address_id: None,
            },
        )
        .await
        .unwrap();
    let session = h.checkout.initiate_payment(user, order.id).await.unwrap();

    let body = success_payload(&session.gateway_order_id, "75.00");
    h.reconciler
        .handle_callback(&body, &signed_headers(&body))
        .await
        .unwrap();
    order.id
}

#[tokio::test]
async fn ticket_admits_once() {
    let h = Harness::new();
    let user = Uuid::new_v4();
    let order_id = confirmed_booking(&h, user).await;
    let tickets = h.fulfillment.tickets_for_order(user, order_id).await.unwrap();
    assert_eq!(tickets.len(), 1);
    let ticket_id = tickets[0].ticket_id;

    match h.fulfillment.scan_ticket(ticket_id).await.unwrap() {
        ScanResult::Valid { event, seat, .. } => {
            assert_eq!(event, "Bullock cart race");
            assert_eq!(seat.as_deref(), Some("Pavilion / row 3 / seat 14"));
        }
        other => panic!("expected VALID, got {:?}", other),
    }

    let second = h.fulfillment.scan_ticket(ticket_id).await.unwrap();
    assert_eq!(
        second,
        ScanResult::Invalid {
            reason: "already used".to_string()
        }
    );

    let stored = h.store.tickets(order_id).await;
    assert!(stored[0].used);
    assert!(stored[0].used_at.is_some());
}

#[tokio::test]
async fn unknown_ticket_scans_invalid() {
    let h = Harness::new();
    let result = h.fulfillment.scan_ticket(Uuid::new_v4()).await.unwrap();
    assert!(matches!(result, ScanResult::Invalid { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_scans_admit_exactly_one() {
    let h = Harness::new();
    let user = Uuid::new_v4();
    let order_id = confirmed_booking(&h, user).await;
    let ticket_id = h.store.tickets(order_id).await[0].ticket_id;

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let fulfillment = h.fulfillment.clone();
            tokio::spawn(async move { fulfillment.scan_ticket(ticket_id).await })
        })
        .collect();
    let mut valid = 0;
    for handle in handles {
        if matches!(handle.await.unwrap().unwrap(), ScanResult::Valid { .. }) {
            valid += 1;
        }
    }
    assert_eq!(valid, 1);
}

#[tokio::test]
async fn exported_document_carries_scan_payload() {
    let h = Harness::new();
    let (user, stranger) = users();
    let order_id = confirmed_booking(&h, user).await;
    let ticket_id = h.store.tickets(order_id).await[0].ticket_id;

    let document = h.fulfillment.export_ticket(user, ticket_id).await.unwrap();
    let text = document.render_text();
    assert!(text.contains("Bullock cart race"));
    assert!(text.contains(&format!("{}{}", SCAN_PAYLOAD_PREFIX, ticket_id)));
    assert_eq!(parse_scan_payload(&document.scan_payload), Some(ticket_id));

    let err = h
        .fulfillment
        .export_ticket(stranger, ticket_id)
        .await
        .unwrap_err();
    assert!(matches!(
        err.kind,
        AppErrorKind::Domain(DomainError::TicketNotFound { .. })
    ));

    let err = h
        .fulfillment
        .tickets_for_order(stranger, order_id)
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 404);
}
