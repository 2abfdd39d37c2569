//! Cart aggregation, pending order creation and payment initiation

mod common;

use common::*;
use rural_sports_backend::database::entities::{CatalogRef, OrderKind, PaymentState};
use rural_sports_backend::database::repository::OrderRepository;
use rural_sports_backend::database::CommerceStore;
use rural_sports_backend::error::{AppErrorKind, DomainError, ValidationError};
use rural_sports_backend::payments::PaymentError;
use rural_sports_backend::services::reconciler::{
    OrderKey, PaymentTransition, PaymentVerdict, TransitionSource,
};
use rural_sports_backend::services::{CheckoutRequest, CustomerDetails, Selection};
use uuid::Uuid;

fn request(selection: Selection) -> CheckoutRequest {
    CheckoutRequest {
        selection,
        customer: CustomerDetails {
            email: Some("ravi@example.com".to_string()),
            phone: None,
        },
        address_id: None,
    }
}

#[tokio::test]
async fn cart_merges_lines_and_prices_from_live_catalog() {
    let h = Harness::new();
    let user = Uuid::new_v4();
    let ball = h.store.seed_product("Football", dec("499.50"), 20).await;

    h.cart.add_item(user, CatalogRef::Product(ball.id), 1).await.unwrap();
    let merged = h.cart.add_item(user, CatalogRef::Product(ball.id), 2).await.unwrap();
    assert_eq!(merged.quantity, 3);

    let view = h.cart.view(user).await.unwrap();
    assert_eq!(view.lines.len(), 1);
    assert_eq!(view.total, dec("1498.50"));

    h.store.set_product_price(ball.id, dec("450.00")).await;
    let view = h.cart.view(user).await.unwrap();
    assert_eq!(view.lines[0].subtotal, dec("1350.00"));
}

#[tokio::test]
async fn cart_checkout_snapshots_prices_and_keeps_cart_until_paid() {
    let h = Harness::new();
    let user = Uuid::new_v4();
    let shirt = h.store.seed_product("Team jersey", dec("300.00"), 50).await;
    let event = h.store.seed_event("District kho-kho", dec("20.00"), 200).await;
    h.cart.add_item(user, CatalogRef::Product(shirt.id), 2).await.unwrap();
    h.cart.add_item(user, CatalogRef::Event(event.id), 1).await.unwrap();

    let order = h
        .checkout
        .create_pending_order(user, request(Selection::Cart))
        .await
        .unwrap();

    assert_eq!(order.kind, OrderKind::ProductOrder);
    assert!(order.from_cart);
    assert_eq!(order.payment_state, PaymentState::Pending);
    assert_eq!(order.total_amount, dec("620.00"));
    assert!(order.total_matches_items());
    assert_eq!(order.gateway_order_id, None);
    assert_eq!(h.store.cart(user).await.len(), 2);

    h.store.set_product_price(shirt.id, dec("1.00")).await;
    let stored = h.store.order(order.id).await.unwrap();
    assert_eq!(stored.total_amount, dec("620.00"));
}

#[tokio::test]
async fn empty_cart_and_zero_quantity_are_rejected() {
    let h = Harness::new();
    let user = Uuid::new_v4();

    let err = h
        .checkout
        .create_pending_order(user, request(Selection::Cart))
        .await
        .unwrap_err();
    assert!(matches!(
        err.kind,
        AppErrorKind::Domain(DomainError::EmptySelection { .. })
    ));
    assert_eq!(err.status_code(), 400);

    let product = h.store.seed_product("Shuttlecock tube", dec("80.00"), 5).await;
    let err = h
        .checkout
        .create_pending_order(
            user,
            request(Selection::BuyNow {
                item: CatalogRef::Product(product.id),
                quantity: 0,
            }),
        )
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 400);

    let err = h
        .cart
        .add_item(user, CatalogRef::Product(product.id), 0)
        .await
        .unwrap_err();
    assert!(matches!(
        err.kind,
        AppErrorKind::Validation(ValidationError::OutOfRange { .. })
    ));
}

#[tokio::test]
async fn buy_now_bypasses_cart_and_inactive_items_are_refused() {
    let h = Harness::new();
    let user = Uuid::new_v4();
    let racket = h.store.seed_product("Badminton racket", dec("750.00"), 3).await;
    let retired = h.store.seed_product("Old stumps", dec("90.00"), 3).await;
    h.store.set_product_active(retired.id, false).await;

    let order = h
        .checkout
        .create_pending_order(
            user,
            request(Selection::BuyNow {
                item: CatalogRef::Product(racket.id),
                quantity: 2,
            }),
        )
        .await
        .unwrap();
    assert!(!order.from_cart);
    assert_eq!(order.total_amount, dec("1500.00"));
    assert!(h.store.cart(user).await.is_empty());

    let err = h
        .checkout
        .create_pending_order(
            user,
            request(Selection::BuyNow {
                item: CatalogRef::Product(retired.id),
                quantity: 1,
            }),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err.kind,
        AppErrorKind::Domain(DomainError::CatalogItemNotFound { .. })
    ));
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn held_seat_cannot_be_booked_twice() {
    let h = Harness::new();
    let (first, second) = users();
    let event = h.store.seed_event("Wrestling dangal", dec("100.00"), 10).await;
    let seat = h.store.seed_seat(event.id, "East", 2, 7).await;

    let booking = h
        .checkout
        .create_pending_order(
            first,
            request(Selection::Seats {
                event_id: event.id,
                seat_ids: vec![seat.id, seat.id],
            }),
        )
        .await
        .unwrap();
    assert_eq!(booking.kind, OrderKind::EventBooking);
    assert_eq!(booking.seat_ids, vec![seat.id]);
    assert_eq!(booking.items[0].quantity, 1);
    assert_eq!(h.store.seat(seat.id).await.unwrap().held_by, Some(booking.id));

    let err = h
        .checkout
        .create_pending_order(
            second,
            request(Selection::Seats {
                event_id: event.id,
                seat_ids: vec![seat.id],
            }),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err.kind,
        AppErrorKind::Domain(DomainError::SeatUnavailable { seat_id }) if seat_id == seat.id
    ));
    assert_eq!(err.status_code(), 409);

    let store: &dyn CommerceStore = &h.store;
    let mut tx = store.begin().await.unwrap();
    assert!(tx.orders_for_user(second).await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_bookings_of_one_seat_admit_exactly_one() {
    let h = Harness::new();
    let event = h.store.seed_event("Volleyball league", dec("80.00"), 20).await;
    let seat = h.store.seed_seat(event.id, "Court side", 1, 1).await;

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let checkout = h.checkout.clone();
            let (event_id, seat_id) = (event.id, seat.id);
            tokio::spawn(async move {
                checkout
                    .create_pending_order(
                        Uuid::new_v4(),
                        request(Selection::Seats {
                            event_id,
                            seat_ids: vec![seat_id],
                        }),
                    )
                    .await
            })
        })
        .collect();

    let mut booked = Vec::new();
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(order) => booked.push(order),
            Err(err) => {
                assert!(matches!(
                    err.kind,
                    AppErrorKind::Domain(DomainError::SeatUnavailable { seat_id }) if seat_id == seat.id
                ));
                rejected += 1;
            }
        }
    }
    assert_eq!((booked.len(), rejected), (1, 5));
    assert_eq!(h.store.seat(seat.id).await.unwrap().held_by, Some(booked[0].id));
}

#[tokio::test]
async fn line_quantities_are_bounded() {
    let h = Harness::new();
    let user = Uuid::new_v4();
    let bat = h.store.seed_product("Tennis ball cricket bat", dec("350.00"), 500).await;

    let err = h
        .cart
        .add_item(user, CatalogRef::Product(bat.id), i32::MAX)
        .await
        .unwrap_err();
    assert!(matches!(
        err.kind,
        AppErrorKind::Validation(ValidationError::OutOfRange { .. })
    ));
    assert_eq!(err.status_code(), 400);

    h.cart.add_item(user, CatalogRef::Product(bat.id), 60).await.unwrap();
    let err = h
        .cart
        .add_item(user, CatalogRef::Product(bat.id), 60)
        .await
        .unwrap_err();
    assert!(matches!(
        err.kind,
        AppErrorKind::Validation(ValidationError::OutOfRange { .. })
    ));
    assert_eq!(h.store.cart(user).await[0].quantity, 60);

    let err = h
        .checkout
        .create_pending_order(
            user,
            request(Selection::BuyNow {
                item: CatalogRef::Product(bat.id),
                quantity: 101,
            }),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err.kind,
        AppErrorKind::Validation(ValidationError::OutOfRange { .. })
    ));
}

#[tokio::test]
async fn seat_from_another_event_is_an_invalid_line() {
    let h = Harness::new();
    let user = Uuid::new_v4();
    let final_match = h.store.seed_event("Final", dec("100.00"), 10).await;
    let semi = h.store.seed_event("Semi final", dec("60.00"), 10).await;
    let semi_seat = h.store.seed_seat(semi.id, "West", 1, 1).await;

    let err = h
        .checkout
        .create_pending_order(
            user,
            request(Selection::Seats {
                event_id: final_match.id,
                seat_ids: vec![semi_seat.id],
            }),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err.kind,
        AppErrorKind::Domain(DomainError::InvalidLineItem { .. })
    ));
}

#[tokio::test]
async fn foreign_address_is_rejected() {
    let h = Harness::new();
    let (user, stranger) = users();
    let product = h.store.seed_product("Volleyball net", dec("1200.00"), 4).await;
    let address = h.store.seed_address(stranger, "Someone Else").await;

    let mut req = request(Selection::BuyNow {
        item: CatalogRef::Product(product.id),
        quantity: 1,
    });
    req.address_id = Some(address.id);

    let err = h.checkout.create_pending_order(user, req).await.unwrap_err();
    assert!(matches!(
        err.kind,
        AppErrorKind::Validation(ValidationError::MissingField { ref field }) if field == "address_id"
    ));
}

#[tokio::test]
async fn initiate_payment_mints_id_once_and_reuses_session() {
    let h = Harness::new();
    let user = Uuid::new_v4();
    let product = h.store.seed_product("Carrom board", dec("1999.00"), 2).await;
    let order = h
        .checkout
        .create_pending_order(
            user,
            request(Selection::BuyNow {
                item: CatalogRef::Product(product.id),
                quantity: 1,
            }),
        )
        .await
        .unwrap();

    let first = h.checkout.initiate_payment(user, order.id).await.unwrap();
    let second = h.checkout.initiate_payment(user, order.id).await.unwrap();

    assert_eq!(first.gateway_order_id, second.gateway_order_id);
    assert_eq!(first.session_id, second.session_id);
    assert_eq!(h.gateway.session_count(), 1);

    let sent = h.gateway.last_request.lock().unwrap().clone().unwrap();
    assert_eq!(sent.amount.amount, "1999.00");
    assert_eq!(sent.amount.currency, "INR");
    assert_eq!(sent.customer.customer_id, user.simple().to_string());
    assert_eq!(sent.customer.email.as_deref(), Some("ravi@example.com"));

    let stored = h.store.order(order.id).await.unwrap();
    assert_eq!(stored.gateway_order_id.as_deref(), Some(first.gateway_order_id.as_str()));
    assert_eq!(stored.payment_session_id.as_deref(), Some(first.session_id.as_str()));

    let again = h.checkout.assign_gateway_order_id(order.id).await.unwrap();
    assert_eq!(again, first.gateway_order_id);
}

#[tokio::test]
async fn gateway_failure_keeps_order_pending_and_conflict_recovers_session() {
    let h = Harness::new();
    let user = Uuid::new_v4();
    let product = h.store.seed_product("Skipping rope", dec("120.00"), 9).await;
    let order = h
        .checkout
        .create_pending_order(
            user,
            request(Selection::BuyNow {
                item: CatalogRef::Product(product.id),
                quantity: 1,
            }),
        )
        .await
        .unwrap();

    h.gateway.fail_next_session(PaymentError::NetworkError {
        message: "connection reset".to_string(),
    });
    let err = h.checkout.initiate_payment(user, order.id).await.unwrap_err();
    assert_eq!(err.status_code(), 502);

    let stored = h.store.order(order.id).await.unwrap();
    assert_eq!(stored.payment_state, PaymentState::Pending);
    let gateway_order_id = stored.gateway_order_id.unwrap();
    assert_eq!(stored.payment_session_id, None);

    // The remote order was in fact created before the connection dropped.
    h.gateway.set_remote(
        &gateway_order_id,
        rural_sports_backend::payments::types::GatewayOrderStatus::Active,
        None,
    );
    h.gateway.fail_next_session(PaymentError::Conflict {
        message: "order_id already exists".to_string(),
    });

    let session = h.checkout.initiate_payment(user, order.id).await.unwrap();
    assert_eq!(session.gateway_order_id, gateway_order_id);
    assert_eq!(session.session_id, format!("session_{}", gateway_order_id));
}

#[tokio::test]
async fn payment_is_refused_for_strangers_and_settled_orders() {
    let h = Harness::new();
    let (user, stranger) = users();
    let product = h.store.seed_product("Hockey stick", dec("640.00"), 6).await;
    let order = h
        .checkout
        .create_pending_order(
            user,
            request(Selection::BuyNow {
                item: CatalogRef::Product(product.id),
                quantity: 1,
            }),
        )
        .await
        .unwrap();

    let err = h.checkout.initiate_payment(stranger, order.id).await.unwrap_err();
    assert!(matches!(
        err.kind,
        AppErrorKind::Domain(DomainError::OrderNotFound { .. })
    ));

    h.reconciler
        .apply_transition(PaymentTransition {
            order: OrderKey::OrderId(order.id),
            verdict: PaymentVerdict::Failed {
                reason: "user dropped".to_string(),
            },
            source: TransitionSource::StatusPoll,
        })
        .await
        .unwrap();

    let err = h.checkout.initiate_payment(user, order.id).await.unwrap_err();
    assert!(matches!(
        err.kind,
        AppErrorKind::Domain(DomainError::OrderNotPayable { .. })
    ));
    assert_eq!(err.status_code(), 409);
}
