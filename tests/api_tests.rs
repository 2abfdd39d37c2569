//! End-to-end HTTP flows through the router

mod common;

use axum::{body::Body, Router};
use common::*;
use http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::util::ServiceExt;
use uuid::Uuid;

use rural_sports_backend::api::{router, USER_ID_HEADER};
use rural_sports_backend::payments::providers::cashfree::{SIGNATURE_HEADER, TIMESTAMP_HEADER};

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).to_string()))
    };
    (status, json)
}

fn as_user(method: &str, uri: &str, user: Uuid, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(USER_ID_HEADER, user.to_string());
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

fn webhook(body: Vec<u8>, signed: bool) -> Request<Body> {
    let headers = signed_headers(&body);
    let mut builder = Request::builder()
        .method("POST")
        .uri("/webhooks/cashfree")
        .header("content-type", "application/json")
        .header(TIMESTAMP_HEADER, headers.timestamp.unwrap());
    builder = if signed {
        builder.header(SIGNATURE_HEADER, headers.signature.unwrap())
    } else {
        builder.header(SIGNATURE_HEADER, "Zm9yZ2Vk")
    };
    builder.body(Body::from(body)).unwrap()
}

#[tokio::test]
async fn health_reports_storage_backend() {
    let h = Harness::new();
    let app = router(h.app_state());

    let (status, body) = send(
        &app,
        Request::builder().uri("/health").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["checks"]["storage:memory"].is_object());

    let (status, _) = send(
        &app,
        Request::builder().uri("/health/live").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn requests_without_identity_are_unauthorized() {
    let h = Harness::new();
    let app = router(h.app_state());

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/api/cart").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key("x-request-id"));

    let (status, _) = send(
        &app,
        Request::builder()
            .uri("/api/orders")
            .header(USER_ID_HEADER, "guest")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn cart_to_paid_order_over_http() {
    let h = Harness::new();
    let app = router(h.app_state());
    let (user, stranger) = users();
    let product = h.store.seed_product("Cricket ball", dec("125.00"), 30).await;

    let (status, line) = send(
        &app,
        as_user(
            "POST",
            "/api/cart/items",
            user,
            Some(json!({ "catalog_ref": { "product": product.id }, "quantity": 4 })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(line["quantity"], 4);

    let (status, cart) = send(&app, as_user("GET", "/api/cart", user, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cart["lines"].as_array().unwrap().len(), 1);

    let (status, order) = send(
        &app,
        as_user(
            "POST",
            "/api/orders",
            user,
            Some(json!({ "selection": { "type": "cart" }, "customer": { "email": "kiran@example.com" } })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(order["payment_state"], "PENDING");
    let order_id = order["id"].as_str().unwrap().to_string();

    let (status, session) = send(
        &app,
        as_user("POST", &format!("/api/orders/{}/payment", order_id), user, None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let gateway_order_id = session["gateway_order_id"].as_str().unwrap().to_string();
    assert!(session["session_id"].as_str().is_some());

    let (status, outcome) = send(&app, webhook(success_payload(&gateway_order_id, "500.00"), true)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["status"], "applied");
    assert_eq!(outcome["state"], "SUCCESSFUL");

    let (status, replay) = send(&app, webhook(success_payload(&gateway_order_id, "500.00"), true)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(replay["status"], "already_processed");

    let (_, paid) = send(&app, as_user("GET", &format!("/api/orders/{}", order_id), user, None)).await;
    assert_eq!(paid["payment_state"], "SUCCESSFUL");
    assert_eq!(paid["fulfillment_state"], "FULFILLED");

    let (_, orders) = send(&app, as_user("GET", "/api/orders", user, None)).await;
    assert_eq!(orders.as_array().unwrap().len(), 1);

    let (_, cart) = send(&app, as_user("GET", "/api/cart", user, None)).await;
    assert!(cart["lines"].as_array().unwrap().is_empty());

    let (status, _) = send(
        &app,
        as_user("GET", &format!("/api/orders/{}", order_id), stranger, None),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn forged_webhook_is_rejected() {
    let h = Harness::new();
    let app = router(h.app_state());

    let (status, body) = send(&app, webhook(success_payload("store_x", "1.00"), false)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["status"], "error");
    assert_eq!(body["area"], "reconcile");
    assert_eq!(body["redeliver"], false);

    let garbage = b"not-json".to_vec();
    let (status, _) = send(&app, webhook(garbage, true)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn removing_cart_lines() {
    let h = Harness::new();
    let app = router(h.app_state());
    let user = Uuid::new_v4();
    let product = h.store.seed_product("Kabaddi mat", dec("2400.00"), 2).await;

    let (_, line) = send(
        &app,
        as_user(
            "POST",
            "/api/cart/items",
            user,
            Some(json!({ "catalog_ref": { "product": product.id } })),
        ),
    )
    .await;
    let line_id = line["id"].as_i64().unwrap();

    let (status, _) = send(
        &app,
        as_user("DELETE", &format!("/api/cart/items/{}", line_id), user, None),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(
        &app,
        as_user("DELETE", &format!("/api/cart/items/{}", line_id), user, None),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "CART_LINE_NOT_FOUND");
    assert_eq!(body["area"], "cart");
    assert!(body["message"].is_string());
}

#[tokio::test]
async fn booking_tickets_scan_and_document_over_http() {
    let h = Harness::new();
    let app = router(h.app_state());
    let user = Uuid::new_v4();
    let event = h.store.seed_event("Marathon", dec("60.00"), 300).await;
    let seat_a = h.store.seed_seat(event.id, "Start line", 1, 1).await;
    let seat_b = h.store.seed_seat(event.id, "Start line", 1, 2).await;

    let (status, order) = send(
        &app,
        as_user(
            "POST",
            "/api/orders",
            user,
            Some(json!({
                "selection": { "type": "seats", "event_id": event.id, "seat_ids": [seat_a.id, seat_b.id] }
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(order["kind"], "EVENT_BOOKING");
    let order_id = order["id"].as_str().unwrap().to_string();

    let (status, _) = send(
        &app,
        as_user(
            "POST",
            "/api/orders",
            Uuid::new_v4(),
            Some(json!({
                "selection": { "type": "seats", "event_id": event.id, "seat_ids": [seat_b.id] }
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, session) = send(
        &app,
        as_user("POST", &format!("/api/orders/{}/payment", order_id), user, None),
    )
    .await;
    let gateway_order_id = session["gateway_order_id"].as_str().unwrap().to_string();
    let (status, _) = send(&app, webhook(success_payload(&gateway_order_id, "120.00"), true)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, tickets) = send(
        &app,
        as_user("GET", &format!("/api/orders/{}/tickets", order_id), user, None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let tickets = tickets.as_array().unwrap().clone();
    assert_eq!(tickets.len(), 2);
    let ticket_id = tickets[0]["ticket_id"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(as_user(
            "GET",
            &format!("/api/tickets/{}/document", ticket_id),
            user,
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/plain"));

    let scan = |payload: String| {
        Request::builder()
            .method("POST")
            .uri(format!("/api/tickets/{}/scan", payload))
            .body(Body::empty())
            .unwrap()
    };
    let (_, first) = send(&app, scan(format!("TICKET:{}", ticket_id))).await;
    assert_eq!(first["result"], "VALID");
    let (_, second) = send(&app, scan(ticket_id.clone())).await;
    assert_eq!(second["result"], "INVALID");
    let (status, junk) = send(&app, scan("not-a-ticket".to_string())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(junk["result"], "INVALID");
}
