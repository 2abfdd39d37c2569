use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tracing::info;
use uuid::Uuid;

use super::{AppState, CurrentUser};
use crate::database::entities::Order;
use crate::database::repository::OrderRepository;
use crate::error::{AppError, AppResult, DomainError};
use crate::middleware::error::{app_error_response, get_request_id_from_headers};
use crate::services::CheckoutRequest;

/// POST /api/orders
pub async fn create_order(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    headers: HeaderMap,
    Json(request): Json<CheckoutRequest>,
) -> Response {
    match state.checkout.create_pending_order(user_id, request).await {
        Ok(order) => {
            info!(order_id = %order.id, kind = order.kind.as_str(), "🧾 Pending order created");
            (StatusCode::CREATED, Json(order)).into_response()
        }
        Err(e) => app_error_response(e, get_request_id_from_headers(&headers)),
    }
}

/// GET /api/orders
pub async fn list_orders(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    headers: HeaderMap,
) -> Response {
    match user_orders(&state, user_id).await {
        Ok(orders) => Json(orders).into_response(),
        Err(e) => app_error_response(e, get_request_id_from_headers(&headers)),
    }
}

/// GET /api/orders/{id}
pub async fn get_order(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(order_id): Path<Uuid>,
    headers: HeaderMap,
) -> Response {
    match owned_order(&state, user_id, order_id).await {
        Ok(order) => Json(order).into_response(),
        Err(e) => app_error_response(e, get_request_id_from_headers(&headers)),
    }
}

/// POST /api/orders/{id}/payment
pub async fn initiate_payment(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(order_id): Path<Uuid>,
    headers: HeaderMap,
) -> Response {
    match state.checkout.initiate_payment(user_id, order_id).await {
        Ok(session) => Json(session).into_response(),
        Err(e) => app_error_response(e, get_request_id_from_headers(&headers)),
    }
}

/// GET /api/orders/{id}/tickets
pub async fn order_tickets(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(order_id): Path<Uuid>,
    headers: HeaderMap,
) -> Response {
    match state.fulfillment.tickets_for_order(user_id, order_id).await {
        Ok(tickets) => Json(tickets).into_response(),
        Err(e) => app_error_response(e, get_request_id_from_headers(&headers)),
    }
}

async fn user_orders(state: &AppState, user_id: Uuid) -> AppResult<Vec<Order>> {
    let mut tx = state.store.begin().await?;
    let orders = tx.orders_for_user(user_id).await?;
    Ok(orders)
}

/// Another user's order reads as missing.
async fn owned_order(state: &AppState, user_id: Uuid, order_id: Uuid) -> AppResult<Order> {
    let mut tx = state.store.begin().await?;
    let order = tx.find_order(order_id).await?;
    order
        .filter(|order| order.user_id == user_id)
        .ok_or_else(|| {
            AppError::domain(DomainError::OrderNotFound {
                order_id: order_id.to_string(),
            })
        })
}
