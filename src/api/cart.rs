use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;

use super::{AppState, CurrentUser};
use crate::database::entities::CatalogRef;
use crate::error::{AppError, DomainError};
use crate::middleware::error::{app_error_response, get_request_id_from_headers};

#[derive(Debug, Deserialize)]
pub struct AddCartItemRequest {
    pub catalog_ref: CatalogRef,
    #[serde(default = "default_quantity")]
    pub quantity: i32,
}

fn default_quantity() -> i32 {
    1
}

/// GET /api/cart
pub async fn view_cart(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    headers: HeaderMap,
) -> Response {
    match state.cart.view(user_id).await {
        Ok(view) => Json(view).into_response(),
        Err(e) => app_error_response(e, get_request_id_from_headers(&headers)),
    }
}

/// POST /api/cart/items
pub async fn add_item(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    headers: HeaderMap,
    Json(request): Json<AddCartItemRequest>,
) -> Response {
    match state
        .cart
        .add_item(user_id, request.catalog_ref, request.quantity)
        .await
    {
        Ok(line) => (StatusCode::CREATED, Json(line)).into_response(),
        Err(e) => app_error_response(e, get_request_id_from_headers(&headers)),
    }
}

/// DELETE /api/cart/items/{line_id}
pub async fn remove_item(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(line_id): Path<i64>,
    headers: HeaderMap,
) -> Response {
    let request_id = get_request_id_from_headers(&headers);
    match state.cart.remove_item(user_id, line_id).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => app_error_response(
            AppError::domain(DomainError::CartLineNotFound { line_id }),
            request_id,
        ),
        Err(e) => app_error_response(e, request_id),
    }
}
