//! HTTP surface: router, shared state and the caller identity extractor

pub mod cart;
pub mod orders;
pub mod tickets;
pub mod webhooks;

use axum::{
    extract::{FromRequestParts, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::{error, info};
use uuid::Uuid;

use crate::database::CommerceStore;
use crate::error::{AppError, ValidationError};
use crate::health::{HealthChecker, HealthStatus};
use crate::middleware::error::{app_error_response, get_request_id_from_headers};
use crate::middleware::logging::{request_logging_middleware, UuidRequestId};
use crate::services::{CartService, CheckoutService, FulfillmentService, WebhookReconciler};

/// Opaque caller identity supplied by the fronting auth layer.
pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn CommerceStore>,
    pub cart: CartService,
    pub checkout: CheckoutService,
    pub reconciler: WebhookReconciler,
    pub fulfillment: FulfillmentService,
    pub health_checker: HealthChecker,
}

/// The `x-user-id` of the request; missing or malformed yields 401.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentUser(pub Uuid);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let request_id = get_request_id_from_headers(&parts.headers);
        let unauthenticated = |reason: &str| {
            app_error_response(
                AppError::validation(ValidationError::Unauthenticated {
                    reason: reason.to_string(),
                }),
                request_id.clone(),
            )
        };

        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| unauthenticated("missing x-user-id header"))?;

        Uuid::parse_str(raw.trim())
            .map(CurrentUser)
            .map_err(|_| unauthenticated("x-user-id is not a UUID"))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .route("/health/live", get(liveness))
        .route("/api/cart", get(cart::view_cart))
        .route("/api/cart/items", post(cart::add_item))
        .route("/api/cart/items/{line_id}", delete(cart::remove_item))
        .route(
            "/api/orders",
            post(orders::create_order).get(orders::list_orders),
        )
        .route("/api/orders/{id}", get(orders::get_order))
        .route("/api/orders/{id}/payment", post(orders::initiate_payment))
        .route("/api/orders/{id}/tickets", get(orders::order_tickets))
        .route("/api/tickets/{ticket_id}/scan", post(tickets::scan_ticket))
        .route(
            "/api/tickets/{ticket_id}/document",
            get(tickets::ticket_document),
        )
        .route("/webhooks/cashfree", post(webhooks::cashfree_webhook))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}

async fn root() -> &'static str {
    info!("📍 Root endpoint accessed");
    "Rural Sports commerce API"
}

async fn health(State(state): State<AppState>) -> Response {
    info!("🏥 Health check requested");
    let health_status: HealthStatus = state.health_checker.check_health().await;

    if health_status.is_healthy() {
        info!("✅ Health check passed");
        Json(health_status).into_response()
    } else {
        error!("❌ Health check failed - service unhealthy");
        (StatusCode::SERVICE_UNAVAILABLE, Json(health_status)).into_response()
    }
}

/// Readiness probe - storage must answer
async fn readiness(state: State<AppState>) -> Response {
    info!("🔍 Readiness probe requested");
    health(state).await
}

/// Liveness probe - the process is up
async fn liveness() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    #[tokio::test]
    async fn current_user_requires_uuid_header() {
        let (mut parts, _) = Request::builder()
            .header(USER_ID_HEADER, "not-a-uuid")
            .body(())
            .unwrap()
            .into_parts();
        let rejection = CurrentUser::from_request_parts(&mut parts, &())
            .await
            .unwrap_err();
        assert_eq!(rejection.status(), StatusCode::UNAUTHORIZED);

        let user = Uuid::new_v4();
        let (mut parts, _) = Request::builder()
            .header(USER_ID_HEADER, user.to_string())
            .body(())
            .unwrap()
            .into_parts();
        assert_eq!(
            CurrentUser::from_request_parts(&mut parts, &()).await.unwrap(),
            CurrentUser(user)
        );
    }
}
