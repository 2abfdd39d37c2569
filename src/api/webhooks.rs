use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tracing::info;

use super::AppState;
use crate::middleware::error::webhook_error_response;
use crate::payments::providers::cashfree::{SIGNATURE_HEADER, TIMESTAMP_HEADER};
use crate::services::WebhookHeaders;

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// POST /webhooks/cashfree
///
/// The raw body is handed over untouched; the signature covers its exact bytes.
pub async fn cashfree_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    info!(bytes = body.len(), "Received Cashfree webhook");

    let webhook_headers = WebhookHeaders {
        signature: header_value(&headers, SIGNATURE_HEADER),
        timestamp: header_value(&headers, TIMESTAMP_HEADER),
    };

    match state.reconciler.handle_callback(&body, &webhook_headers).await {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(e) => webhook_error_response(&e),
    }
}
