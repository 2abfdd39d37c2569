//! JSON error bodies for the storefront, booking and webhook routes
//!
//! Every rejection carries the area of the shop it came from so support can
//! tell a sold-out seat from a gateway outage without reading server logs.

use crate::error::{
    AppError, AppErrorKind, DomainError, ErrorCode, InfrastructureError, ValidationError,
};
use crate::services::ReconcileError;
use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Part of the shop an error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorArea {
    Cart,
    Checkout,
    Orders,
    Ticketing,
    Auth,
    Request,
    Storage,
    Configuration,
    Gateway,
    Reconcile,
}

impl ErrorArea {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorArea::Cart => "cart",
            ErrorArea::Checkout => "checkout",
            ErrorArea::Orders => "orders",
            ErrorArea::Ticketing => "ticketing",
            ErrorArea::Auth => "auth",
            ErrorArea::Request => "request",
            ErrorArea::Storage => "storage",
            ErrorArea::Configuration => "configuration",
            ErrorArea::Gateway => "gateway",
            ErrorArea::Reconcile => "reconcile",
        }
    }

    pub fn of(error: &AppError) -> Self {
        match &error.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::CatalogItemNotFound { .. } | DomainError::CartLineNotFound { .. } => {
                    ErrorArea::Cart
                }
                DomainError::EmptySelection { .. }
                | DomainError::InvalidLineItem { .. }
                | DomainError::OrderNotPayable { .. }
                | DomainError::SeatUnavailable { .. } => ErrorArea::Checkout,
                DomainError::OrderNotFound { .. } => ErrorArea::Orders,
                DomainError::TicketNotFound { .. } => ErrorArea::Ticketing,
            },
            AppErrorKind::Validation(ValidationError::Unauthenticated { .. }) => ErrorArea::Auth,
            AppErrorKind::Validation(_) => ErrorArea::Request,
            AppErrorKind::Infrastructure(InfrastructureError::Database { .. }) => {
                ErrorArea::Storage
            }
            AppErrorKind::Infrastructure(InfrastructureError::Configuration { .. }) => {
                ErrorArea::Configuration
            }
            AppErrorKind::External(_) => ErrorArea::Gateway,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorCode,
    pub area: ErrorArea,
    pub message: String,
    pub request_id: Option<String>,
    pub timestamp: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,

    /// Set when resubmitting the same request may succeed (gateway or storage hiccup)
    pub retryable: bool,
}

impl ErrorResponse {
    pub fn from_app_error(error: &AppError) -> Self {
        Self {
            error: error.error_code(),
            area: ErrorArea::of(error),
            message: error.user_message(),
            request_id: error.request_id.clone(),
            timestamp: Utc::now().to_rfc3339(),
            details: error
                .context
                .as_ref()
                .map(|context| serde_json::json!({ "context": context })),
            retryable: error.is_retryable(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status_code =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse::from_app_error(&self);

        match body.area {
            _ if status_code.is_server_error() => tracing::error!(
                area = body.area.as_str(),
                code = ?body.error,
                request_id = ?body.request_id,
                status = status_code.as_u16(),
                error = ?self.kind,
                "🔴 {} request failed",
                body.area.as_str()
            ),
            ErrorArea::Checkout => tracing::warn!(
                code = ?body.error,
                request_id = ?body.request_id,
                status = status_code.as_u16(),
                "🛒 Checkout rejected: {}",
                body.message
            ),
            ErrorArea::Auth => tracing::debug!(
                request_id = ?body.request_id,
                "Request without a usable x-user-id"
            ),
            area => tracing::info!(
                area = area.as_str(),
                code = ?body.error,
                request_id = ?body.request_id,
                status = status_code.as_u16(),
                "{}",
                body.message
            ),
        }

        (status_code, Json(body)).into_response()
    }
}

pub fn get_request_id_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Attaches the request id (if any) before rendering the error.
pub fn app_error_response(error: AppError, request_id: Option<String>) -> Response {
    match request_id {
        Some(id) => error.with_request_id(id).into_response(),
        None => error.into_response(),
    }
}

/// Rejection sent back to Cashfree. Only storage failures are 5xx, which makes
/// Cashfree redeliver; forged or unreadable deliveries are dropped with a 4xx.
pub fn webhook_error_response(error: &ReconcileError) -> Response {
    let status =
        StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    match error {
        ReconcileError::InvalidSignature(_) => {
            tracing::warn!(area = "reconcile", error = %error, "🚫 Rejected webhook signature")
        }
        ReconcileError::InvalidPayload(_) => {
            tracing::warn!(area = "reconcile", error = %error, "Unreadable webhook payload")
        }
        ReconcileError::Storage(_) => tracing::error!(
            area = "reconcile",
            error = %error,
            "🔴 Webhook not applied, asking Cashfree to redeliver"
        ),
    }

    (
        status,
        Json(serde_json::json!({
            "status": "error",
            "area": ErrorArea::Reconcile,
            "message": error.to_string(),
            "redeliver": status.is_server_error(),
        })),
    )
        .into_response()
}
