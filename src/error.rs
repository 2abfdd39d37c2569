//! Error handling for the commerce backend
//!
//! A unified error system with HTTP status mapping, user-facing messages and
//! structured error codes for client handling.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::payments::error::PaymentError;

/// Machine-readable error codes returned to API clients
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Domain errors (4xx)
    EmptySelection,
    InvalidLineItem,
    CatalogItemNotFound,
    CartLineNotFound,
    OrderNotFound,
    OrderNotPayable,
    SeatUnavailable,
    TicketNotFound,
    InvalidPayload,
    InvalidSignature,
    Unauthorized,

    // Infrastructure errors (5xx)
    DatabaseError,
    ConfigurationError,

    // External errors (502, 504)
    PaymentGatewayError,
    ExternalServiceTimeout,

    // Generic
    InternalError,
    ValidationError,
}

/// Business rule violations raised by cart, checkout and fulfillment
#[derive(Debug, Clone)]
pub enum DomainError {
    /// Checkout was asked to build an order from nothing
    EmptySelection { reason: String },
    /// A cart or order line references both or neither of product and event
    InvalidLineItem { reason: String },
    /// Catalog entry is missing or inactive
    CatalogItemNotFound { reference: String },
    /// Cart line does not exist or belongs to another user
    CartLineNotFound { line_id: i64 },
    /// Order does not exist or belongs to another user
    OrderNotFound { order_id: String },
    /// Order is no longer awaiting payment
    OrderNotPayable { order_id: String, state: String },
    /// Seat is held or sold by another booking
    SeatUnavailable { seat_id: i64 },
    TicketNotFound { ticket_id: String },
}

/// Infrastructure-level errors (database, configuration)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    /// Database connection or query failure
    Database { message: String, is_retryable: bool },
    /// Missing or invalid configuration
    Configuration { message: String },
}

/// External service errors (payment gateway)
#[derive(Debug, Clone)]
pub enum ExternalError {
    /// Gateway rejected the session request or returned no session token
    GatewayInitiation {
        provider: String,
        message: String,
        is_retryable: bool,
    },
    /// External service timeout
    Timeout { service: String, timeout_secs: u64 },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    /// Required field missing
    MissingField { field: String },
    /// Field value out of acceptable range
    OutOfRange {
        field: String,
        min: Option<String>,
        max: Option<String>,
    },
    /// Caller identity header missing or malformed
    Unauthenticated { reason: String },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn domain(err: DomainError) -> Self {
        Self::new(AppErrorKind::Domain(err))
    }

    pub fn validation(err: ValidationError) -> Self {
        Self::new(AppErrorKind::Validation(err))
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::EmptySelection { .. } => 400,
                DomainError::InvalidLineItem { .. } => 400,
                DomainError::CatalogItemNotFound { .. } => 404,
                DomainError::CartLineNotFound { .. } => 404,
                DomainError::OrderNotFound { .. } => 404,
                DomainError::OrderNotPayable { .. } => 409, // Conflict
                DomainError::SeatUnavailable { .. } => 409,
                DomainError::TicketNotFound { .. } => 404,
            },
            AppErrorKind::Infrastructure(_) => 500,
            AppErrorKind::External(err) => match err {
                ExternalError::GatewayInitiation { .. } => 502, // Bad Gateway
                ExternalError::Timeout { .. } => 504,          // Gateway Timeout
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::Unauthenticated { .. } => 401,
                _ => 400,
            },
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::EmptySelection { .. } => ErrorCode::EmptySelection,
                DomainError::InvalidLineItem { .. } => ErrorCode::InvalidLineItem,
                DomainError::CatalogItemNotFound { .. } => ErrorCode::CatalogItemNotFound,
                DomainError::CartLineNotFound { .. } => ErrorCode::CartLineNotFound,
                DomainError::OrderNotFound { .. } => ErrorCode::OrderNotFound,
                DomainError::OrderNotPayable { .. } => ErrorCode::OrderNotPayable,
                DomainError::SeatUnavailable { .. } => ErrorCode::SeatUnavailable,
                DomainError::TicketNotFound { .. } => ErrorCode::TicketNotFound,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::GatewayInitiation { .. } => ErrorCode::PaymentGatewayError,
                ExternalError::Timeout { .. } => ErrorCode::ExternalServiceTimeout,
            },
            AppErrorKind::Validation(ValidationError::Unauthenticated { .. }) => {
                ErrorCode::Unauthorized
            }
            AppErrorKind::Validation(_) => ErrorCode::ValidationError,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::EmptySelection { reason } => {
                    format!("Nothing to check out: {}", reason)
                }
                DomainError::InvalidLineItem { reason } => {
                    format!("Invalid line item: {}", reason)
                }
                DomainError::CatalogItemNotFound { reference } => {
                    format!("Catalog item '{}' not found", reference)
                }
                DomainError::CartLineNotFound { line_id } => {
                    format!("Cart line {} not found", line_id)
                }
                DomainError::OrderNotFound { order_id } => {
                    format!("Order '{}' not found", order_id)
                }
                DomainError::OrderNotPayable { order_id, state } => {
                    format!("Order '{}' is {} and cannot be paid", order_id, state)
                }
                DomainError::SeatUnavailable { seat_id } => {
                    format!("Seat {} is no longer available", seat_id)
                }
                DomainError::TicketNotFound { ticket_id } => {
                    format!("Ticket '{}' not found", ticket_id)
                }
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::External(err) => match err {
                ExternalError::GatewayInitiation {
                    provider,
                    is_retryable,
                    ..
                } => {
                    if *is_retryable {
                        format!(
                            "Payment gateway ({}) is temporarily unavailable. Please try again",
                            provider
                        )
                    } else {
                        "Could not start the payment. Please try again or contact support"
                            .to_string()
                    }
                }
                ExternalError::Timeout {
                    service,
                    timeout_secs,
                } => {
                    format!(
                        "{} request timed out after {} seconds. Please try again",
                        service, timeout_secs
                    )
                }
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
                ValidationError::OutOfRange { field, min, max } => match (min, max) {
                    (Some(min), Some(max)) => {
                        format!("Field '{}' must be between {} and {}", field, min, max)
                    }
                    (Some(min), None) => {
                        format!("Field '{}' must be at least {}", field, min)
                    }
                    (None, Some(max)) => {
                        format!("Field '{}' must be at most {}", field, max)
                    }
                    (None, None) => {
                        format!("Field '{}' is out of acceptable range", field)
                    }
                },
                ValidationError::Unauthenticated { reason } => {
                    format!("Authentication required: {}", reason)
                }
            },
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(_) => false,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Configuration { .. } => false,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::GatewayInitiation { is_retryable, .. } => *is_retryable,
                ExternalError::Timeout { .. } => true,
            },
            AppErrorKind::Validation(_) => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

// Note: From<DatabaseError> is implemented in database/error.rs

impl From<DomainError> for AppError {
    fn from(err: DomainError) -> Self {
        AppError::domain(err)
    }
}

impl From<PaymentError> for AppError {
    fn from(err: PaymentError) -> Self {
        let kind = match err {
            PaymentError::Timeout {
                provider,
                timeout_secs,
            } => AppErrorKind::External(ExternalError::Timeout {
                service: provider,
                timeout_secs,
            }),
            PaymentError::ValidationError { message, field } => {
                AppErrorKind::Validation(match field {
                    Some(field) => ValidationError::MissingField { field },
                    None => ValidationError::MissingField { field: message },
                })
            }
            other => {
                let is_retryable = other.is_retryable();
                AppErrorKind::External(ExternalError::GatewayInitiation {
                    provider: "cashfree".to_string(),
                    message: other.to_string(),
                    is_retryable,
                })
            }
        };

        AppError::new(kind)
    }
}

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;
