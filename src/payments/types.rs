use crate::payments::error::PaymentError;
use bigdecimal::{BigDecimal, RoundingMode};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProviderName {
    Cashfree,
}

impl ProviderName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderName::Cashfree => "cashfree",
        }
    }
}

impl std::fmt::Display for ProviderName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProviderName {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "cashfree" => Ok(ProviderName::Cashfree),
            _ => Err(PaymentError::ValidationError {
                message: format!("unsupported provider: {}", value),
                field: Some("provider".to_string()),
            }),
        }
    }
}

/// Amount on the wire: a decimal string with exactly two fraction digits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Money {
    pub amount: String,
    pub currency: String,
}

impl Money {
    pub fn from_decimal(amount: &BigDecimal, currency: impl Into<String>) -> Self {
        Self {
            amount: amount
                .with_scale_round(2, RoundingMode::HalfEven)
                .to_string(),
            currency: currency.into(),
        }
    }

    pub fn to_decimal(&self) -> Result<BigDecimal, PaymentError> {
        BigDecimal::from_str(self.amount.trim()).map_err(|_| PaymentError::ValidationError {
            message: format!("invalid decimal amount: {}", self.amount),
            field: Some("amount".to_string()),
        })
    }

    pub fn validate_positive(&self, field: &str) -> Result<(), PaymentError> {
        let parsed = self.to_decimal().map_err(|_| PaymentError::ValidationError {
            message: format!("invalid decimal amount: {}", self.amount),
            field: Some(field.to_string()),
        })?;
        if parsed <= BigDecimal::from(0) {
            return Err(PaymentError::ValidationError {
                message: "amount must be greater than zero".to_string(),
                field: Some(field.to_string()),
            });
        }
        if self.currency.trim().is_empty() {
            return Err(PaymentError::ValidationError {
                message: "currency is required".to_string(),
                field: Some("currency".to_string()),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CustomerContact {
    pub customer_id: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// Outbound request for a hosted payment session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRequest {
    pub gateway_order_id: String,
    pub amount: Money,
    pub customer: CustomerContact,
    /// Where the gateway posts asynchronous status webhooks
    pub notify_url: String,
    pub return_url: Option<String>,
    pub metadata: Option<JsonValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentSession {
    pub gateway_order_id: String,
    /// Client-facing token used by the checkout SDK
    pub session_id: String,
    pub provider_reference: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayOrderStatus {
    Active,
    Paid,
    Expired,
    Terminated,
    Unknown,
}

impl GatewayOrderStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_uppercase().as_str() {
            "ACTIVE" => GatewayOrderStatus::Active,
            "PAID" => GatewayOrderStatus::Paid,
            "EXPIRED" => GatewayOrderStatus::Expired,
            "TERMINATED" | "TERMINATION_REQUESTED" => GatewayOrderStatus::Terminated,
            _ => GatewayOrderStatus::Unknown,
        }
    }
}

/// Remote view of an order, used for status polling and conflict recovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayOrder {
    pub gateway_order_id: String,
    pub status: GatewayOrderStatus,
    pub amount: Option<Money>,
    pub session_id: Option<String>,
    /// Id of the successful payment when `status` is `Paid`
    pub payment_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GatewayEventKind {
    PaymentSuccess,
    PaymentFailed,
    PaymentUserDropped,
    /// Dashboard test delivery
    Test,
    Other(String),
}

impl GatewayEventKind {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "PAYMENT_SUCCESS_WEBHOOK" => GatewayEventKind::PaymentSuccess,
            "PAYMENT_FAILED_WEBHOOK" => GatewayEventKind::PaymentFailed,
            "PAYMENT_USER_DROPPED_WEBHOOK" => GatewayEventKind::PaymentUserDropped,
            "WEBHOOK" | "TEST" | "TEST_WEBHOOK" => GatewayEventKind::Test,
            other => GatewayEventKind::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayPaymentStatus {
    Success,
    Failed,
    UserDropped,
    Cancelled,
    Pending,
    Unknown,
}

impl GatewayPaymentStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_uppercase().as_str() {
            "SUCCESS" => GatewayPaymentStatus::Success,
            "FAILED" => GatewayPaymentStatus::Failed,
            "USER_DROPPED" => GatewayPaymentStatus::UserDropped,
            "CANCELLED" => GatewayPaymentStatus::Cancelled,
            "PENDING" | "NOT_ATTEMPTED" => GatewayPaymentStatus::Pending,
            _ => GatewayPaymentStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookVerificationResult {
    pub valid: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub provider: ProviderName,
    pub kind: GatewayEventKind,
    pub event_type: String,
    pub gateway_order_id: Option<String>,
    pub gateway_payment_id: Option<String>,
    pub payment_status: Option<GatewayPaymentStatus>,
    pub amount: Option<Money>,
    pub payload: JsonValue,
    pub received_at: String,
}

impl WebhookEvent {
    /// Success is confirmed only when the event type and the nested payment
    /// status agree.
    pub fn confirms_success(&self) -> bool {
        self.kind == GatewayEventKind::PaymentSuccess
            && self.payment_status == Some(GatewayPaymentStatus::Success)
    }

    pub fn confirms_failure(&self) -> bool {
        matches!(
            self.kind,
            GatewayEventKind::PaymentFailed | GatewayEventKind::PaymentUserDropped
        ) && matches!(
            self.payment_status,
            Some(
                GatewayPaymentStatus::Failed
                    | GatewayPaymentStatus::UserDropped
                    | GatewayPaymentStatus::Cancelled
            )
        )
    }
}
