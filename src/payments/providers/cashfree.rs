use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::types::{
    GatewayEventKind, GatewayOrder, GatewayOrderStatus, GatewayPaymentStatus, Money,
    PaymentSession, ProviderName, SessionRequest, WebhookEvent, WebhookVerificationResult,
};
use crate::payments::utils::{verify_hmac_sha256_base64, PaymentHttpClient};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

pub const SANDBOX_BASE_URL: &str = "https://sandbox.cashfree.com/pg";
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";
pub const TIMESTAMP_HEADER: &str = "x-webhook-timestamp";

#[derive(Debug, Clone)]
pub struct CashfreeConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Falls back to the client secret, which is what Cashfree signs with.
    pub webhook_secret: Option<String>,
    pub base_url: String,
    pub api_version: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for CashfreeConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            webhook_secret: None,
            base_url: SANDBOX_BASE_URL.to_string(),
            api_version: "2022-09-01".to_string(),
            timeout_secs: 10,
            max_retries: 1,
        }
    }
}

impl CashfreeConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let required = |name: &str| {
            std::env::var(name).map_err(|_| PaymentError::ValidationError {
                message: format!("{} environment variable is required", name),
                field: Some(name.to_string()),
            })
        };

        Ok(Self {
            client_id: required("CASHFREE_CLIENT_ID")?,
            client_secret: required("CASHFREE_CLIENT_SECRET")?,
            webhook_secret: std::env::var("CASHFREE_WEBHOOK_SECRET").ok(),
            base_url: std::env::var("CASHFREE_BASE_URL")
                .unwrap_or_else(|_| SANDBOX_BASE_URL.to_string()),
            api_version: std::env::var("CASHFREE_API_VERSION")
                .unwrap_or_else(|_| "2022-09-01".to_string()),
            timeout_secs: std::env::var("CASHFREE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(10),
            max_retries: std::env::var("CASHFREE_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(1),
        })
    }

    pub fn signing_secret(&self) -> &str {
        self.webhook_secret
            .as_deref()
            .unwrap_or(&self.client_secret)
    }
}

pub struct CashfreeGateway {
    config: CashfreeConfig,
    http: PaymentHttpClient,
}

impl CashfreeGateway {
    pub fn new(config: CashfreeConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new(
            "cashfree",
            Duration::from_secs(config.timeout_secs),
            config.max_retries,
        )?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(CashfreeConfig::from_env()?)
    }

    /// Swaps the HTTP client, used to shorten retry backoff.
    pub fn with_http_client(mut self, http: PaymentHttpClient) -> Self {
        self.http = http;
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn auth_headers(&self) -> [(&str, &str); 4] {
        [
            ("x-client-id", self.config.client_id.as_str()),
            ("x-client-secret", self.config.client_secret.as_str()),
            ("x-api-version", self.config.api_version.as_str()),
            ("Content-Type", "application/json"),
        ]
    }

    async fn successful_payment_id(&self, gateway_order_id: &str) -> PaymentResult<Option<String>> {
        let payments: Vec<CashfreePaymentData> = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/orders/{}/payments", gateway_order_id)),
                None,
                &self.auth_headers(),
            )
            .await?;

        Ok(payments
            .into_iter()
            .find(|p| GatewayPaymentStatus::parse(&p.payment_status) == GatewayPaymentStatus::Success)
            .and_then(|p| id_to_string(&p.cf_payment_id)))
    }
}

#[async_trait]
impl PaymentGateway for CashfreeGateway {
    async fn create_session(&self, request: SessionRequest) -> PaymentResult<PaymentSession> {
        request.amount.validate_positive("order_amount")?;

        // Cashfree takes the amount as a JSON number
        let order_amount = serde_json::Number::from_str(&request.amount.amount).map_err(|_| {
            PaymentError::ValidationError {
                message: format!("invalid decimal amount: {}", request.amount.amount),
                field: Some("order_amount".to_string()),
            }
        })?;

        let mut order_meta = serde_json::json!({ "notify_url": request.notify_url });
        if let Some(return_url) = &request.return_url {
            order_meta["return_url"] = JsonValue::String(return_url.clone());
        }

        let payload = serde_json::json!({
            "order_id": request.gateway_order_id,
            "order_amount": order_amount,
            "order_currency": request.amount.currency,
            "customer_details": {
                "customer_id": request.customer.customer_id,
                "customer_email": request.customer.email,
                "customer_phone": request.customer.phone,
            },
            "order_meta": order_meta,
            "order_tags": request.metadata,
        });

        let raw: CashfreeOrderData = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/orders"),
                Some(&payload),
                &self.auth_headers(),
            )
            .await?;

        let session_id = raw
            .payment_session_id
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| PaymentError::ProviderError {
                provider: "cashfree".to_string(),
                message: "response did not include payment_session_id".to_string(),
                provider_code: None,
                retryable: false,
            })?;

        info!(
            gateway_order_id = %request.gateway_order_id,
            "cashfree payment session created"
        );

        Ok(PaymentSession {
            gateway_order_id: request.gateway_order_id,
            session_id,
            provider_reference: raw.cf_order_id.as_ref().and_then(id_to_string),
        })
    }

    async fn fetch_order(&self, gateway_order_id: &str) -> PaymentResult<GatewayOrder> {
        let raw: CashfreeOrderData = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/orders/{}", gateway_order_id)),
                None,
                &self.auth_headers(),
            )
            .await?;

        let status = raw
            .order_status
            .as_deref()
            .map(GatewayOrderStatus::parse)
            .unwrap_or(GatewayOrderStatus::Unknown);

        let payment_id = if status == GatewayOrderStatus::Paid {
            self.successful_payment_id(gateway_order_id).await?
        } else {
            None
        };

        let amount = match (&raw.order_amount, &raw.order_currency) {
            (Some(amount), Some(currency)) => json_money(amount, currency),
            _ => None,
        };

        Ok(GatewayOrder {
            gateway_order_id: gateway_order_id.to_string(),
            status,
            amount,
            session_id: raw.payment_session_id,
            payment_id,
        })
    }

    fn name(&self) -> ProviderName {
        ProviderName::Cashfree
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature: &str,
        timestamp: &str,
    ) -> PaymentResult<WebhookVerificationResult> {
        Ok(verify_signature(
            payload,
            signature,
            timestamp,
            self.config.signing_secret(),
        ))
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<WebhookEvent> {
        parse_webhook_payload(payload)
    }
}

/// Cashfree signs `timestamp || raw_body` with HMAC-SHA256, base64 encoded.
pub fn verify_signature(
    payload: &[u8],
    signature: &str,
    timestamp: &str,
    secret: &str,
) -> WebhookVerificationResult {
    if signature.trim().is_empty() || timestamp.trim().is_empty() {
        return WebhookVerificationResult {
            valid: false,
            reason: Some("missing signature or timestamp header".to_string()),
        };
    }

    let mut message = Vec::with_capacity(timestamp.len() + payload.len());
    message.extend_from_slice(timestamp.trim().as_bytes());
    message.extend_from_slice(payload);

    let valid = verify_hmac_sha256_base64(&message, secret, signature);
    WebhookVerificationResult {
        valid,
        reason: if valid {
            None
        } else {
            Some("invalid cashfree signature".to_string())
        },
    }
}

/// Whether a signed `x-webhook-timestamp` lies within `tolerance` of `now`.
///
/// Cashfree sends epoch milliseconds; plain epoch seconds are accepted too.
pub fn timestamp_is_fresh(timestamp: &str, now: DateTime<Utc>, tolerance: Duration) -> bool {
    let Ok(raw) = timestamp.trim().parse::<i64>() else {
        return false;
    };
    let millis = if raw > 100_000_000_000 { raw } else { raw.saturating_mul(1000) };
    let skew = (now.timestamp_millis() - millis).unsigned_abs();
    u128::from(skew) <= tolerance.as_millis()
}

/// Parses the nested Cashfree webhook shape.
///
/// Payment events without `data.order.order_id` are rejected; unknown event
/// types parse successfully so the caller can acknowledge and drop them.
pub fn parse_webhook_payload(payload: &[u8]) -> PaymentResult<WebhookEvent> {
    let parsed: JsonValue =
        serde_json::from_slice(payload).map_err(|e| PaymentError::ValidationError {
            message: format!("invalid webhook JSON payload: {}", e),
            field: None,
        })?;

    let event_type = parsed
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| PaymentError::ValidationError {
            message: "webhook payload has no type".to_string(),
            field: Some("type".to_string()),
        })?
        .to_string();
    let kind = GatewayEventKind::parse(&event_type);

    let data = parsed.get("data");
    let order = data.and_then(|d| d.get("order"));
    let payment = data.and_then(|d| d.get("payment"));

    let gateway_order_id = order
        .and_then(|o| o.get("order_id"))
        .and_then(|v| v.as_str())
        .map(str::to_string);

    let is_payment_event = matches!(
        kind,
        GatewayEventKind::PaymentSuccess
            | GatewayEventKind::PaymentFailed
            | GatewayEventKind::PaymentUserDropped
    );
    if is_payment_event {
        if gateway_order_id.is_none() {
            return Err(PaymentError::ValidationError {
                message: "payment webhook has no data.order.order_id".to_string(),
                field: Some("data.order.order_id".to_string()),
            });
        }
        if payment.is_none() {
            return Err(PaymentError::ValidationError {
                message: "payment webhook has no data.payment".to_string(),
                field: Some("data.payment".to_string()),
            });
        }
    }

    let payment_status = payment
        .and_then(|p| p.get("payment_status"))
        .and_then(|v| v.as_str())
        .map(GatewayPaymentStatus::parse);
    let gateway_payment_id = payment
        .and_then(|p| p.get("cf_payment_id"))
        .and_then(id_to_string);

    let amount = order.and_then(|o| {
        let currency = o
            .get("order_currency")
            .and_then(|v| v.as_str())
            .unwrap_or("INR");
        o.get("order_amount").and_then(|a| json_money(a, currency))
    });
    if amount.is_none() && is_payment_event {
        warn!(event_type = %event_type, "cashfree webhook carries no order amount");
    }

    Ok(WebhookEvent {
        provider: ProviderName::Cashfree,
        kind,
        event_type,
        gateway_order_id,
        gateway_payment_id,
        payment_status,
        amount,
        payload: parsed,
        received_at: chrono::Utc::now().to_rfc3339(),
    })
}

/// Cashfree ids arrive as numbers or strings depending on API version.
fn id_to_string(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) if !s.is_empty() => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn json_money(value: &JsonValue, currency: &str) -> Option<Money> {
    let raw = match value {
        JsonValue::Number(n) => n.to_string(),
        JsonValue::String(s) => s.clone(),
        _ => return None,
    };
    bigdecimal::BigDecimal::from_str(&raw)
        .ok()
        .map(|d| Money::from_decimal(&d, currency))
}

#[derive(Debug, Deserialize)]
struct CashfreeOrderData {
    #[serde(default)]
    cf_order_id: Option<JsonValue>,
    #[serde(default)]
    order_status: Option<String>,
    #[serde(default)]
    order_amount: Option<JsonValue>,
    #[serde(default)]
    order_currency: Option<String>,
    #[serde(default)]
    payment_session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CashfreePaymentData {
    cf_payment_id: JsonValue,
    payment_status: String,
}
