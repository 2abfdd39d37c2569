//! Shared fixtures for the integration tests: an in-memory store, a scripted
//! gateway that signs and parses like Cashfree, and a recording notifier.
#![allow(dead_code)]

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use rural_sports_backend::api::AppState;
use rural_sports_backend::config::{CheckoutConfig, WebhookConfig};
use rural_sports_backend::database::{CommerceStore, MemoryStore};
use rural_sports_backend::health::HealthChecker;
use rural_sports_backend::payments::providers::cashfree::{
    parse_webhook_payload, verify_signature,
};
use rural_sports_backend::payments::types::{
    GatewayOrder, GatewayOrderStatus, Money, PaymentSession, ProviderName, SessionRequest,
    WebhookEvent, WebhookVerificationResult,
};
use rural_sports_backend::payments::utils::sign_hmac_sha256_base64;
use rural_sports_backend::payments::{PaymentError, PaymentGateway, PaymentResult};
use rural_sports_backend::services::{
    CartService, CheckoutService, ConfirmationNotice, FulfillmentService, NotificationError,
    Notifier, WebhookHeaders, WebhookReconciler,
};

pub const WEBHOOK_SECRET: &str = "cf_test_secret";

pub fn dec(s: &str) -> BigDecimal {
    BigDecimal::from_str(s).unwrap()
}

/// Gateway double: remote order state is scripted per gateway order id.
#[derive(Default)]
pub struct StubGateway {
    remote: Mutex<HashMap<String, GatewayOrder>>,
    pub sessions_created: AtomicUsize,
    pub fail_sessions: Mutex<Option<PaymentError>>,
    pub last_request: Mutex<Option<SessionRequest>>,
}

impl StubGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_remote(&self, gateway_order_id: &str, status: GatewayOrderStatus, amount: Option<Money>) {
        self.remote.lock().unwrap().insert(
            gateway_order_id.to_string(),
            GatewayOrder {
                gateway_order_id: gateway_order_id.to_string(),
                status,
                amount,
                session_id: Some(format!("session_{}", gateway_order_id)),
                payment_id: match status {
                    GatewayOrderStatus::Paid => Some("cf_pay_poll".to_string()),
                    _ => None,
                },
            },
        );
    }

    pub fn fail_next_session(&self, error: PaymentError) {
        *self.fail_sessions.lock().unwrap() = Some(error);
    }

    pub fn session_count(&self) -> usize {
        self.sessions_created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for StubGateway {
    async fn create_session(&self, request: SessionRequest) -> PaymentResult<PaymentSession> {
        *self.last_request.lock().unwrap() = Some(request.clone());
        if let Some(error) = self.fail_sessions.lock().unwrap().take() {
            return Err(error);
        }
        self.sessions_created.fetch_add(1, Ordering::SeqCst);
        self.set_remote(
            &request.gateway_order_id,
            GatewayOrderStatus::Active,
            Some(request.amount.clone()),
        );
        Ok(PaymentSession {
            session_id: format!("session_{}", request.gateway_order_id),
            gateway_order_id: request.gateway_order_id,
            provider_reference: Some("cf_order_1".to_string()),
        })
    }

    async fn fetch_order(&self, gateway_order_id: &str) -> PaymentResult<GatewayOrder> {
        self.remote
            .lock()
            .unwrap()
            .get(gateway_order_id)
            .cloned()
            .ok_or_else(|| PaymentError::ProviderError {
                provider: "cashfree".to_string(),
                message: format!("order {} not found", gateway_order_id),
                provider_code: Some("order_not_found".to_string()),
                retryable: false,
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
        Ok(verify_signature(payload, signature, timestamp, WEBHOOK_SECRET))
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<WebhookEvent> {
        parse_webhook_payload(payload)
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<ConfirmationNotice>>,
    pub fail: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notice: &ConfirmationNotice) -> Result<(), NotificationError> {
        self.sent.lock().unwrap().push(notice.clone());
        if self.fail {
            return Err(NotificationError::Delivery("smtp unreachable".to_string()));
        }
        Ok(())
    }
}

pub fn checkout_config() -> CheckoutConfig {
    CheckoutConfig {
        currency: "INR".to_string(),
        notify_url: "https://shop.example.com/webhooks/cashfree".to_string(),
        return_url: None,
        gateway_order_id_attempts: 5,
    }
}

pub fn webhook_config() -> WebhookConfig {
    WebhookConfig {
        require_signature: true,
        timestamp_tolerance: Duration::from_secs(300),
        notification_timeout: Duration::from_secs(1),
    }
}

pub struct Harness {
    pub store: MemoryStore,
    pub gateway: Arc<StubGateway>,
    pub notifier: Arc<RecordingNotifier>,
    pub cart: CartService,
    pub checkout: CheckoutService,
    pub reconciler: WebhookReconciler,
    pub fulfillment: FulfillmentService,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_notifier(RecordingNotifier::default())
    }

    pub fn with_notifier(notifier: RecordingNotifier) -> Self {
        let store = MemoryStore::new();
        let shared: Arc<dyn CommerceStore> = Arc::new(store.clone());
        let gateway = Arc::new(StubGateway::new());
        let notifier = Arc::new(notifier);

        let reconciler = WebhookReconciler::new(
            shared.clone(),
            gateway.clone(),
            notifier.clone(),
            webhook_config(),
        );

        Self {
            cart: CartService::new(shared.clone()),
            checkout: CheckoutService::new(shared.clone(), gateway.clone(), checkout_config()),
            fulfillment: FulfillmentService::new(shared.clone()),
            reconciler,
            store,
            gateway,
            notifier,
        }
    }

    pub fn app_state(&self) -> AppState {
        let shared: Arc<dyn CommerceStore> = Arc::new(self.store.clone());
        AppState {
            store: shared.clone(),
            cart: self.cart.clone(),
            checkout: self.checkout.clone(),
            reconciler: self.reconciler.clone(),
            fulfillment: self.fulfillment.clone(),
            health_checker: HealthChecker::new(shared),
        }
    }
}

pub fn signed_headers(body: &[u8]) -> WebhookHeaders {
    signed_headers_at(body, chrono::Utc::now().timestamp_millis())
}

pub fn signed_headers_at(body: &[u8], timestamp_millis: i64) -> WebhookHeaders {
    let timestamp = timestamp_millis.to_string();
    let mut message = timestamp.as_bytes().to_vec();
    message.extend_from_slice(body);
    WebhookHeaders {
        signature: Some(sign_hmac_sha256_base64(&message, WEBHOOK_SECRET)),
        timestamp: Some(timestamp),
    }
}

pub fn success_payload(gateway_order_id: &str, amount: &str) -> Vec<u8> {
    payment_payload(
        "PAYMENT_SUCCESS_WEBHOOK",
        "SUCCESS",
        gateway_order_id,
        serde_json::Value::String(amount.to_string()),
    )
}

pub fn failed_payload(gateway_order_id: &str, amount: &str) -> Vec<u8> {
    payment_payload(
        "PAYMENT_FAILED_WEBHOOK",
        "FAILED",
        gateway_order_id,
        serde_json::Value::String(amount.to_string()),
    )
}

pub fn payment_payload(
    event_type: &str,
    payment_status: &str,
    gateway_order_id: &str,
    amount: serde_json::Value,
) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "type": event_type,
        "event_time": "2024-06-10T12:00:00+05:30",
        "data": {
            "order": {
                "order_id": gateway_order_id,
                "order_amount": amount,
                "order_currency": "INR",
            },
            "payment": {
                "cf_payment_id": 5114910912u64,
                "payment_status": payment_status,
                "payment_amount": amount,
            },
        },
    }))
    .unwrap()
}

/// User id plus a fresh random one for "someone else".
pub fn users() -> (Uuid, Uuid) {
    (Uuid::new_v4(), Uuid::new_v4())
}
