use crate::payments::error::PaymentResult;
use crate::payments::types::{
    GatewayOrder, PaymentSession, ProviderName, SessionRequest, WebhookEvent,
    WebhookVerificationResult,
};
use async_trait::async_trait;

/// Outbound and inbound contract with a hosted payment gateway.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Creates a remote order and returns its client-facing session.
    async fn create_session(&self, request: SessionRequest) -> PaymentResult<PaymentSession>;

    /// Reads the remote order, including its session and any successful payment.
    async fn fetch_order(&self, gateway_order_id: &str) -> PaymentResult<GatewayOrder>;

    fn name(&self) -> ProviderName;

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature: &str,
        timestamp: &str,
    ) -> PaymentResult<WebhookVerificationResult>;

    fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<WebhookEvent>;
}
