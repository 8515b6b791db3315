use std::collections::HashMap;

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use thiserror::Error;

use crate::domain::value_objects::webhooks::ProviderEvent;

#[derive(Debug, Error)]
pub enum WebhookVerifyError {
    #[error("invalid webhook signature: {0}")]
    InvalidSignature(String),
    #[error("malformed webhook payload: {0}")]
    MalformedPayload(String),
}

/// Seam over a payment provider client. Signature verification works on the
/// raw request body and must run before any business logic touches the event.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn provider_name(&self) -> &'static str;

    /// Header carrying the provider's signature on webhook deliveries.
    fn signature_header(&self) -> &'static str;

    fn verify_webhook_signature(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<ProviderEvent, WebhookVerifyError>;

    async fn create_checkout_session(
        &self,
        price_id: &str,
        mode: &str,
        customer_email: Option<String>,
        metadata: HashMap<String, String>,
    ) -> AnyResult<String>;

    async fn cancel_subscription(&self, provider_subscription_id: &str) -> AnyResult<()>;
}
