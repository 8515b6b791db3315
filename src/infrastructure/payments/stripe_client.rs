use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use sha2::Sha256;
use tracing::error;
use uuid::Uuid;

use crate::application::interfaces::payment_gateway::{PaymentGateway, WebhookVerifyError};
use crate::domain::value_objects::webhooks::{ProviderEvent, ProviderEventKind};

type HmacSha256 = Hmac<Sha256>;

/// Minimal Stripe client built on reqwest. Outbound calls carry a bounded
/// timeout so a slow provider surfaces as a transient error instead of a
/// stuck request.
pub struct StripeClient {
    http: reqwest::Client,
    secret_key: String,
    webhook_secret: String,
    success_url: String,
    cancel_url: String,
}

#[derive(Debug, Deserialize)]
pub struct StripeEvent {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub type_: String,
    pub data: StripeEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

/// Lenient view over the event payload object; invoices, charges, checkout
/// sessions, and subscriptions each populate a subset of these fields.
#[derive(Debug, Default, Deserialize)]
struct StripeEventObject {
    id: Option<String>,
    subscription: Option<String>,
    payment_intent: Option<String>,
    amount_total: Option<i64>,
    amount_paid: Option<i64>,
    amount_due: Option<i64>,
    currency: Option<String>,
    failure_code: Option<String>,
    failure_message: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorEnvelope {
    error: StripeErrorDetails,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetails {
    #[serde(rename = "type")]
    type_: Option<String>,
    code: Option<String>,
    message: Option<String>,
}

impl StripeClient {
    pub fn new(
        secret_key: String,
        webhook_secret: String,
        success_url: String,
        cancel_url: String,
        request_timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            http,
            secret_key,
            webhook_secret,
            success_url,
            cancel_url,
        })
    }

    async fn ensure_success(resp: reqwest::Response, context: &str) -> Result<reqwest::Response> {
        if resp.status().is_success() {
            return Ok(resp);
        }

        let status = resp.status();
        let request_id = resp
            .headers()
            .get("request-id")
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());
        let body = resp.text().await.unwrap_or_default();
        let details = serde_json::from_str::<StripeErrorEnvelope>(&body)
            .ok()
            .map(|envelope| envelope.error);

        error!(
            status = %status,
            stripe_request_id = ?request_id,
            stripe_error_type = ?details.as_ref().and_then(|d| d.type_.clone()),
            stripe_error_code = ?details.as_ref().and_then(|d| d.code.clone()),
            stripe_error_message = ?details.as_ref().and_then(|d| d.message.clone()),
            context = %context,
            "stripe api request failed"
        );

        anyhow::bail!(
            "Stripe API request failed: {} (status {}, request_id={:?})",
            context,
            status,
            request_id
        );
    }

    /// Creates a Checkout Session and returns its URL.
    /// https://stripe.com/docs/payments/checkout
    pub async fn create_checkout_session(
        &self,
        price_id: &str,
        mode: &str,
        customer_email: Option<String>,
        metadata: HashMap<String, String>,
    ) -> Result<String> {
        let mut body: Vec<(String, String)> = vec![
            ("mode".to_string(), mode.to_string()),
            ("line_items[0][price]".to_string(), price_id.to_string()),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
            ("success_url".to_string(), self.success_url.clone()),
            ("cancel_url".to_string(), self.cancel_url.clone()),
        ];

        if let Some(email) = customer_email {
            body.push(("customer_email".to_string(), email));
        }

        for (key, value) in metadata {
            body.push((format!("metadata[{}]", key), value));
        }

        let resp = self
            .http
            .post("https://api.stripe.com/v1/checkout/sessions")
            .header(AUTHORIZATION, format!("Bearer {}", self.secret_key))
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .form(&body)
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "create checkout session").await?;

        #[derive(Deserialize)]
        struct CheckoutResp {
            url: Option<String>,
        }

        let parsed: CheckoutResp = resp.json().await?;
        parsed
            .url
            .ok_or_else(|| anyhow::anyhow!("Stripe Checkout session URL is missing"))
    }

    /// Marks a Stripe subscription to cancel at period end.
    /// https://stripe.com/docs/api/subscriptions/cancel
    pub async fn cancel_subscription(&self, provider_subscription_id: &str) -> Result<()> {
        let body = [("cancel_at_period_end", "true".to_string())];
        let resp = self
            .http
            .post(format!(
                "https://api.stripe.com/v1/subscriptions/{}",
                provider_subscription_id
            ))
            .header(AUTHORIZATION, format!("Bearer {}", self.secret_key))
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .form(&body)
            .send()
            .await?;
        Self::ensure_success(resp, "cancel subscription").await?;

        Ok(())
    }

    /// Verifies the `Stripe-Signature` header over the raw payload.
    /// https://stripe.com/docs/webhooks/signatures
    fn verify_signature(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<StripeEvent, WebhookVerifyError> {
        let mut timestamp: Option<String> = None;
        let mut signature: Option<String> = None;

        for part in signature_header.split(',') {
            if let Some(rest) = part.strip_prefix("t=") {
                timestamp = Some(rest.to_string());
            } else if let Some(rest) = part.strip_prefix("v1=") {
                signature = Some(rest.to_string());
            }
        }

        let timestamp = timestamp.ok_or_else(|| {
            WebhookVerifyError::InvalidSignature("missing timestamp in stripe-signature".into())
        })?;
        let signature = signature.ok_or_else(|| {
            WebhookVerifyError::InvalidSignature("missing v1 in stripe-signature".into())
        })?;

        let signed_payload = format!("{}.{}", timestamp, String::from_utf8_lossy(payload));
        let mut mac = HmacSha256::new_from_slice(self.webhook_secret.as_bytes())
            .map_err(|err| WebhookVerifyError::InvalidSignature(err.to_string()))?;
        mac.update(signed_payload.as_bytes());
        let expected = mac.finalize().into_bytes();
        let provided = hex::decode(&signature)
            .map_err(|err| WebhookVerifyError::InvalidSignature(err.to_string()))?;

        if expected[..] != provided[..] {
            return Err(WebhookVerifyError::InvalidSignature(
                "digest mismatch".into(),
            ));
        }

        serde_json::from_slice(payload)
            .map_err(|err| WebhookVerifyError::MalformedPayload(err.to_string()))
    }

    fn normalize(event: StripeEvent) -> Result<ProviderEvent, WebhookVerifyError> {
        let event_id = event.id.ok_or_else(|| {
            WebhookVerifyError::MalformedPayload("event id is missing".into())
        })?;
        let object: StripeEventObject =
            serde_json::from_value(event.data.object).unwrap_or_default();

        let amount_minor = object
            .amount_paid
            .or(object.amount_total)
            .or(object.amount_due)
            .and_then(|value| i32::try_from(value).ok());
        let subscription_id = object
            .metadata
            .get("subscription_id")
            .and_then(|value| Uuid::parse_str(value).ok());

        Ok(ProviderEvent {
            event_id,
            kind: ProviderEventKind::from(event.type_.as_str()),
            subscription_id,
            provider_subscription_id: object.subscription,
            provider_transaction_id: object.payment_intent.or(object.id),
            amount_minor,
            currency: object.currency,
            failure_code: object.failure_code,
            failure_message: object.failure_message,
        })
    }
}

#[async_trait]
impl PaymentGateway for StripeClient {
    fn provider_name(&self) -> &'static str {
        "stripe"
    }

    fn signature_header(&self) -> &'static str {
        "stripe-signature"
    }

    fn verify_webhook_signature(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<ProviderEvent, WebhookVerifyError> {
        let event = self.verify_signature(payload, signature_header)?;
        Self::normalize(event)
    }

    async fn create_checkout_session(
        &self,
        price_id: &str,
        mode: &str,
        customer_email: Option<String>,
        metadata: HashMap<String, String>,
    ) -> Result<String> {
        self.create_checkout_session(price_id, mode, customer_email, metadata)
            .await
    }

    async fn cancel_subscription(&self, provider_subscription_id: &str) -> Result<()> {
        self.cancel_subscription(provider_subscription_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WEBHOOK_SECRET: &str = "whsec_test123secret456";

    fn test_client() -> StripeClient {
        StripeClient::new(
            "sk_test_xxx".to_string(),
            WEBHOOK_SECRET.to_string(),
            "https://app.example/billing/success".to_string(),
            "https://app.example/billing/cancel".to_string(),
            Duration::from_secs(10),
        )
        .unwrap()
    }

    fn sign(payload: &[u8], secret: &str, timestamp: &str) -> String {
        let signed_payload = format!("{}.{}", timestamp, String::from_utf8_lossy(payload));
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(signed_payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn signature_header(payload: &[u8]) -> String {
        let timestamp = "1700000000";
        format!("t={},v1={}", timestamp, sign(payload, WEBHOOK_SECRET, timestamp))
    }

    #[test]
    fn accepts_a_correctly_signed_payload() {
        let client = test_client();
        let subscription_id = Uuid::new_v4();
        let payload = serde_json::to_vec(&serde_json::json!({
            "id": "evt_1",
            "type": "invoice.payment_succeeded",
            "data": {
                "object": {
                    "id": "in_1",
                    "subscription": "sub_1",
                    "amount_paid": 900,
                    "currency": "usd",
                    "metadata": { "subscription_id": subscription_id.to_string() }
                }
            }
        }))
        .unwrap();

        let event = client
            .verify_webhook_signature(&payload, &signature_header(&payload))
            .expect("valid signature should verify");

        assert_eq!(event.event_id, "evt_1");
        assert_eq!(event.kind, ProviderEventKind::PaymentSucceeded);
        assert_eq!(event.subscription_id, Some(subscription_id));
        assert_eq!(event.provider_subscription_id.as_deref(), Some("sub_1"));
        assert_eq!(event.amount_minor, Some(900));
    }

    #[test]
    fn rejects_a_tampered_payload() {
        let client = test_client();
        let payload = br#"{"id":"evt_1","type":"invoice.payment_succeeded","data":{"object":{}}}"#;
        let tampered =
            br#"{"id":"evt_1","type":"invoice.payment_succeeded","data":{"object":{"hacked":true}}}"#;

        let result = client.verify_webhook_signature(tampered, &signature_header(payload));
        assert!(matches!(
            result,
            Err(WebhookVerifyError::InvalidSignature(_))
        ));
    }

    #[test]
    fn rejects_a_signature_from_the_wrong_secret() {
        let client = test_client();
        let payload = br#"{"id":"evt_1","type":"invoice.payment_failed","data":{"object":{}}}"#;
        let timestamp = "1700000000";
        let header = format!(
            "t={},v1={}",
            timestamp,
            sign(payload, "whsec_other", timestamp)
        );

        let result = client.verify_webhook_signature(payload, &header);
        assert!(matches!(
            result,
            Err(WebhookVerifyError::InvalidSignature(_))
        ));
    }

    #[test]
    fn rejects_a_header_without_signature_parts() {
        let client = test_client();
        let payload = br#"{}"#;

        let result = client.verify_webhook_signature(payload, "t=1700000000");
        assert!(matches!(
            result,
            Err(WebhookVerifyError::InvalidSignature(_))
        ));
    }

    #[test]
    fn signed_garbage_is_malformed_not_invalid() {
        let client = test_client();
        let payload = b"not json at all";

        let result = client.verify_webhook_signature(payload, &signature_header(payload));
        assert!(matches!(
            result,
            Err(WebhookVerifyError::MalformedPayload(_))
        ));
    }

    #[test]
    fn failure_details_survive_normalization() {
        let client = test_client();
        let payload = serde_json::to_vec(&serde_json::json!({
            "id": "evt_2",
            "type": "invoice.payment_failed",
            "data": {
                "object": {
                    "subscription": "sub_9",
                    "amount_due": 1900,
                    "currency": "usd",
                    "failure_code": "card_declined",
                    "failure_message": "Your card was declined."
                }
            }
        }))
        .unwrap();

        let event = client
            .verify_webhook_signature(&payload, &signature_header(&payload))
            .expect("valid signature should verify");

        assert_eq!(event.kind, ProviderEventKind::PaymentFailed);
        assert_eq!(event.amount_minor, Some(1900));
        assert_eq!(event.failure_code.as_deref(), Some("card_declined"));
    }
}
