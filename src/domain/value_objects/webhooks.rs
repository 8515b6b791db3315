use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Normalized event categories the reconciliation core reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEventKind {
    PaymentSucceeded,
    PaymentFailed,
    SubscriptionCanceled,
    Ignored(String),
}

impl From<&str> for ProviderEventKind {
    fn from(value: &str) -> Self {
        match value {
            "checkout.session.completed" | "invoice.payment_succeeded" => {
                ProviderEventKind::PaymentSucceeded
            }
            "invoice.payment_failed" => ProviderEventKind::PaymentFailed,
            "customer.subscription.deleted" => ProviderEventKind::SubscriptionCanceled,
            other => ProviderEventKind::Ignored(other.to_string()),
        }
    }
}

/// A provider webhook event after signature verification and normalization.
/// `event_id` is the provider's unique event identifier and serves as the
/// idempotency key across the payment transaction ledger.
#[derive(Debug, Clone)]
pub struct ProviderEvent {
    pub event_id: String,
    pub kind: ProviderEventKind,
    pub subscription_id: Option<Uuid>,
    pub provider_subscription_id: Option<String>,
    pub provider_transaction_id: Option<String>,
    pub amount_minor: Option<i32>,
    pub currency: Option<String>,
    pub failure_code: Option<String>,
    pub failure_message: Option<String>,
}

/// Result of processing one webhook delivery.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    /// The event was dispatched and recorded.
    Processed,
    /// The event id was already recorded; nothing was reapplied.
    Replay,
    /// The event category is not handled by this service.
    Ignored,
}

/// Failure details accompanying a `handle_payment_failure` call.
#[derive(Debug, Clone, Default)]
pub struct PaymentFailureData {
    pub failure_code: Option<String>,
    pub failure_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_stripe_event_types_onto_categories() {
        assert_eq!(
            ProviderEventKind::from("invoice.payment_succeeded"),
            ProviderEventKind::PaymentSucceeded
        );
        assert_eq!(
            ProviderEventKind::from("checkout.session.completed"),
            ProviderEventKind::PaymentSucceeded
        );
        assert_eq!(
            ProviderEventKind::from("invoice.payment_failed"),
            ProviderEventKind::PaymentFailed
        );
        assert_eq!(
            ProviderEventKind::from("customer.subscription.deleted"),
            ProviderEventKind::SubscriptionCanceled
        );
        assert_eq!(
            ProviderEventKind::from("customer.updated"),
            ProviderEventKind::Ignored("customer.updated".to_string())
        );
    }
}
