use std::collections::HashMap;
use std::sync::Arc;

use axum::http::HeaderMap;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::application::{
    interfaces::payment_gateway::{PaymentGateway, WebhookVerifyError},
    usecases::subscriptions::{ActivationData, SubscriptionError, SubscriptionService},
};
use crate::domain::{
    entities::{
        payment_transactions::NewPaymentTransactionEntity, subscriptions::SubscriptionEntity,
    },
    repositories::{
        payment_transactions::PaymentTransactionRepository, plans::PlanRepository,
        subscription_history::SubscriptionHistoryRepository,
        subscriptions::SubscriptionRepository, usage_counters::UsageCounterRepository,
    },
    value_objects::{
        enums::{change_actors::ChangeActor, transaction_statuses::TransactionStatus},
        webhooks::{PaymentFailureData, ProviderEvent, ProviderEventKind, WebhookOutcome},
    },
};

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("unknown payment provider: {0}")]
    UnknownProvider(String),
    #[error("invalid webhook signature")]
    InvalidSignature,
    #[error("malformed webhook event: {0}")]
    MalformedEvent(String),
    #[error(transparent)]
    Service(#[from] SubscriptionError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl WebhookError {
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            WebhookError::UnknownProvider(_) => StatusCode::NOT_FOUND,
            WebhookError::InvalidSignature | WebhookError::MalformedEvent(_) => {
                StatusCode::BAD_REQUEST
            }
            WebhookError::Service(err) => err.status_code(),
            WebhookError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Ingests provider webhook deliveries: verifies the signature over the raw
/// body, deduplicates by event id, and maps event categories onto
/// SubscriptionService operations. Deliveries are at-least-once and may be
/// duplicated or reordered; replays must never reapply a transition.
pub struct WebhookProcessor<P, S, H, U, G, T>
where
    P: PlanRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
    H: SubscriptionHistoryRepository + Send + Sync + 'static,
    U: UsageCounterRepository + Send + Sync + 'static,
    G: PaymentGateway + Send + Sync + 'static,
    T: PaymentTransactionRepository + Send + Sync + 'static,
{
    service: Arc<SubscriptionService<P, S, H, U, G>>,
    payment_tx_repo: Arc<T>,
    gateways: HashMap<String, Arc<dyn PaymentGateway>>,
}

impl<P, S, H, U, G, T> WebhookProcessor<P, S, H, U, G, T>
where
    P: PlanRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
    H: SubscriptionHistoryRepository + Send + Sync + 'static,
    U: UsageCounterRepository + Send + Sync + 'static,
    G: PaymentGateway + Send + Sync + 'static,
    T: PaymentTransactionRepository + Send + Sync + 'static,
{
    pub fn new(
        service: Arc<SubscriptionService<P, S, H, U, G>>,
        payment_tx_repo: Arc<T>,
        gateways: Vec<Arc<dyn PaymentGateway>>,
    ) -> Self {
        let gateways = gateways
            .into_iter()
            .map(|gateway| (gateway.provider_name().to_string(), gateway))
            .collect();
        Self {
            service,
            payment_tx_repo,
            gateways,
        }
    }

    pub async fn process(
        &self,
        provider: &str,
        headers: &HeaderMap,
        payload: &[u8],
    ) -> Result<WebhookOutcome, WebhookError> {
        let gateway = self
            .gateways
            .get(provider)
            .ok_or_else(|| {
                warn!(provider, "webhooks: delivery for unknown provider");
                WebhookError::UnknownProvider(provider.to_string())
            })?
            .clone();

        // Signature check runs over the raw, unparsed body. A missing or bad
        // signature is rejected before any business logic sees the payload.
        let signature = headers
            .get(gateway.signature_header())
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| {
                error!(provider, "webhooks: delivery without signature header");
                WebhookError::InvalidSignature
            })?;

        let event = gateway
            .verify_webhook_signature(payload, signature)
            .map_err(|err| match err {
                WebhookVerifyError::InvalidSignature(detail) => {
                    error!(provider, detail, "webhooks: signature verification failed");
                    WebhookError::InvalidSignature
                }
                WebhookVerifyError::MalformedPayload(detail) => {
                    warn!(provider, detail = %detail, "webhooks: malformed payload");
                    WebhookError::MalformedEvent(detail)
                }
            })?;

        info!(
            provider,
            event_id = %event.event_id,
            kind = ?event.kind,
            "webhooks: event verified"
        );

        if let ProviderEventKind::Ignored(event_type) = &event.kind {
            debug!(provider, event_type, "webhooks: event type not handled");
            return Ok(WebhookOutcome::Ignored);
        }

        // Fast-path dedup; the unique constraint inside the transition
        // transaction closes the race between concurrent deliveries.
        if let Some(existing) = self
            .payment_tx_repo
            .find_by_webhook_event_id(&event.event_id)
            .await
            .map_err(|err| {
                error!(
                    provider,
                    event_id = %event.event_id,
                    db_error = ?err,
                    "webhooks: idempotency lookup failed"
                );
                WebhookError::Internal(err)
            })?
        {
            info!(
                provider,
                event_id = %event.event_id,
                transaction_id = %existing.id,
                "webhooks: replayed event, skipping dispatch"
            );
            return Ok(WebhookOutcome::Replay);
        }

        let subscription = self
            .service
            .resolve_for_event(
                event.subscription_id,
                event.provider_subscription_id.as_deref(),
            )
            .await?;

        self.dispatch(provider, &event, &subscription).await?;

        info!(
            provider,
            event_id = %event.event_id,
            subscription_id = %subscription.id,
            "webhooks: event processed"
        );
        Ok(WebhookOutcome::Processed)
    }

    async fn dispatch(
        &self,
        provider: &str,
        event: &ProviderEvent,
        subscription: &SubscriptionEntity,
    ) -> Result<(), WebhookError> {
        match &event.kind {
            ProviderEventKind::PaymentSucceeded => {
                let payment =
                    Self::transaction_row(provider, event, subscription, TransactionStatus::Succeeded);
                self.service
                    .activate(
                        subscription.id,
                        ActivationData {
                            provider_subscription_id: event.provider_subscription_id.clone(),
                            payment_method_id: None,
                            payment: Some(payment),
                            actor: Some(ChangeActor::System),
                        },
                    )
                    .await?;
            }
            ProviderEventKind::PaymentFailed => {
                let mut payment =
                    Self::transaction_row(provider, event, subscription, TransactionStatus::Failed);
                payment.retry_count = subscription.failed_payment_attempts + 1;
                self.service
                    .handle_payment_failure(
                        subscription.id,
                        PaymentFailureData {
                            failure_code: event.failure_code.clone(),
                            failure_message: event.failure_message.clone(),
                        },
                        Some(payment),
                        ChangeActor::System,
                    )
                    .await?;
            }
            ProviderEventKind::SubscriptionCanceled => {
                let payment =
                    Self::transaction_row(provider, event, subscription, TransactionStatus::Canceled);
                self.service
                    .cancel(
                        subscription.id,
                        Some("canceled by payment provider".to_string()),
                        ChangeActor::System,
                        Some(payment),
                    )
                    .await?;
            }
            ProviderEventKind::Ignored(_) => {}
        }
        Ok(())
    }

    fn transaction_row(
        provider: &str,
        event: &ProviderEvent,
        subscription: &SubscriptionEntity,
        status: TransactionStatus,
    ) -> NewPaymentTransactionEntity {
        NewPaymentTransactionEntity {
            subscription_id: Some(subscription.id),
            user_id: subscription.user_id,
            provider: provider.to_string(),
            provider_transaction_id: event.provider_transaction_id.clone(),
            webhook_event_id: event.event_id.clone(),
            status: status.to_string(),
            amount_minor: event.amount_minor.unwrap_or(0),
            currency: event
                .currency
                .clone()
                .unwrap_or_else(|| subscription.currency.clone()),
            failure_code: event.failure_code.clone(),
            failure_message: event.failure_message.clone(),
            retry_count: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::{
        interfaces::payment_gateway::MockPaymentGateway,
        notifications::SubscriptionNotifier,
        usecases::subscriptions::BillingSettings,
    };
    use crate::domain::entities::payment_transactions::PaymentTransactionEntity;
    use crate::domain::repositories::{
        payment_transactions::MockPaymentTransactionRepository, plans::MockPlanRepository,
        subscription_history::MockSubscriptionHistoryRepository,
        subscriptions::{MockSubscriptionRepository, UpdateOutcome},
        usage_counters::MockUsageCounterRepository,
    };
    use crate::domain::value_objects::enums::{
        billing_cycles::BillingCycle, billing_models::BillingModel,
        subscription_statuses::SubscriptionStatus,
    };
    use chrono::Utc;
    use uuid::Uuid;

    type TestProcessor = WebhookProcessor<
        MockPlanRepository,
        MockSubscriptionRepository,
        MockSubscriptionHistoryRepository,
        MockUsageCounterRepository,
        MockPaymentGateway,
        MockPaymentTransactionRepository,
    >;

    fn processor(
        subscription_repo: MockSubscriptionRepository,
        history_repo: MockSubscriptionHistoryRepository,
        usage_repo: MockUsageCounterRepository,
        payment_tx_repo: MockPaymentTransactionRepository,
        gateway: MockPaymentGateway,
    ) -> TestProcessor {
        let service = SubscriptionService::new(
            Arc::new(MockPlanRepository::new()),
            Arc::new(subscription_repo),
            Arc::new(history_repo),
            Arc::new(usage_repo),
            Arc::new(MockPaymentGateway::new()),
            SubscriptionNotifier::new(vec![]),
            BillingSettings::default(),
        );
        WebhookProcessor::new(
            Arc::new(service),
            Arc::new(payment_tx_repo),
            vec![Arc::new(gateway)],
        )
    }

    fn stripe_gateway() -> MockPaymentGateway {
        let mut gateway = MockPaymentGateway::new();
        gateway.expect_provider_name().return_const("stripe");
        gateway
            .expect_signature_header()
            .return_const("stripe-signature");
        gateway
    }

    fn signed_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("stripe-signature", "t=1,v1=abc".parse().unwrap());
        headers
    }

    fn sample_event(kind: ProviderEventKind, subscription_id: Uuid) -> ProviderEvent {
        ProviderEvent {
            event_id: "evt_42".to_string(),
            kind,
            subscription_id: Some(subscription_id),
            provider_subscription_id: Some("sub_42".to_string()),
            provider_transaction_id: Some("txn_42".to_string()),
            amount_minor: Some(900),
            currency: Some("usd".to_string()),
            failure_code: None,
            failure_message: None,
        }
    }

    fn sample_subscription(status: SubscriptionStatus) -> SubscriptionEntity {
        let now = Utc::now();
        SubscriptionEntity {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            plan_id: Uuid::new_v4(),
            billing_model: BillingModel::Recurring,
            billing_cycle: Some(BillingCycle::Monthly),
            status,
            amount_minor: 900,
            currency: "usd".to_string(),
            starts_at: now,
            ends_at: None,
            next_billing_at: None,
            trial_starts_at: None,
            trial_ends_at: None,
            is_trial: false,
            auto_renew: true,
            canceled_at: None,
            payment_provider: Some("stripe".to_string()),
            provider_subscription_id: Some("sub_42".to_string()),
            payment_method_id: None,
            failed_payment_attempts: 0,
            pending_change: None,
            created_at: now,
        }
    }

    fn recorded_transaction(event_id: &str) -> PaymentTransactionEntity {
        PaymentTransactionEntity {
            id: Uuid::new_v4(),
            subscription_id: Some(Uuid::new_v4()),
            user_id: Uuid::new_v4(),
            provider: "stripe".to_string(),
            provider_transaction_id: None,
            webhook_event_id: event_id.to_string(),
            status: "succeeded".to_string(),
            amount_minor: 900,
            currency: "usd".to_string(),
            failure_code: None,
            failure_message: None,
            retry_count: 0,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn rejects_invalid_signature_without_side_effects() {
        let mut gateway = stripe_gateway();
        gateway.expect_verify_webhook_signature().returning(|_, _| {
            Err(WebhookVerifyError::InvalidSignature(
                "digest mismatch".to_string(),
            ))
        });

        // No repository expectations: a bad signature must cause no lookups
        // and no writes.
        let processor = processor(
            MockSubscriptionRepository::new(),
            MockSubscriptionHistoryRepository::new(),
            MockUsageCounterRepository::new(),
            MockPaymentTransactionRepository::new(),
            gateway,
        );

        let result = processor
            .process("stripe", &signed_headers(), b"{}")
            .await;
        assert!(matches!(result, Err(WebhookError::InvalidSignature)));
    }

    #[tokio::test]
    async fn missing_signature_header_is_rejected() {
        let processor = processor(
            MockSubscriptionRepository::new(),
            MockSubscriptionHistoryRepository::new(),
            MockUsageCounterRepository::new(),
            MockPaymentTransactionRepository::new(),
            stripe_gateway(),
        );

        let result = processor.process("stripe", &HeaderMap::new(), b"{}").await;
        assert!(matches!(result, Err(WebhookError::InvalidSignature)));
    }

    #[tokio::test]
    async fn unknown_provider_is_rejected() {
        let processor = processor(
            MockSubscriptionRepository::new(),
            MockSubscriptionHistoryRepository::new(),
            MockUsageCounterRepository::new(),
            MockPaymentTransactionRepository::new(),
            stripe_gateway(),
        );

        let result = processor
            .process("paypal", &signed_headers(), b"{}")
            .await;
        assert!(matches!(result, Err(WebhookError::UnknownProvider(_))));
    }

    #[tokio::test]
    async fn replayed_event_short_circuits_before_dispatch() {
        let subscription = sample_subscription(SubscriptionStatus::Pending);
        let event = sample_event(ProviderEventKind::PaymentSucceeded, subscription.id);

        let mut gateway = stripe_gateway();
        gateway
            .expect_verify_webhook_signature()
            .returning(move |_, _| Ok(sample_event(ProviderEventKind::PaymentSucceeded, subscription.id)));

        let mut payment_tx_repo = MockPaymentTransactionRepository::new();
        let event_id = event.event_id.clone();
        payment_tx_repo
            .expect_find_by_webhook_event_id()
            .returning(move |_| {
                let existing = recorded_transaction(&event_id);
                Box::pin(async move { Ok(Some(existing)) })
            });

        // No subscription repo expectations: a replay never reaches the
        // state machine.
        let processor = processor(
            MockSubscriptionRepository::new(),
            MockSubscriptionHistoryRepository::new(),
            MockUsageCounterRepository::new(),
            payment_tx_repo,
            gateway,
        );

        let outcome = processor
            .process("stripe", &signed_headers(), b"{}")
            .await
            .expect("replay should succeed");
        assert_eq!(outcome, WebhookOutcome::Replay);
    }

    #[tokio::test]
    async fn unhandled_event_kinds_are_acknowledged_and_ignored() {
        let mut gateway = stripe_gateway();
        gateway.expect_verify_webhook_signature().returning(|_, _| {
            Ok(sample_event(
                ProviderEventKind::Ignored("customer.updated".to_string()),
                Uuid::new_v4(),
            ))
        });

        let processor = processor(
            MockSubscriptionRepository::new(),
            MockSubscriptionHistoryRepository::new(),
            MockUsageCounterRepository::new(),
            MockPaymentTransactionRepository::new(),
            gateway,
        );

        let outcome = processor
            .process("stripe", &signed_headers(), b"{}")
            .await
            .expect("ignored event should succeed");
        assert_eq!(outcome, WebhookOutcome::Ignored);
    }

    #[tokio::test]
    async fn payment_succeeded_activates_and_records_the_event() {
        let subscription = sample_subscription(SubscriptionStatus::Pending);
        let subscription_id = subscription.id;

        let mut gateway = stripe_gateway();
        gateway
            .expect_verify_webhook_signature()
            .returning(move |_, _| {
                Ok(sample_event(ProviderEventKind::PaymentSucceeded, subscription_id))
            });

        let mut payment_tx_repo = MockPaymentTransactionRepository::new();
        payment_tx_repo
            .expect_find_by_webhook_event_id()
            .returning(|_| Box::pin(async { Ok(None) }));

        let mut subscription_repo = MockSubscriptionRepository::new();
        let found = subscription.clone();
        subscription_repo.expect_find_by_id().returning(move |_| {
            let found = found.clone();
            Box::pin(async move { Ok(Some(found)) })
        });
        let stored = subscription.clone();
        subscription_repo
            .expect_update_guarded()
            .withf(|_, _, changes, payment| {
                changes.status == Some(SubscriptionStatus::Active)
                    && payment
                        .as_ref()
                        .is_some_and(|event| event.webhook_event_id == "evt_42")
            })
            .times(1)
            .returning(move |_, _, changes, _| {
                let mut updated = stored.clone();
                updated.status = changes.status.unwrap();
                updated.ends_at = changes.ends_at.flatten();
                Box::pin(async move { Ok(UpdateOutcome::Updated(updated)) })
            });

        let mut usage_repo = MockUsageCounterRepository::new();
        usage_repo
            .expect_set_governing_plan()
            .times(1)
            .returning(|_, _| Box::pin(async { Ok(()) }));

        let mut history_repo = MockSubscriptionHistoryRepository::new();
        history_repo
            .expect_append()
            .withf(|entry| entry.action == "activated")
            .times(1)
            .returning(|_| Box::pin(async { Ok(Uuid::new_v4()) }));

        let processor = processor(
            subscription_repo,
            history_repo,
            usage_repo,
            payment_tx_repo,
            gateway,
        );

        let outcome = processor
            .process("stripe", &signed_headers(), b"{}")
            .await
            .expect("dispatch should succeed");
        assert_eq!(outcome, WebhookOutcome::Processed);
    }

    #[tokio::test]
    async fn provider_cancellation_maps_to_cancel() {
        let subscription = sample_subscription(SubscriptionStatus::Active);
        let subscription_id = subscription.id;

        let mut gateway = stripe_gateway();
        gateway
            .expect_verify_webhook_signature()
            .returning(move |_, _| {
                Ok(sample_event(
                    ProviderEventKind::SubscriptionCanceled,
                    subscription_id,
                ))
            });

        let mut payment_tx_repo = MockPaymentTransactionRepository::new();
        payment_tx_repo
            .expect_find_by_webhook_event_id()
            .returning(|_| Box::pin(async { Ok(None) }));

        let mut subscription_repo = MockSubscriptionRepository::new();
        let found = subscription.clone();
        subscription_repo.expect_find_by_id().returning(move |_| {
            let found = found.clone();
            Box::pin(async move { Ok(Some(found)) })
        });
        let stored = subscription.clone();
        subscription_repo
            .expect_update_guarded()
            .withf(|_, _, changes, payment| {
                changes.status == Some(SubscriptionStatus::Canceled)
                    && payment.as_ref().is_some_and(|event| event.status == "canceled")
            })
            .times(1)
            .returning(move |_, _, changes, _| {
                let mut updated = stored.clone();
                updated.status = changes.status.unwrap();
                updated.canceled_at = changes.canceled_at;
                Box::pin(async move { Ok(UpdateOutcome::Updated(updated)) })
            });

        let mut plan_repo = MockPlanRepository::new();
        // Reconstructed processor needs its own service with this plan repo,
        // so build it inline rather than via the helper.
        let default_plan_id = Uuid::new_v4();
        plan_repo.expect_find_default().returning(move || {
            Box::pin(async move {
                Ok(crate::domain::entities::plans::PlanEntity {
                    id: default_plan_id,
                    name: "Free".to_string(),
                    description: None,
                    billing_model: BillingModel::Recurring,
                    price_monthly_minor: 0,
                    price_yearly_minor: 0,
                    price_lifetime_minor: 0,
                    currency: "usd".to_string(),
                    limits: Default::default(),
                    is_default: true,
                    is_active: true,
                    stripe_price_monthly: None,
                    stripe_price_yearly: None,
                    stripe_price_lifetime: None,
                })
            })
        });

        let mut usage_repo = MockUsageCounterRepository::new();
        usage_repo
            .expect_set_governing_plan()
            .times(1)
            .returning(|_, _| Box::pin(async { Ok(()) }));

        let mut history_repo = MockSubscriptionHistoryRepository::new();
        history_repo
            .expect_append()
            .withf(|entry| entry.action == "canceled")
            .times(1)
            .returning(|_| Box::pin(async { Ok(Uuid::new_v4()) }));

        let service = SubscriptionService::new(
            Arc::new(plan_repo),
            Arc::new(subscription_repo),
            Arc::new(history_repo),
            Arc::new(usage_repo),
            Arc::new(MockPaymentGateway::new()),
            SubscriptionNotifier::new(vec![]),
            BillingSettings::default(),
        );
        let processor: TestProcessor = WebhookProcessor::new(
            Arc::new(service),
            Arc::new(payment_tx_repo),
            vec![Arc::new(gateway)],
        );

        let outcome = processor
            .process("stripe", &signed_headers(), b"{}")
            .await
            .expect("cancellation dispatch should succeed");
        assert_eq!(outcome, WebhookOutcome::Processed);
    }

    #[tokio::test]
    async fn unresolvable_subscription_reference_is_not_found() {
        let mut gateway = stripe_gateway();
        gateway.expect_verify_webhook_signature().returning(|_, _| {
            Ok(sample_event(ProviderEventKind::PaymentSucceeded, Uuid::new_v4()))
        });

        let mut payment_tx_repo = MockPaymentTransactionRepository::new();
        payment_tx_repo
            .expect_find_by_webhook_event_id()
            .returning(|_| Box::pin(async { Ok(None) }));

        let mut subscription_repo = MockSubscriptionRepository::new();
        subscription_repo
            .expect_find_by_id()
            .returning(|_| Box::pin(async { Ok(None) }));
        subscription_repo
            .expect_find_by_provider_subscription_id()
            .returning(|_| Box::pin(async { Ok(None) }));

        let processor = processor(
            subscription_repo,
            MockSubscriptionHistoryRepository::new(),
            MockUsageCounterRepository::new(),
            payment_tx_repo,
            gateway,
        );

        let result = processor.process("stripe", &signed_headers(), b"{}").await;
        assert!(matches!(
            result,
            Err(WebhookError::Service(
                SubscriptionError::SubscriptionNotFound
            ))
        ));
    }
}
