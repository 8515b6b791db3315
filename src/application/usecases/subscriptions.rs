use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::application::{
    interfaces::payment_gateway::PaymentGateway,
    notifications::{SubscriptionEvent, SubscriptionNotifier},
};
use crate::domain::{
    entities::{
        payment_transactions::NewPaymentTransactionEntity,
        plans::PlanEntity,
        subscriptions::{InsertSubscriptionEntity, SubscriptionEntity},
    },
    repositories::{
        plans::PlanRepository,
        subscription_history::SubscriptionHistoryRepository,
        subscriptions::{InsertOutcome, SubscriptionRepository, UpdateOutcome},
        usage_counters::UsageCounterRepository,
    },
    value_objects::{
        enums::{
            billing_cycles::BillingCycle, billing_models::BillingModel,
            change_actors::ChangeActor, history_actions::HistoryAction,
            subscription_statuses::SubscriptionStatus,
        },
        plans::PlanDto,
        subscriptions::{
            CurrentSubscriptionDto, NewSubscriptionRequest, PendingPlanChange, PlanChangeKind,
            SubscriptionChanges,
        },
        webhooks::PaymentFailureData,
    },
};
use crate::domain::entities::subscription_history::NewSubscriptionHistoryEntity;

/// Payment failures tolerated before a subscription suspends.
pub const MAX_PAYMENT_RETRIES: i32 = 3;

#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("plan not found")]
    PlanNotFound,
    #[error("subscription not found")]
    SubscriptionNotFound,
    #[error("an open subscription already exists for this user")]
    AlreadySubscribed,
    #[error("subscription already canceled")]
    AlreadyCanceled,
    #[error("subscription already expired")]
    AlreadyExpired,
    #[error("invalid plan change: {0}")]
    InvalidPlanChange(String),
    #[error("invalid checkout: {0}")]
    InvalidCheckout(String),
    #[error("billing cycle is required for recurring plans")]
    MissingBillingCycle,
    #[error("missing or inactive plan price: {0}")]
    MissingPrice(&'static str),
    #[error("subscription management is disabled")]
    SubscriptionsDisabled,
    #[error("payment provider unavailable")]
    ProviderUnavailable(anyhow::Error),
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl SubscriptionError {
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            SubscriptionError::PlanNotFound | SubscriptionError::SubscriptionNotFound => {
                StatusCode::NOT_FOUND
            }
            SubscriptionError::AlreadySubscribed
            | SubscriptionError::AlreadyCanceled
            | SubscriptionError::AlreadyExpired => StatusCode::CONFLICT,
            SubscriptionError::InvalidPlanChange(_)
            | SubscriptionError::InvalidCheckout(_)
            | SubscriptionError::MissingBillingCycle
            | SubscriptionError::MissingPrice(_) => StatusCode::BAD_REQUEST,
            SubscriptionError::SubscriptionsDisabled => StatusCode::SERVICE_UNAVAILABLE,
            SubscriptionError::ProviderUnavailable(_) => StatusCode::BAD_GATEWAY,
            SubscriptionError::InvariantViolation(_) | SubscriptionError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

pub type UseCaseResult<T> = std::result::Result<T, SubscriptionError>;

/// Data accompanying an activation, usually sourced from a provider event.
#[derive(Debug, Clone, Default)]
pub struct ActivationData {
    pub provider_subscription_id: Option<String>,
    pub payment_method_id: Option<String>,
    pub payment: Option<NewPaymentTransactionEntity>,
    pub actor: Option<ChangeActor>,
}

/// Per-invocation tally of the expiry sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpireSummary {
    pub expired: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Feature switches passed at construction instead of read from the process
/// environment at call time.
#[derive(Debug, Clone)]
pub struct BillingSettings {
    pub subscriptions_enabled: bool,
}

impl Default for BillingSettings {
    fn default() -> Self {
        Self {
            subscriptions_enabled: true,
        }
    }
}

/// The only component allowed to mutate a subscription. Direct user requests
/// and provider webhooks both terminate here; per-subscription serialization
/// happens in the repository (row locks plus expected-status guards).
pub struct SubscriptionService<P, S, H, U, G>
where
    P: PlanRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
    H: SubscriptionHistoryRepository + Send + Sync + 'static,
    U: UsageCounterRepository + Send + Sync + 'static,
    G: PaymentGateway + Send + Sync + 'static,
{
    plan_repo: Arc<P>,
    subscription_repo: Arc<S>,
    history_repo: Arc<H>,
    usage_repo: Arc<U>,
    gateway: Arc<G>,
    notifier: SubscriptionNotifier,
    settings: BillingSettings,
}

impl<P, S, H, U, G> SubscriptionService<P, S, H, U, G>
where
    P: PlanRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
    H: SubscriptionHistoryRepository + Send + Sync + 'static,
    U: UsageCounterRepository + Send + Sync + 'static,
    G: PaymentGateway + Send + Sync + 'static,
{
    pub fn new(
        plan_repo: Arc<P>,
        subscription_repo: Arc<S>,
        history_repo: Arc<H>,
        usage_repo: Arc<U>,
        gateway: Arc<G>,
        notifier: SubscriptionNotifier,
        settings: BillingSettings,
    ) -> Self {
        Self {
            plan_repo,
            subscription_repo,
            history_repo,
            usage_repo,
            gateway,
            notifier,
            settings,
        }
    }

    pub async fn list_plans(&self) -> UseCaseResult<Vec<PlanDto>> {
        let plans = self.plan_repo.list_active_plans().await.map_err(|err| {
            error!(db_error = ?err, "subscriptions: failed to list active plans");
            SubscriptionError::Internal(err)
        })?;
        debug!(plan_count = plans.len(), "subscriptions: active plans loaded");
        Ok(plans.into_iter().map(PlanDto::from).collect())
    }

    /// Creates a subscription in `pending`, or directly in `active` when the
    /// computed amount is zero. At most one open subscription per user; the
    /// check-then-insert is serialized per user inside the repository.
    pub async fn create(
        &self,
        request: NewSubscriptionRequest,
    ) -> UseCaseResult<SubscriptionEntity> {
        self.ensure_enabled()?;

        let user_id = request.user_id;
        info!(
            %user_id,
            plan_id = %request.plan_id,
            billing_cycle = ?request.billing_cycle,
            "subscriptions: create requested"
        );

        let plan = self.load_active_plan(request.plan_id).await?;
        let billing_cycle = match plan.billing_model {
            BillingModel::Lifetime => None,
            BillingModel::Recurring => request.billing_cycle,
        };
        let amount_minor = Self::amount_for(&plan, billing_cycle)?;

        let status = if amount_minor == 0 {
            SubscriptionStatus::Active
        } else {
            SubscriptionStatus::Pending
        };
        let now = Utc::now();
        let trial_window = request
            .trial_days
            .filter(|days| *days > 0)
            .map(|days| (now, now + Duration::days(days)));

        let insert = InsertSubscriptionEntity {
            user_id,
            plan_id: plan.id,
            billing_model: plan.billing_model.to_string(),
            billing_cycle: billing_cycle.map(|cycle| cycle.to_string()),
            status: status.to_string(),
            amount_minor,
            currency: plan.currency.clone(),
            starts_at: now,
            ends_at: None,
            next_billing_at: None,
            trial_starts_at: trial_window.map(|(start, _)| start),
            trial_ends_at: trial_window.map(|(_, end)| end),
            is_trial: trial_window.is_some(),
            auto_renew: plan.billing_model == BillingModel::Recurring && amount_minor > 0,
            payment_provider: request.payment_provider.clone(),
            payment_method_id: request.payment_method_id.clone(),
            metadata: json!({}),
        };

        let subscription = match self
            .subscription_repo
            .insert_unless_open_exists(insert)
            .await
            .map_err(|err| {
                error!(%user_id, db_error = ?err, "subscriptions: failed to insert subscription");
                SubscriptionError::Internal(err)
            })? {
            InsertOutcome::Created(subscription) => subscription,
            InsertOutcome::AlreadyOpen(existing) => {
                warn!(
                    %user_id,
                    existing_subscription_id = %existing.id,
                    existing_status = %existing.status,
                    "subscriptions: user already holds an open subscription"
                );
                return Err(SubscriptionError::AlreadySubscribed);
            }
        };

        if subscription.status == SubscriptionStatus::Active {
            self.sync_governing_plan(user_id, plan.id).await?;
        }

        self.record_history(NewSubscriptionHistoryEntity {
            subscription_id: subscription.id,
            user_id,
            action: HistoryAction::Created.to_string(),
            previous_status: None,
            new_status: subscription.status.to_string(),
            previous_plan_id: None,
            new_plan_id: Some(plan.id),
            previous_amount_minor: None,
            new_amount_minor: Some(amount_minor),
            reason: None,
            changed_by: request.actor.to_string(),
            metadata: json!({}),
        })
        .await;

        info!(
            %user_id,
            subscription_id = %subscription.id,
            status = %subscription.status,
            amount_minor,
            "subscriptions: subscription created"
        );
        Ok(subscription)
    }

    /// Records the intent to change plan without touching the current plan,
    /// amount, or limits; payment confirmation (activation) applies it.
    pub async fn request_plan_change(
        &self,
        subscription_id: Uuid,
        target_plan_id: Uuid,
        kind: PlanChangeKind,
        actor: ChangeActor,
    ) -> UseCaseResult<SubscriptionEntity> {
        self.ensure_enabled()?;

        let subscription = self.load_subscription(subscription_id).await?;
        if subscription.status != SubscriptionStatus::Active {
            warn!(
                %subscription_id,
                status = %subscription.status,
                "subscriptions: plan change requires an active subscription"
            );
            return Err(SubscriptionError::InvalidPlanChange(format!(
                "subscription is {}",
                subscription.status
            )));
        }
        if target_plan_id == subscription.plan_id {
            return Err(SubscriptionError::InvalidPlanChange(
                "subscription is already on this plan".to_string(),
            ));
        }
        let target_plan = self.load_active_plan(target_plan_id).await?;

        let requested_at = Utc::now();
        let pending_change = match kind {
            PlanChangeKind::Upgrade => PendingPlanChange::Upgrade {
                target_plan_id: target_plan.id,
                requested_at,
            },
            PlanChangeKind::Downgrade => PendingPlanChange::Downgrade {
                target_plan_id: target_plan.id,
                requested_at,
            },
        };

        let changes = SubscriptionChanges {
            status: Some(SubscriptionStatus::Pending),
            pending_change: Some(Some(pending_change)),
            ..SubscriptionChanges::default()
        };

        let updated = match self
            .subscription_repo
            .update_guarded(
                subscription_id,
                &[SubscriptionStatus::Active],
                changes,
                None,
            )
            .await
            .map_err(|err| {
                error!(%subscription_id, db_error = ?err, "subscriptions: plan change update failed");
                SubscriptionError::Internal(err)
            })? {
            UpdateOutcome::Updated(updated) => updated,
            UpdateOutcome::StatusMismatch(fresh) => {
                warn!(
                    %subscription_id,
                    status = %fresh.status,
                    "subscriptions: concurrent transition preempted plan change"
                );
                return Err(SubscriptionError::InvalidPlanChange(format!(
                    "subscription is {}",
                    fresh.status
                )));
            }
            UpdateOutcome::NotFound => return Err(SubscriptionError::SubscriptionNotFound),
            UpdateOutcome::DuplicateEvent => {
                return Err(SubscriptionError::Internal(anyhow::anyhow!(
                    "unexpected duplicate-event outcome without payment event"
                )));
            }
        };

        let action = match kind {
            PlanChangeKind::Upgrade => HistoryAction::UpgradeRequested,
            PlanChangeKind::Downgrade => HistoryAction::DowngradeRequested,
        };
        // Amount stays unknown until payment confirms the new plan.
        self.record_history(NewSubscriptionHistoryEntity {
            subscription_id,
            user_id: subscription.user_id,
            action: action.to_string(),
            previous_status: Some(subscription.status.to_string()),
            new_status: updated.status.to_string(),
            previous_plan_id: Some(subscription.plan_id),
            new_plan_id: Some(target_plan.id),
            previous_amount_minor: Some(subscription.amount_minor),
            new_amount_minor: None,
            reason: None,
            changed_by: actor.to_string(),
            metadata: json!({}),
        })
        .await;

        info!(
            %subscription_id,
            target_plan_id = %target_plan.id,
            kind = ?kind,
            "subscriptions: plan change recorded, awaiting payment"
        );
        Ok(updated)
    }

    /// The only path into `active`. Applies a pending plan change, computes
    /// period dates when unset, and records the payment event in the same
    /// repository transaction. Idempotent for already-active subscriptions.
    pub async fn activate(
        &self,
        subscription_id: Uuid,
        activation: ActivationData,
    ) -> UseCaseResult<SubscriptionEntity> {
        let subscription = self.load_subscription(subscription_id).await?;
        let actor = activation.actor.unwrap_or(ChangeActor::System);

        match subscription.status {
            SubscriptionStatus::Canceled => return Err(SubscriptionError::AlreadyCanceled),
            SubscriptionStatus::Expired => return Err(SubscriptionError::AlreadyExpired),
            SubscriptionStatus::Active if subscription.pending_change.is_none() => {
                return self
                    .acknowledge_active_replay(subscription, activation.payment)
                    .await;
            }
            _ => {}
        }

        // The plan in effect after activation: the pending change target when
        // one is queued, otherwise the subscribed plan.
        let (effective_plan, amount_minor) = match subscription.pending_change.as_ref() {
            Some(change) => {
                let target = self
                    .plan_repo
                    .find_by_id(change.target_plan_id())
                    .await
                    .map_err(|err| {
                        error!(
                            %subscription_id,
                            target_plan_id = %change.target_plan_id(),
                            db_error = ?err,
                            "subscriptions: failed to load pending-change target plan"
                        );
                        SubscriptionError::Internal(err)
                    })?
                    .filter(|plan| plan.is_active);
                let Some(target) = target else {
                    error!(
                        %subscription_id,
                        target_plan_id = %change.target_plan_id(),
                        "subscriptions: pending plan change references a missing plan"
                    );
                    return Err(SubscriptionError::InvariantViolation(
                        "pending plan change references a missing plan".to_string(),
                    ));
                };
                let amount = Self::amount_for(&target, subscription.billing_cycle)?;
                (Some(target), amount)
            }
            None => (None, subscription.amount_minor),
        };

        let now = Utc::now();
        let billing_model = effective_plan
            .as_ref()
            .map(|plan| plan.billing_model)
            .unwrap_or(subscription.billing_model);
        let period_end = match (subscription.ends_at, billing_model) {
            (_, BillingModel::Lifetime) => None,
            (Some(existing), _) => Some(existing),
            (None, BillingModel::Recurring) => {
                let cycle = subscription
                    .billing_cycle
                    .unwrap_or(BillingCycle::Monthly);
                Some(now + cycle.period())
            }
        };

        let changes = SubscriptionChanges {
            status: Some(SubscriptionStatus::Active),
            plan_id: effective_plan.as_ref().map(|plan| plan.id),
            amount_minor: (amount_minor != subscription.amount_minor).then_some(amount_minor),
            ends_at: (subscription.ends_at != period_end).then_some(period_end),
            next_billing_at: (billing_model == BillingModel::Recurring
                && subscription.next_billing_at.is_none())
            .then_some(period_end),
            failed_payment_attempts: Some(0),
            pending_change: subscription.pending_change.is_some().then_some(None),
            provider_subscription_id: activation.provider_subscription_id.clone(),
            payment_method_id: activation.payment_method_id.clone(),
            ..SubscriptionChanges::default()
        };

        let updated = match self
            .subscription_repo
            .update_guarded(
                subscription_id,
                &[
                    SubscriptionStatus::Pending,
                    SubscriptionStatus::Suspended,
                    SubscriptionStatus::Active,
                ],
                changes,
                activation.payment,
            )
            .await
            .map_err(|err| {
                error!(%subscription_id, db_error = ?err, "subscriptions: activation update failed");
                SubscriptionError::Internal(err)
            })? {
            UpdateOutcome::Updated(updated) => updated,
            UpdateOutcome::StatusMismatch(fresh) => {
                return match fresh.status {
                    // A concurrent activation won the race; nothing to redo.
                    SubscriptionStatus::Active => Ok(fresh),
                    SubscriptionStatus::Canceled => Err(SubscriptionError::AlreadyCanceled),
                    SubscriptionStatus::Expired => Err(SubscriptionError::AlreadyExpired),
                    _ => Err(SubscriptionError::Internal(anyhow::anyhow!(
                        "unexpected status {} during activation",
                        fresh.status
                    ))),
                };
            }
            UpdateOutcome::DuplicateEvent => {
                info!(
                    %subscription_id,
                    "subscriptions: payment event already recorded, skipping reapplication"
                );
                return Ok(subscription);
            }
            UpdateOutcome::NotFound => return Err(SubscriptionError::SubscriptionNotFound),
        };

        self.sync_governing_plan(updated.user_id, updated.plan_id)
            .await?;

        self.record_history(NewSubscriptionHistoryEntity {
            subscription_id,
            user_id: updated.user_id,
            action: HistoryAction::Activated.to_string(),
            previous_status: Some(subscription.status.to_string()),
            new_status: updated.status.to_string(),
            previous_plan_id: Some(subscription.plan_id),
            new_plan_id: Some(updated.plan_id),
            previous_amount_minor: Some(subscription.amount_minor),
            new_amount_minor: Some(updated.amount_minor),
            reason: None,
            changed_by: actor.to_string(),
            metadata: json!({}),
        })
        .await;

        self.notifier.try_notify(SubscriptionEvent::Activated {
            subscription_id: updated.id,
            user_id: updated.user_id,
            plan_id: updated.plan_id,
        });

        info!(
            %subscription_id,
            plan_id = %updated.plan_id,
            amount_minor = updated.amount_minor,
            "subscriptions: subscription activated"
        );
        Ok(updated)
    }

    /// Replayed or renewal success on an already-active subscription: record
    /// the payment event (gated on its idempotency key) and reset the failure
    /// counter, but change nothing else and append no history.
    async fn acknowledge_active_replay(
        &self,
        subscription: SubscriptionEntity,
        payment: Option<NewPaymentTransactionEntity>,
    ) -> UseCaseResult<SubscriptionEntity> {
        let Some(payment) = payment else {
            debug!(
                subscription_id = %subscription.id,
                "subscriptions: activation replay on active subscription"
            );
            return Ok(subscription);
        };

        let changes = SubscriptionChanges {
            failed_payment_attempts: Some(0),
            ..SubscriptionChanges::default()
        };
        match self
            .subscription_repo
            .update_guarded(
                subscription.id,
                &[SubscriptionStatus::Active],
                changes,
                Some(payment),
            )
            .await
            .map_err(|err| {
                error!(
                    subscription_id = %subscription.id,
                    db_error = ?err,
                    "subscriptions: failed to record payment on active subscription"
                );
                SubscriptionError::Internal(err)
            })? {
            UpdateOutcome::Updated(updated) => Ok(updated),
            UpdateOutcome::DuplicateEvent | UpdateOutcome::StatusMismatch(_) => Ok(subscription),
            UpdateOutcome::NotFound => Err(SubscriptionError::SubscriptionNotFound),
        }
    }

    /// Increments the failure counter; the third consecutive failure suspends
    /// a pending subscription, and likewise an active one whose renewal keeps
    /// failing (retry grace below the threshold).
    pub async fn handle_payment_failure(
        &self,
        subscription_id: Uuid,
        failure: PaymentFailureData,
        payment: Option<NewPaymentTransactionEntity>,
        actor: ChangeActor,
    ) -> UseCaseResult<SubscriptionEntity> {
        let subscription = self.load_subscription(subscription_id).await?;
        match subscription.status {
            SubscriptionStatus::Canceled => return Err(SubscriptionError::AlreadyCanceled),
            SubscriptionStatus::Expired => return Err(SubscriptionError::AlreadyExpired),
            _ => {}
        }

        let attempts = subscription.failed_payment_attempts + 1;
        let next_status = if attempts >= MAX_PAYMENT_RETRIES
            && matches!(
                subscription.status,
                SubscriptionStatus::Pending | SubscriptionStatus::Active
            ) {
            SubscriptionStatus::Suspended
        } else {
            subscription.status
        };

        warn!(
            %subscription_id,
            attempts,
            status = %subscription.status,
            next_status = %next_status,
            failure_code = ?failure.failure_code,
            "subscriptions: payment failure recorded"
        );

        let changes = SubscriptionChanges {
            status: Some(next_status),
            failed_payment_attempts: Some(attempts),
            ..SubscriptionChanges::default()
        };

        let updated = match self
            .subscription_repo
            .update_guarded(subscription_id, &[subscription.status], changes, payment)
            .await
            .map_err(|err| {
                error!(%subscription_id, db_error = ?err, "subscriptions: payment failure update failed");
                SubscriptionError::Internal(err)
            })? {
            UpdateOutcome::Updated(updated) => updated,
            UpdateOutcome::StatusMismatch(fresh) => {
                return match fresh.status {
                    SubscriptionStatus::Canceled => Err(SubscriptionError::AlreadyCanceled),
                    SubscriptionStatus::Expired => Err(SubscriptionError::AlreadyExpired),
                    _ => Err(SubscriptionError::Internal(anyhow::anyhow!(
                        "concurrent transition during payment failure handling"
                    ))),
                };
            }
            UpdateOutcome::DuplicateEvent => {
                info!(%subscription_id, "subscriptions: payment failure event already recorded");
                return Ok(subscription);
            }
            UpdateOutcome::NotFound => return Err(SubscriptionError::SubscriptionNotFound),
        };

        self.record_history(NewSubscriptionHistoryEntity {
            subscription_id,
            user_id: updated.user_id,
            action: HistoryAction::PaymentFailed.to_string(),
            previous_status: Some(subscription.status.to_string()),
            new_status: updated.status.to_string(),
            previous_plan_id: Some(subscription.plan_id),
            new_plan_id: Some(updated.plan_id),
            previous_amount_minor: Some(subscription.amount_minor),
            new_amount_minor: Some(updated.amount_minor),
            reason: failure.failure_message.clone(),
            changed_by: actor.to_string(),
            metadata: json!({
                "failure_code": failure.failure_code,
                "failure_message": failure.failure_message,
                "attempts": attempts,
            }),
        })
        .await;

        Ok(updated)
    }

    /// Terminal transition. Idempotent: cancelling an already-canceled
    /// subscription returns the stored row without a second history entry.
    pub async fn cancel(
        &self,
        subscription_id: Uuid,
        reason: Option<String>,
        actor: ChangeActor,
        payment: Option<NewPaymentTransactionEntity>,
    ) -> UseCaseResult<SubscriptionEntity> {
        let subscription = self.load_subscription(subscription_id).await?;
        match subscription.status {
            SubscriptionStatus::Canceled => {
                info!(%subscription_id, "subscriptions: cancel replay on canceled subscription");
                return Ok(subscription);
            }
            SubscriptionStatus::Expired => return Err(SubscriptionError::AlreadyExpired),
            _ => {}
        }

        let changes = SubscriptionChanges {
            status: Some(SubscriptionStatus::Canceled),
            canceled_at: Some(Utc::now()),
            auto_renew: Some(false),
            pending_change: subscription.pending_change.is_some().then_some(None),
            ..SubscriptionChanges::default()
        };

        let updated = match self
            .subscription_repo
            .update_guarded(
                subscription_id,
                &[
                    SubscriptionStatus::Pending,
                    SubscriptionStatus::Active,
                    SubscriptionStatus::Suspended,
                ],
                changes,
                payment,
            )
            .await
            .map_err(|err| {
                error!(%subscription_id, db_error = ?err, "subscriptions: cancel update failed");
                SubscriptionError::Internal(err)
            })? {
            UpdateOutcome::Updated(updated) => updated,
            UpdateOutcome::StatusMismatch(fresh) => {
                return match fresh.status {
                    SubscriptionStatus::Canceled => Ok(fresh),
                    SubscriptionStatus::Expired => Err(SubscriptionError::AlreadyExpired),
                    _ => Err(SubscriptionError::Internal(anyhow::anyhow!(
                        "concurrent transition during cancellation"
                    ))),
                };
            }
            UpdateOutcome::DuplicateEvent => {
                info!(%subscription_id, "subscriptions: cancellation event already recorded");
                return Ok(subscription);
            }
            UpdateOutcome::NotFound => return Err(SubscriptionError::SubscriptionNotFound),
        };

        let default_plan = self.load_default_plan().await?;
        self.sync_governing_plan(updated.user_id, default_plan.id)
            .await?;

        self.record_history(NewSubscriptionHistoryEntity {
            subscription_id,
            user_id: updated.user_id,
            action: HistoryAction::Canceled.to_string(),
            previous_status: Some(subscription.status.to_string()),
            new_status: updated.status.to_string(),
            previous_plan_id: Some(subscription.plan_id),
            new_plan_id: Some(updated.plan_id),
            previous_amount_minor: Some(subscription.amount_minor),
            new_amount_minor: Some(updated.amount_minor),
            reason: reason.clone(),
            changed_by: actor.to_string(),
            metadata: json!({}),
        })
        .await;

        self.notifier.try_notify(SubscriptionEvent::Canceled {
            subscription_id: updated.id,
            user_id: updated.user_id,
            reason,
        });

        info!(%subscription_id, "subscriptions: subscription canceled");
        Ok(updated)
    }

    /// Sweep for active subscriptions whose period lapsed without auto-renew.
    /// Each subscription is processed independently so one failure does not
    /// block the rest.
    pub async fn expire_lapsed(&self, as_of: DateTime<Utc>) -> UseCaseResult<ExpireSummary> {
        let lapsed = self
            .subscription_repo
            .list_expirable(as_of)
            .await
            .map_err(|err| {
                error!(db_error = ?err, "subscriptions: failed to list expirable subscriptions");
                SubscriptionError::Internal(err)
            })?;
        if lapsed.is_empty() {
            return Ok(ExpireSummary::default());
        }

        let default_plan = self.load_default_plan().await?;
        let mut summary = ExpireSummary::default();

        for subscription in lapsed {
            let changes = SubscriptionChanges {
                status: Some(SubscriptionStatus::Expired),
                auto_renew: Some(false),
                pending_change: subscription.pending_change.is_some().then_some(None),
                ..SubscriptionChanges::default()
            };
            let outcome = self
                .subscription_repo
                .update_guarded(
                    subscription.id,
                    &[SubscriptionStatus::Active],
                    changes,
                    None,
                )
                .await;

            match outcome {
                Ok(UpdateOutcome::Updated(updated)) => {
                    if let Err(err) = self
                        .usage_repo
                        .set_governing_plan(updated.user_id, default_plan.id)
                        .await
                    {
                        error!(
                            subscription_id = %updated.id,
                            db_error = ?err,
                            "subscriptions: failed to reset governing plan after expiry"
                        );
                        summary.failed += 1;
                        continue;
                    }
                    self.record_history(NewSubscriptionHistoryEntity {
                        subscription_id: updated.id,
                        user_id: updated.user_id,
                        action: HistoryAction::Expired.to_string(),
                        previous_status: Some(subscription.status.to_string()),
                        new_status: updated.status.to_string(),
                        previous_plan_id: Some(subscription.plan_id),
                        new_plan_id: Some(updated.plan_id),
                        previous_amount_minor: Some(subscription.amount_minor),
                        new_amount_minor: Some(updated.amount_minor),
                        reason: Some("billing period lapsed without auto-renew".to_string()),
                        changed_by: ChangeActor::System.to_string(),
                        metadata: json!({}),
                    })
                    .await;
                    summary.expired += 1;
                }
                Ok(_) => {
                    debug!(
                        subscription_id = %subscription.id,
                        "subscriptions: skipped concurrently-transitioned subscription in sweep"
                    );
                    summary.skipped += 1;
                }
                Err(err) => {
                    error!(
                        subscription_id = %subscription.id,
                        db_error = ?err,
                        "subscriptions: failed to expire subscription"
                    );
                    summary.failed += 1;
                }
            }
        }

        info!(
            expired = summary.expired,
            skipped = summary.skipped,
            failed = summary.failed,
            "subscriptions: expiry sweep finished"
        );
        Ok(summary)
    }

    /// Starts a provider checkout session for the user's pending subscription.
    pub async fn start_checkout(
        &self,
        user_id: Uuid,
        billing_cycle: Option<BillingCycle>,
    ) -> UseCaseResult<String> {
        self.ensure_enabled()?;

        let subscription = self
            .subscription_repo
            .find_open_for_user(user_id)
            .await
            .map_err(|err| {
                error!(%user_id, db_error = ?err, "subscriptions: failed to load open subscription");
                SubscriptionError::Internal(err)
            })?
            .ok_or(SubscriptionError::SubscriptionNotFound)?;

        if subscription.status != SubscriptionStatus::Pending {
            return Err(SubscriptionError::InvalidCheckout(
                "no pending subscription awaiting payment".to_string(),
            ));
        }

        // Checkout pays for the pending-change target when one is queued.
        let plan_id = subscription
            .pending_change
            .as_ref()
            .map(|change| change.target_plan_id())
            .unwrap_or(subscription.plan_id);
        let plan = self.load_active_plan(plan_id).await?;
        let cycle = billing_cycle.or(subscription.billing_cycle);
        if Self::amount_for(&plan, cycle)? == 0 {
            return Err(SubscriptionError::InvalidCheckout(
                "free plan does not require checkout".to_string(),
            ));
        }

        let (price_id, mode) = Self::pick_price_id(&plan, cycle)?;
        let metadata = HashMap::from([
            ("user_id".to_string(), user_id.to_string()),
            ("subscription_id".to_string(), subscription.id.to_string()),
            ("plan_id".to_string(), plan.id.to_string()),
        ]);

        info!(
            %user_id,
            subscription_id = %subscription.id,
            plan_id = %plan.id,
            price_id = %price_id,
            mode,
            "subscriptions: creating checkout session"
        );

        let checkout_url = self
            .gateway
            .create_checkout_session(&price_id, mode, None, metadata)
            .await
            .map_err(|err| {
                error!(
                    %user_id,
                    subscription_id = %subscription.id,
                    error = ?err,
                    "subscriptions: checkout session creation failed"
                );
                SubscriptionError::ProviderUnavailable(err)
            })?;

        Ok(checkout_url)
    }

    /// Resolves the caller's open subscription and requests the change on it.
    pub async fn request_plan_change_for_user(
        &self,
        user_id: Uuid,
        target_plan_id: Uuid,
        kind: PlanChangeKind,
        actor: ChangeActor,
    ) -> UseCaseResult<SubscriptionEntity> {
        let subscription = self
            .subscription_repo
            .find_open_for_user(user_id)
            .await
            .map_err(|err| {
                error!(%user_id, db_error = ?err, "subscriptions: failed to load open subscription");
                SubscriptionError::Internal(err)
            })?
            .ok_or(SubscriptionError::SubscriptionNotFound)?;
        self.request_plan_change(subscription.id, target_plan_id, kind, actor)
            .await
    }

    /// Resolves the caller's current subscription and cancels it.
    pub async fn cancel_for_user(
        &self,
        user_id: Uuid,
        reason: Option<String>,
        actor: ChangeActor,
    ) -> UseCaseResult<SubscriptionEntity> {
        let subscription = self
            .subscription_repo
            .find_current_for_user(user_id)
            .await
            .map_err(|err| {
                error!(%user_id, db_error = ?err, "subscriptions: failed to load current subscription");
                SubscriptionError::Internal(err)
            })?
            .ok_or(SubscriptionError::SubscriptionNotFound)?;
        self.cancel(subscription.id, reason, actor, None).await
    }

    /// Read path backing "fetch current subscription + history".
    pub async fn current_subscription(
        &self,
        user_id: Uuid,
    ) -> UseCaseResult<Option<CurrentSubscriptionDto>> {
        let subscription = match self
            .subscription_repo
            .find_current_for_user(user_id)
            .await
            .map_err(|err| {
                error!(%user_id, db_error = ?err, "subscriptions: failed to load current subscription");
                SubscriptionError::Internal(err)
            })? {
            Some(subscription) => subscription,
            None => return Ok(None),
        };

        let plan = self
            .plan_repo
            .find_by_id(subscription.plan_id)
            .await
            .map_err(|err| {
                error!(
                    %user_id,
                    plan_id = %subscription.plan_id,
                    db_error = ?err,
                    "subscriptions: failed to load subscription plan"
                );
                SubscriptionError::Internal(err)
            })?
            .ok_or(SubscriptionError::PlanNotFound)?;

        let history = self
            .history_repo
            .list_for_subscription(subscription.id)
            .await
            .map_err(|err| {
                error!(
                    subscription_id = %subscription.id,
                    db_error = ?err,
                    "subscriptions: failed to load subscription history"
                );
                SubscriptionError::Internal(err)
            })?;

        Ok(Some(CurrentSubscriptionDto {
            subscription: subscription.into(),
            plan_name: plan.name,
            history: history.into_iter().map(Into::into).collect(),
        }))
    }

    /// Resolves the subscription a provider event refers to: explicit
    /// subscription metadata first, then the provider's subscription id.
    pub async fn resolve_for_event(
        &self,
        subscription_id: Option<Uuid>,
        provider_subscription_id: Option<&str>,
    ) -> UseCaseResult<SubscriptionEntity> {
        if let Some(id) = subscription_id {
            if let Some(subscription) =
                self.subscription_repo.find_by_id(id).await.map_err(|err| {
                    error!(subscription_id = %id, db_error = ?err, "subscriptions: event lookup failed");
                    SubscriptionError::Internal(err)
                })?
            {
                return Ok(subscription);
            }
        }
        if let Some(provider_id) = provider_subscription_id {
            if let Some(subscription) = self
                .subscription_repo
                .find_by_provider_subscription_id(provider_id)
                .await
                .map_err(|err| {
                    error!(
                        provider_subscription_id = provider_id,
                        db_error = ?err,
                        "subscriptions: event lookup by provider id failed"
                    );
                    SubscriptionError::Internal(err)
                })?
            {
                return Ok(subscription);
            }
        }
        Err(SubscriptionError::SubscriptionNotFound)
    }

    fn ensure_enabled(&self) -> UseCaseResult<()> {
        if self.settings.subscriptions_enabled {
            Ok(())
        } else {
            warn!("subscriptions: management disabled by configuration");
            Err(SubscriptionError::SubscriptionsDisabled)
        }
    }

    async fn load_subscription(
        &self,
        subscription_id: Uuid,
    ) -> UseCaseResult<SubscriptionEntity> {
        self.subscription_repo
            .find_by_id(subscription_id)
            .await
            .map_err(|err| {
                error!(%subscription_id, db_error = ?err, "subscriptions: failed to load subscription");
                SubscriptionError::Internal(err)
            })?
            .ok_or(SubscriptionError::SubscriptionNotFound)
    }

    async fn load_active_plan(&self, plan_id: Uuid) -> UseCaseResult<PlanEntity> {
        let plan = self.plan_repo.find_by_id(plan_id).await.map_err(|err| {
            error!(%plan_id, db_error = ?err, "subscriptions: failed to load plan");
            SubscriptionError::Internal(err)
        })?;
        match plan {
            Some(plan) if plan.is_active => Ok(plan),
            _ => {
                warn!(%plan_id, "subscriptions: plan missing or inactive");
                Err(SubscriptionError::PlanNotFound)
            }
        }
    }

    async fn load_default_plan(&self) -> UseCaseResult<PlanEntity> {
        self.plan_repo.find_default().await.map_err(|err| {
            error!(db_error = ?err, "subscriptions: failed to load default plan");
            SubscriptionError::Internal(err)
        })
    }

    async fn sync_governing_plan(&self, user_id: Uuid, plan_id: Uuid) -> UseCaseResult<()> {
        self.usage_repo
            .set_governing_plan(user_id, plan_id)
            .await
            .map_err(|err| {
                error!(
                    %user_id,
                    %plan_id,
                    db_error = ?err,
                    "subscriptions: failed to synchronize governing plan"
                );
                SubscriptionError::Internal(err)
            })
    }

    /// History is append-only and best-effort: a failed write is logged and
    /// never fails or rolls back the transition it describes.
    async fn record_history(&self, entry: NewSubscriptionHistoryEntity) {
        let subscription_id = entry.subscription_id;
        let action = entry.action.clone();
        if let Err(err) = self.history_repo.append(entry).await {
            error!(
                %subscription_id,
                action,
                db_error = ?err,
                "subscriptions: failed to append history entry"
            );
        }
    }

    fn amount_for(plan: &PlanEntity, cycle: Option<BillingCycle>) -> UseCaseResult<i32> {
        match plan.billing_model {
            BillingModel::Lifetime => Ok(plan.price_lifetime_minor),
            BillingModel::Recurring => match cycle {
                Some(BillingCycle::Monthly) => Ok(plan.price_monthly_minor),
                Some(BillingCycle::Yearly) => Ok(plan.price_yearly_minor),
                None => Err(SubscriptionError::MissingBillingCycle),
            },
        }
    }

    fn pick_price_id(
        plan: &PlanEntity,
        cycle: Option<BillingCycle>,
    ) -> UseCaseResult<(String, &'static str)> {
        match plan.billing_model {
            BillingModel::Lifetime => plan
                .stripe_price_lifetime
                .clone()
                .map(|price| (price, "payment"))
                .ok_or(SubscriptionError::MissingPrice("stripe_price_lifetime")),
            BillingModel::Recurring => match cycle {
                Some(BillingCycle::Monthly) => plan
                    .stripe_price_monthly
                    .clone()
                    .map(|price| (price, "subscription"))
                    .ok_or(SubscriptionError::MissingPrice("stripe_price_monthly")),
                Some(BillingCycle::Yearly) => plan
                    .stripe_price_yearly
                    .clone()
                    .map(|price| (price, "subscription"))
                    .ok_or(SubscriptionError::MissingPrice("stripe_price_yearly")),
                None => Err(SubscriptionError::MissingBillingCycle),
            },
        }
    }
}
