use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::value_objects::enums::{
    billing_cycles::BillingCycle, billing_models::BillingModel, change_actors::ChangeActor,
    subscription_statuses::SubscriptionStatus,
};

/// A requested plan change that has not yet been confirmed by payment.
/// Serialized as a tagged object under `metadata.pending_plan_change`; the
/// current plan, amount, and limits stay untouched until activation applies it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PendingPlanChange {
    Upgrade {
        target_plan_id: Uuid,
        requested_at: DateTime<Utc>,
    },
    Downgrade {
        target_plan_id: Uuid,
        requested_at: DateTime<Utc>,
    },
}

impl PendingPlanChange {
    pub fn target_plan_id(&self) -> Uuid {
        match self {
            PendingPlanChange::Upgrade { target_plan_id, .. }
            | PendingPlanChange::Downgrade { target_plan_id, .. } => *target_plan_id,
        }
    }

    pub fn is_upgrade(&self) -> bool {
        matches!(self, PendingPlanChange::Upgrade { .. })
    }
}

/// Direction of a plan-change request as submitted by the caller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlanChangeKind {
    Upgrade,
    Downgrade,
}

/// Field updates applied to a subscription row. Every mutating repository
/// operation takes the full set so a transition is written in one statement
/// under the row lock. `Option<Option<T>>` distinguishes "leave as is" from
/// "set NULL".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubscriptionChanges {
    pub status: Option<SubscriptionStatus>,
    pub plan_id: Option<Uuid>,
    pub amount_minor: Option<i32>,
    pub ends_at: Option<Option<DateTime<Utc>>>,
    pub next_billing_at: Option<Option<DateTime<Utc>>>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub auto_renew: Option<bool>,
    pub failed_payment_attempts: Option<i32>,
    pub pending_change: Option<Option<PendingPlanChange>>,
    pub provider_subscription_id: Option<String>,
    pub payment_method_id: Option<String>,
}

/// User-facing view of a subscription.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubscriptionDto {
    pub id: Uuid,
    pub plan_id: Uuid,
    pub billing_model: BillingModel,
    pub billing_cycle: Option<BillingCycle>,
    pub status: SubscriptionStatus,
    pub amount_minor: i32,
    pub currency: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    pub next_billing_at: Option<DateTime<Utc>>,
    pub is_trial: bool,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub auto_renew: bool,
    pub canceled_at: Option<DateTime<Utc>>,
    pub pending_change: Option<PendingPlanChange>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubscriptionHistoryDto {
    pub action: String,
    pub previous_status: Option<String>,
    pub new_status: String,
    pub previous_plan_id: Option<Uuid>,
    pub new_plan_id: Option<Uuid>,
    pub previous_amount_minor: Option<i32>,
    pub new_amount_minor: Option<i32>,
    pub reason: Option<String>,
    pub changed_by: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CurrentSubscriptionDto {
    pub subscription: SubscriptionDto,
    pub plan_name: String,
    pub history: Vec<SubscriptionHistoryDto>,
}

/// Request body for creating a subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSubscriptionModel {
    pub plan_id: Uuid,
    pub billing_cycle: Option<BillingCycle>,
    pub payment_method_id: Option<String>,
    pub trial_days: Option<i64>,
}

/// Request body for requesting a plan change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanChangeModel {
    pub target_plan_id: Uuid,
    pub kind: PlanChangeKind,
}

/// Request body for cancelling a subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelSubscriptionModel {
    pub reason: Option<String>,
}

/// Request body for starting a provider checkout session. The plan comes from
/// the user's pending subscription (or its queued plan change).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutModel {
    pub billing_cycle: Option<BillingCycle>,
}

/// Inputs to `SubscriptionService::create`.
#[derive(Debug, Clone)]
pub struct NewSubscriptionRequest {
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub billing_cycle: Option<BillingCycle>,
    pub payment_provider: Option<String>,
    pub payment_method_id: Option<String>,
    pub trial_days: Option<i64>,
    pub actor: ChangeActor,
}
