use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde_json::json;
use uuid::Uuid;

use crate::{
    domain::value_objects::{
        enums::{
            billing_cycles::BillingCycle, billing_models::BillingModel,
            subscription_statuses::SubscriptionStatus,
        },
        subscriptions::{PendingPlanChange, SubscriptionDto},
    },
    infrastructure::postgres::schema::subscriptions,
};

pub const PENDING_PLAN_CHANGE_KEY: &str = "pending_plan_change";

#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionEntity {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub billing_model: BillingModel,
    pub billing_cycle: Option<BillingCycle>,
    pub status: SubscriptionStatus,
    pub amount_minor: i32,
    pub currency: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    pub next_billing_at: Option<DateTime<Utc>>,
    pub trial_starts_at: Option<DateTime<Utc>>,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub is_trial: bool,
    pub auto_renew: bool,
    pub canceled_at: Option<DateTime<Utc>>,
    pub payment_provider: Option<String>,
    pub provider_subscription_id: Option<String>,
    pub payment_method_id: Option<String>,
    pub failed_payment_attempts: i32,
    pub pending_change: Option<PendingPlanChange>,
    pub created_at: DateTime<Utc>,
}

/// Raw row used for Diesel queries. The pending plan change lives inside the
/// `metadata` JSONB document and is parsed into the typed variant.
#[derive(Debug, Clone, Identifiable, Selectable, Queryable)]
#[diesel(table_name = subscriptions)]
pub struct SubscriptionRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub billing_model: String,
    pub billing_cycle: Option<String>,
    pub status: String,
    pub amount_minor: i32,
    pub currency: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    pub next_billing_at: Option<DateTime<Utc>>,
    pub trial_starts_at: Option<DateTime<Utc>>,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub is_trial: bool,
    pub auto_renew: bool,
    pub canceled_at: Option<DateTime<Utc>>,
    pub payment_provider: Option<String>,
    pub provider_subscription_id: Option<String>,
    pub payment_method_id: Option<String>,
    pub failed_payment_attempts: i32,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = subscriptions)]
pub struct InsertSubscriptionEntity {
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub billing_model: String,
    pub billing_cycle: Option<String>,
    pub status: String,
    pub amount_minor: i32,
    pub currency: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    pub next_billing_at: Option<DateTime<Utc>>,
    pub trial_starts_at: Option<DateTime<Utc>>,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub is_trial: bool,
    pub auto_renew: bool,
    pub payment_provider: Option<String>,
    pub payment_method_id: Option<String>,
    pub metadata: serde_json::Value,
}

impl From<SubscriptionRow> for SubscriptionEntity {
    fn from(value: SubscriptionRow) -> Self {
        let pending_change = value
            .metadata
            .get(PENDING_PLAN_CHANGE_KEY)
            .cloned()
            .and_then(|raw| serde_json::from_value(raw).ok());

        Self {
            id: value.id,
            user_id: value.user_id,
            plan_id: value.plan_id,
            billing_model: BillingModel::from_str(&value.billing_model)
                .unwrap_or(BillingModel::Recurring),
            billing_cycle: value
                .billing_cycle
                .as_deref()
                .and_then(BillingCycle::from_str),
            status: SubscriptionStatus::from_str(&value.status)
                .unwrap_or(SubscriptionStatus::Expired),
            amount_minor: value.amount_minor,
            currency: value.currency,
            starts_at: value.starts_at,
            ends_at: value.ends_at,
            next_billing_at: value.next_billing_at,
            trial_starts_at: value.trial_starts_at,
            trial_ends_at: value.trial_ends_at,
            is_trial: value.is_trial,
            auto_renew: value.auto_renew,
            canceled_at: value.canceled_at,
            payment_provider: value.payment_provider,
            provider_subscription_id: value.provider_subscription_id,
            payment_method_id: value.payment_method_id,
            failed_payment_attempts: value.failed_payment_attempts,
            pending_change,
            created_at: value.created_at,
        }
    }
}

impl SubscriptionEntity {
    /// Rebuilds the metadata document for persistence.
    pub fn metadata_value(pending_change: Option<&PendingPlanChange>) -> serde_json::Value {
        match pending_change {
            Some(change) => json!({
                PENDING_PLAN_CHANGE_KEY: serde_json::to_value(change).unwrap_or_default()
            }),
            None => json!({}),
        }
    }
}

impl From<SubscriptionEntity> for SubscriptionDto {
    fn from(value: SubscriptionEntity) -> Self {
        Self {
            id: value.id,
            plan_id: value.plan_id,
            billing_model: value.billing_model,
            billing_cycle: value.billing_cycle,
            status: value.status,
            amount_minor: value.amount_minor,
            currency: value.currency,
            starts_at: value.starts_at,
            ends_at: value.ends_at,
            next_billing_at: value.next_billing_at,
            is_trial: value.is_trial,
            trial_ends_at: value.trial_ends_at,
            auto_renew: value.auto_renew,
            canceled_at: value.canceled_at,
            pending_change: value.pending_change,
        }
    }
}
