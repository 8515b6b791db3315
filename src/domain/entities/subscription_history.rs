use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::{
    domain::value_objects::subscriptions::SubscriptionHistoryDto,
    infrastructure::postgres::schema::subscription_history,
};

/// Append-only audit row, one per state transition. Never updated or deleted.
#[derive(Debug, Clone, Identifiable, Selectable, Queryable)]
#[diesel(table_name = subscription_history)]
pub struct SubscriptionHistoryEntity {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub user_id: Uuid,
    pub action: String,
    pub previous_status: Option<String>,
    pub new_status: String,
    pub previous_plan_id: Option<Uuid>,
    pub new_plan_id: Option<Uuid>,
    pub previous_amount_minor: Option<i32>,
    pub new_amount_minor: Option<i32>,
    pub reason: Option<String>,
    pub changed_by: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = subscription_history)]
pub struct NewSubscriptionHistoryEntity {
    pub subscription_id: Uuid,
    pub user_id: Uuid,
    pub action: String,
    pub previous_status: Option<String>,
    pub new_status: String,
    pub previous_plan_id: Option<Uuid>,
    pub new_plan_id: Option<Uuid>,
    pub previous_amount_minor: Option<i32>,
    pub new_amount_minor: Option<i32>,
    pub reason: Option<String>,
    pub changed_by: String,
    pub metadata: serde_json::Value,
}

impl From<SubscriptionHistoryEntity> for SubscriptionHistoryDto {
    fn from(value: SubscriptionHistoryEntity) -> Self {
        Self {
            action: value.action,
            previous_status: value.previous_status,
            new_status: value.new_status,
            previous_plan_id: value.previous_plan_id,
            new_plan_id: value.new_plan_id,
            previous_amount_minor: value.previous_amount_minor,
            new_amount_minor: value.new_amount_minor,
            reason: value.reason,
            changed_by: value.changed_by,
            created_at: value.created_at,
        }
    }
}
