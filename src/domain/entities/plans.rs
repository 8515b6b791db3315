use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::{
    domain::value_objects::{
        enums::billing_models::BillingModel,
        plans::{PlanDto, PlanLimits},
    },
    infrastructure::postgres::schema::plans,
};

#[derive(Debug, Clone)]
pub struct PlanEntity {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub billing_model: BillingModel,
    pub price_monthly_minor: i32,
    pub price_yearly_minor: i32,
    pub price_lifetime_minor: i32,
    pub currency: String,
    pub limits: PlanLimits,
    pub is_default: bool,
    pub is_active: bool,
    pub stripe_price_monthly: Option<String>,
    pub stripe_price_yearly: Option<String>,
    pub stripe_price_lifetime: Option<String>,
}

/// Raw row used for Diesel queries. Limits stay as JSON and are parsed into PlanLimits.
#[derive(Debug, Clone, Identifiable, Selectable, Queryable)]
#[diesel(table_name = plans)]
pub struct PlanRow {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub billing_model: String,
    pub price_monthly_minor: i32,
    pub price_yearly_minor: i32,
    pub price_lifetime_minor: i32,
    pub currency: String,
    pub limits: serde_json::Value,
    pub is_default: bool,
    pub is_active: bool,
    pub stripe_price_monthly: Option<String>,
    pub stripe_price_yearly: Option<String>,
    pub stripe_price_lifetime: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<PlanRow> for PlanEntity {
    fn from(value: PlanRow) -> Self {
        let limits = serde_json::from_value(value.limits).unwrap_or_default();

        Self {
            id: value.id,
            name: value.name,
            description: value.description,
            billing_model: BillingModel::from_str(&value.billing_model)
                .unwrap_or(BillingModel::Recurring),
            price_monthly_minor: value.price_monthly_minor,
            price_yearly_minor: value.price_yearly_minor,
            price_lifetime_minor: value.price_lifetime_minor,
            currency: value.currency,
            limits,
            is_default: value.is_default,
            is_active: value.is_active,
            stripe_price_monthly: value.stripe_price_monthly,
            stripe_price_yearly: value.stripe_price_yearly,
            stripe_price_lifetime: value.stripe_price_lifetime,
        }
    }
}

impl From<PlanEntity> for PlanDto {
    fn from(value: PlanEntity) -> Self {
        Self {
            id: value.id,
            name: value.name,
            description: value.description,
            billing_model: value.billing_model,
            price_monthly_minor: value.price_monthly_minor,
            price_yearly_minor: value.price_yearly_minor,
            price_lifetime_minor: value.price_lifetime_minor,
            currency: value.currency,
            limits: serde_json::to_value(&value.limits).unwrap_or_default(),
            is_default: value.is_default,
        }
    }
}
