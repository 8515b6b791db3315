use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::value_objects::enums::billing_models::BillingModel;

/// Resource limits attached to a plan. Stored as JSONB in the database.
/// A missing or zero limit blocks the action outright.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct PlanLimits {
    #[serde(default)]
    pub max_forms: Option<i64>,

    #[serde(default)]
    pub max_submissions_per_form: Option<i64>,

    #[serde(default)]
    pub max_exports: Option<i64>,
}

impl PlanLimits {
    pub fn max_forms_or_default(&self) -> i64 {
        self.max_forms.unwrap_or(0)
    }

    pub fn max_submissions_per_form_or_default(&self) -> i64 {
        self.max_submissions_per_form.unwrap_or(0)
    }

    pub fn max_exports_or_default(&self) -> i64 {
        self.max_exports.unwrap_or(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanDto {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub billing_model: BillingModel,
    pub price_monthly_minor: i32,
    pub price_yearly_minor: i32,
    pub price_lifetime_minor: i32,
    pub currency: String,
    pub limits: Value,
    pub is_default: bool,
}
