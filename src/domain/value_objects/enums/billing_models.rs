use std::fmt::Display;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BillingModel {
    Recurring,
    Lifetime,
}

impl BillingModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingModel::Recurring => "recurring",
            BillingModel::Lifetime => "lifetime",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "recurring" => Some(BillingModel::Recurring),
            "lifetime" => Some(BillingModel::Lifetime),
            _ => None,
        }
    }
}

impl Display for BillingModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
