use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Audit actions recorded in `subscription_history`, one per state transition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    Created,
    UpgradeRequested,
    DowngradeRequested,
    Activated,
    PaymentFailed,
    Canceled,
    Expired,
}

impl HistoryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryAction::Created => "created",
            HistoryAction::UpgradeRequested => "upgrade_requested",
            HistoryAction::DowngradeRequested => "downgrade_requested",
            HistoryAction::Activated => "activated",
            HistoryAction::PaymentFailed => "payment_failed",
            HistoryAction::Canceled => "canceled",
            HistoryAction::Expired => "expired",
        }
    }
}

impl Display for HistoryAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
