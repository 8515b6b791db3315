use std::fmt::Display;

use serde::{Deserialize, Serialize};

#[derive(Default, Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    #[default]
    Pending,
    Active,
    Suspended,
    Canceled,
    Expired,
}

impl Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = match self {
            SubscriptionStatus::Pending => "pending",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Suspended => "suspended",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Expired => "expired",
        };
        write!(f, "{}", status)
    }
}

impl SubscriptionStatus {
    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(SubscriptionStatus::Pending),
            "active" => Some(SubscriptionStatus::Active),
            "suspended" => Some(SubscriptionStatus::Suspended),
            "canceled" => Some(SubscriptionStatus::Canceled),
            "expired" => Some(SubscriptionStatus::Expired),
            _ => None,
        }
    }

    /// Canceled and expired subscriptions accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Canceled | SubscriptionStatus::Expired
        )
    }

    /// A user may hold at most one subscription in an open status.
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Pending | SubscriptionStatus::Active
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_status_string() {
        for status in [
            SubscriptionStatus::Pending,
            SubscriptionStatus::Active,
            SubscriptionStatus::Suspended,
            SubscriptionStatus::Canceled,
            SubscriptionStatus::Expired,
        ] {
            assert_eq!(
                SubscriptionStatus::from_str(&status.to_string()),
                Some(status)
            );
        }
        assert_eq!(SubscriptionStatus::from_str("past_due"), None);
    }

    #[test]
    fn terminal_statuses_are_not_open() {
        assert!(SubscriptionStatus::Canceled.is_terminal());
        assert!(SubscriptionStatus::Expired.is_terminal());
        assert!(!SubscriptionStatus::Canceled.is_open());
        assert!(SubscriptionStatus::Pending.is_open());
        assert!(SubscriptionStatus::Active.is_open());
        assert!(!SubscriptionStatus::Suspended.is_open());
    }
}
