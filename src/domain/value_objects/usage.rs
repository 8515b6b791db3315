use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An action gated by the owning user's plan limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageAction {
    CreateForm,
    SubmitForm { form_id: Uuid },
    ExportData { form_id: Uuid },
}

impl UsageAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageAction::CreateForm => "create_form",
            UsageAction::SubmitForm { .. } => "submit_form",
            UsageAction::ExportData { .. } => "export_data",
        }
    }
}

/// Outcome of a limit check. The numeric fields are always populated so the
/// client can render upgrade messaging when `allowed` is false.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LimitCheck {
    pub allowed: bool,
    pub limit: i64,
    pub current: i64,
    pub remaining: i64,
}

impl LimitCheck {
    /// A zero limit blocks the action regardless of current usage.
    pub fn evaluate(limit: i64, current: i64) -> Self {
        let allowed = limit > 0 && current < limit;
        Self {
            allowed,
            limit,
            current,
            remaining: (limit - current).max(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_limit_blocks_even_at_zero_usage() {
        let check = LimitCheck::evaluate(0, 0);
        assert!(!check.allowed);
        assert_eq!(check.remaining, 0);
    }

    #[test]
    fn at_limit_blocks_with_zero_remaining() {
        let check = LimitCheck::evaluate(5, 5);
        assert_eq!(
            check,
            LimitCheck {
                allowed: false,
                limit: 5,
                current: 5,
                remaining: 0
            }
        );
    }

    #[test]
    fn under_limit_allows_with_remaining() {
        let check = LimitCheck::evaluate(5, 2);
        assert!(check.allowed);
        assert_eq!(check.remaining, 3);
    }
}
