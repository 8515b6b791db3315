use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Who initiated a subscription transition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeActor {
    User,
    Admin,
    System,
}

impl ChangeActor {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeActor::User => "user",
            ChangeActor::Admin => "admin",
            ChangeActor::System => "system",
        }
    }
}

impl Display for ChangeActor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
