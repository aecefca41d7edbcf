use serde::{Deserialize, Serialize};

/// Ordered role levels for approval and resolution authority.
///
/// Authentication is external; the engine consumes an already-resolved
/// principal plus role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    ApClerk,
    ApManager,
    Controller,
    Cfo,
    /// Internal automation (auto-approval, scheduled tasks)
    System,
}

impl Role {
    /// Numeric authority level; higher outranks lower
    pub fn level(&self) -> u8 {
        match self {
            Role::ApClerk => 1,
            Role::ApManager => 2,
            Role::Controller => 3,
            Role::Cfo => 4,
            Role::System => u8::MAX,
        }
    }

    pub fn at_least(&self, level: u8) -> bool {
        self.level() >= level
    }

    /// Role covering the given level, for escalation targets
    pub fn for_level(level: u8) -> Role {
        match level {
            0 | 1 => Role::ApClerk,
            2 => Role::ApManager,
            3 => Role::Controller,
            _ => Role::Cfo,
        }
    }
}

/// A resolved caller identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub role: Role,
    /// Dedup scope for submissions (organization / tenant)
    pub scope: String,
}

impl Principal {
    pub fn new(id: impl Into<String>, role: Role, scope: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role,
            scope: scope.into(),
        }
    }

    /// The engine's own identity for automated mutations
    pub fn system() -> Self {
        Self::new("system", Role::System, "system")
    }
}
