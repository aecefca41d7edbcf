// Memory of an externally triggered operation, keyed by a deterministic
// fingerprint. `key` is unique globally; concurrent insertions serialize at
// the storage layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyState {
    InFlight,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: String,
    pub op_type: String,
    pub state: IdempotencyState,
    pub attempts: u32,
    pub max_attempts: u32,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub principal: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    pub fn begin(
        key: &str,
        op_type: &str,
        principal: &str,
        max_attempts: u32,
        ttl: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            key: key.to_string(),
            op_type: op_type.to_string(),
            state: IdempotencyState::InFlight,
            attempts: 1,
            max_attempts,
            result: None,
            error: None,
            principal: principal.to_string(),
            created_at: now,
            updated_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.state != IdempotencyState::InFlight && now >= self.expires_at
    }
}

/// Deterministic key construction from fingerprint parts.
///
/// Parts are length-prefixed before joining so no two distinct part lists
/// collide ("ab"+"c" vs "a"+"bc").
pub fn fingerprint(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| format!("{}:{}", p.len(), p))
        .collect::<Vec<_>>()
        .join("|")
}
