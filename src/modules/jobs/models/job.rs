// A unit of deferred work on a named queue. At most one live lease per job;
// a job leaves `leased` within its lease deadline or returns to `queued`
// automatically.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::core::ids;

/// Job payload envelope version tag
pub const PAYLOAD_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueName {
    Ingestion,
    Processing,
    Validation,
    Export,
    Maintenance,
}

impl QueueName {
    pub const ALL: [QueueName; 5] = [
        QueueName::Ingestion,
        QueueName::Processing,
        QueueName::Validation,
        QueueName::Export,
        QueueName::Maintenance,
    ];
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            QueueName::Ingestion => "ingestion",
            QueueName::Processing => "processing",
            QueueName::Validation => "validation",
            QueueName::Export => "export",
            QueueName::Maintenance => "maintenance",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for QueueName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ingestion" => Ok(QueueName::Ingestion),
            "processing" => Ok(QueueName::Processing),
            "validation" => Ok(QueueName::Validation),
            "export" => Ok(QueueName::Export),
            "maintenance" => Ok(QueueName::Maintenance),
            other => Err(format!("unknown queue: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Leased,
    Succeeded,
    Failed,
    Dead,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub queue: QueueName,
    pub op_type: String,
    pub payload: Value,
    pub payload_version: u32,
    /// Lease count; the first lease makes this 1
    pub attempts: u32,
    pub state: JobState,
    pub next_visible_at: DateTime<Utc>,
    pub lease_deadline: Option<DateTime<Utc>>,
    pub lease_token: Option<Uuid>,
    pub last_error: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl Job {
    pub fn new(queue: QueueName, op_type: &str, payload: Value, now: DateTime<Utc>) -> Self {
        Self {
            id: ids::new_id(),
            queue,
            op_type: op_type.to_string(),
            payload,
            payload_version: PAYLOAD_VERSION,
            attempts: 0,
            state: JobState::Queued,
            next_visible_at: now,
            lease_deadline: None,
            lease_token: None,
            last_error: None,
            enqueued_at: now,
            updated_at: now,
            version: 1,
        }
    }

    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Leased
            && self.lease_deadline.map(|d| now >= d).unwrap_or(true)
    }
}
