// Staged export under the prepare → approve → post → rollback protocol.
// Transitions are monotonic along the lattice; once posted, the payload is
// immutable except for the rollback transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::core::{ids, AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportStatus {
    Prepared,
    UnderReview,
    Approved,
    Rejected,
    Posted,
    Failed,
    RolledBack,
}

impl ExportStatus {
    pub fn can_transition(&self, to: ExportStatus) -> bool {
        use ExportStatus::*;
        matches!(
            (self, to),
            (Prepared, UnderReview)
                | (UnderReview, Approved)
                | (UnderReview, Rejected)
                | (Approved, Posted)
                | (Approved, Failed)
                | (Posted, RolledBack)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExportStatus::Rejected | ExportStatus::Failed | ExportStatus::RolledBack
        )
    }
}

impl std::fmt::Display for ExportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExportStatus::Prepared => "prepared",
            ExportStatus::UnderReview => "under_review",
            ExportStatus::Approved => "approved",
            ExportStatus::Rejected => "rejected",
            ExportStatus::Posted => "posted",
            ExportStatus::Failed => "failed",
            ExportStatus::RolledBack => "rolled_back",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Json,
    Quickbooks,
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
            ExportFormat::Quickbooks => "quickbooks",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            "quickbooks" => Ok(ExportFormat::Quickbooks),
            other => Err(AppError::invalid(
                "unknown_format",
                format!("unknown export format: {other}"),
            )),
        }
    }
}

/// Significance of a reviewer's change to the prepared payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeSignificance {
    Low,
    Medium,
    High,
    Critical,
}

/// One field-level difference between payload revisions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub before: Value,
    pub after: Value,
    pub significance: ChangeSignificance,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagedExport {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub destination: String,
    pub format: ExportFormat,
    pub status: ExportStatus,
    pub prepared_data: Value,
    pub approved_data: Option<Value>,
    pub posted_data: Option<Value>,
    pub diff: Vec<FieldChange>,
    /// Fitness for posting, 0..=100
    pub quality_score: u8,
    pub prepared_by: String,
    pub approved_by: Option<String>,
    pub posted_by: Option<String>,
    /// Set on post; non-empty and immutable once posted
    pub external_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub approved_at: Option<DateTime<Utc>>,
    pub posted_at: Option<DateTime<Utc>>,
    pub rolled_back_at: Option<DateTime<Utc>>,
    pub version: u64,
}

impl StagedExport {
    pub fn new(
        invoice_id: Uuid,
        destination: impl Into<String>,
        format: ExportFormat,
        prepared_data: Value,
        quality_score: u8,
        prepared_by: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ids::new_id(),
            invoice_id,
            destination: destination.into(),
            format,
            status: ExportStatus::Prepared,
            prepared_data,
            approved_data: None,
            posted_data: None,
            diff: Vec::new(),
            quality_score: quality_score.min(100),
            prepared_by: prepared_by.to_string(),
            approved_by: None,
            posted_by: None,
            external_ref: None,
            created_at: now,
            updated_at: now,
            reviewed_at: None,
            approved_at: None,
            posted_at: None,
            rolled_back_at: None,
            version: 1,
        }
    }

    pub fn transition_to(&mut self, to: ExportStatus, now: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition(to) {
            return Err(AppError::conflict(format!(
                "invalid export transition {} -> {}",
                self.status, to
            )));
        }
        self.status = to;
        self.updated_at = now;
        match to {
            ExportStatus::UnderReview => self.reviewed_at = Some(now),
            ExportStatus::Approved => self.approved_at = Some(now),
            ExportStatus::Posted => self.posted_at = Some(now),
            ExportStatus::RolledBack => self.rolled_back_at = Some(now),
            _ => {}
        }
        Ok(())
    }

    /// The payload the connector will receive
    pub fn effective_payload(&self) -> &Value {
        self.approved_data.as_ref().unwrap_or(&self.prepared_data)
    }

    pub fn max_change_significance(&self) -> Option<ChangeSignificance> {
        self.diff.iter().map(|c| c.significance).max()
    }
}
