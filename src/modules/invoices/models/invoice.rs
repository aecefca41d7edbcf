// Invoice aggregate root.
//
// An invoice is a submitted document under processing. It is created by
// ingest, mutated only by the workflow runner, and never deleted (soft
// archive only). `(content_hash, submitter_scope)` is unique; duplicate
// submissions collapse onto the same row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::{ids, AppError, Result};

/// Where the document entered the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceSource {
    Upload,
    Email,
    Api,
}

/// Per-invoice lifecycle state.
///
/// received → parsed → validated → {ready | exception} → approved
///          → staged → posted → done, with `rejected` reachable from
/// exception, ready (policy block / approval reject) and posted (rollback).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceState {
    Received,
    Parsed,
    Validated,
    Ready,
    Exception,
    Approved,
    Staged,
    Posted,
    Done,
    Rejected,
}

impl InvoiceState {
    /// Whether a transition to `to` is on the lifecycle lattice
    pub fn can_transition(&self, to: InvoiceState) -> bool {
        use InvoiceState::*;
        matches!(
            (self, to),
            (Received, Parsed)
                | (Received, Rejected)
                | (Parsed, Validated)
                | (Validated, Ready)
                | (Validated, Exception)
                | (Exception, Ready)
                | (Exception, Rejected)
                | (Ready, Approved)
                | (Ready, Rejected)
                | (Approved, Staged)
                | (Approved, Rejected)
                | (Staged, Posted)
                | (Posted, Rejected)
                | (Posted, Done)
        )
    }

    /// Terminal states accept no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, InvoiceState::Done | InvoiceState::Rejected)
    }
}

impl std::fmt::Display for InvoiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InvoiceState::Received => "received",
            InvoiceState::Parsed => "parsed",
            InvoiceState::Validated => "validated",
            InvoiceState::Ready => "ready",
            InvoiceState::Exception => "exception",
            InvoiceState::Approved => "approved",
            InvoiceState::Staged => "staged",
            InvoiceState::Posted => "posted",
            InvoiceState::Done => "done",
            InvoiceState::Rejected => "rejected",
        };
        write!(f, "{}", s)
    }
}

/// Workflow run status, orthogonal to the lifecycle state.
///
/// A cancelled run is durable; the lifecycle state is left where it was and
/// resuming requires explicit operator action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Active,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub id: Uuid,
    /// SHA-256 of the original document bytes
    pub content_hash: String,
    pub submitter: String,
    pub submitter_scope: String,
    pub source: InvoiceSource,
    pub storage_ref: String,
    pub filename: String,
    pub state: InvoiceState,
    pub run_status: RunStatus,
    pub cancel_reason: Option<String>,
    pub archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Bumped on every mutation; asserted by optimistic updates
    pub version: u64,
}

impl Invoice {
    pub fn new(
        content_hash: String,
        submitter: String,
        submitter_scope: String,
        source: InvoiceSource,
        storage_ref: String,
        filename: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ids::new_id(),
            content_hash,
            submitter,
            submitter_scope,
            source,
            storage_ref,
            filename,
            state: InvoiceState::Received,
            run_status: RunStatus::Active,
            cancel_reason: None,
            archived: false,
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    /// Apply a lifecycle transition, enforcing the lattice
    pub fn transition_to(&mut self, to: InvoiceState, now: DateTime<Utc>) -> Result<()> {
        if !self.state.can_transition(to) {
            return Err(AppError::conflict(format!(
                "invalid invoice transition {} -> {}",
                self.state, to
            )));
        }
        self.state = to;
        self.updated_at = now;
        Ok(())
    }

    pub fn is_cancelled(&self) -> bool {
        self.run_status == RunStatus::Cancelled
    }

    /// Dedup key: one invoice per (content_hash, submitter_scope)
    pub fn fingerprint(&self) -> (String, String) {
        (self.content_hash.clone(), self.submitter_scope.clone())
    }
}
