// Approval requests with ordered multi-step chains. Steps execute strictly
// in declared order; a request is approved iff every step approves and
// rejected as soon as any step rejects. Decisions are append-only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::{ids, AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalKind {
    Invoice,
    Export,
    PolicyOverride,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Pending,
    Approved,
    Rejected,
    Cancelled,
    Delegated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Approved,
    Rejected,
    Delegated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

/// One step in an approval chain.
///
/// `approver` pins a concrete principal; when None, any principal at or
/// above `required_role_level` may act. A delegated step keeps its original
/// record and pins the delegate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalStep {
    pub approver: Option<String>,
    pub required_role_level: u8,
    pub status: StepStatus,
    pub acted_by: Option<String>,
    pub acted_at: Option<DateTime<Utc>>,
    pub delegated_to: Option<String>,
    pub comment: Option<String>,
    pub due_at: Option<DateTime<Utc>>,
}

impl ApprovalStep {
    pub fn for_level(level: u8, due_at: Option<DateTime<Utc>>) -> Self {
        Self {
            approver: None,
            required_role_level: level,
            status: StepStatus::Pending,
            acted_by: None,
            acted_at: None,
            delegated_to: None,
            comment: None,
            due_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: Uuid,
    /// The entity awaiting approval (invoice or staged export)
    pub subject_ref: Uuid,
    /// Owning invoice, for workflow re-dispatch
    pub invoice_id: Uuid,
    pub kind: ApprovalKind,
    pub state: RequestState,
    pub steps: Vec<ApprovalStep>,
    pub priority: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub due_at: Option<DateTime<Utc>>,
    pub version: u64,
}

impl ApprovalRequest {
    pub fn new(
        subject_ref: Uuid,
        invoice_id: Uuid,
        kind: ApprovalKind,
        steps: Vec<ApprovalStep>,
        priority: u8,
        due_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        if steps.is_empty() {
            return Err(AppError::validation(
                "approval request must have at least one step",
            ));
        }
        Ok(Self {
            id: ids::new_id(),
            subject_ref,
            invoice_id,
            kind,
            state: RequestState::Pending,
            steps,
            priority,
            created_at: now,
            updated_at: now,
            due_at,
            version: 1,
        })
    }

    /// Index of the first step still awaiting a decision, if the chain is
    /// live. A delegated step is still awaiting its delegate.
    pub fn current_step(&self) -> Option<usize> {
        if self.state != RequestState::Pending {
            return None;
        }
        self.steps.iter().position(|s| {
            matches!(s.status, StepStatus::Pending | StepStatus::Delegated)
        })
    }

    /// A step is eligible to act only when all prior steps approved
    pub fn step_eligible(&self, index: usize) -> bool {
        index < self.steps.len()
            && matches!(
                self.steps[index].status,
                StepStatus::Pending | StepStatus::Delegated
            )
            && self.steps[..index]
                .iter()
                .all(|s| s.status == StepStatus::Approved)
    }

    /// Recompute the request state from its steps
    pub fn recompute_state(&mut self) {
        if matches!(self.state, RequestState::Cancelled) {
            return;
        }
        if self.steps.iter().any(|s| s.status == StepStatus::Rejected) {
            self.state = RequestState::Rejected;
        } else if self.steps.iter().all(|s| s.status == StepStatus::Approved) {
            self.state = RequestState::Approved;
        } else {
            self.state = RequestState::Pending;
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(
            self.state,
            RequestState::Approved | RequestState::Rejected | RequestState::Cancelled
        )
    }
}

/// Immutable record of one decision (append-only table)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub id: Uuid,
    pub request_id: Uuid,
    pub step_index: usize,
    pub decided_by: String,
    pub decision: Decision,
    pub comment: Option<String>,
    pub decided_at: DateTime<Utc>,
}

impl ApprovalDecision {
    pub fn record(
        request_id: Uuid,
        step_index: usize,
        decided_by: &str,
        decision: Decision,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ids::new_id(),
            request_id,
            step_index,
            decided_by: decided_by.to_string(),
            decision,
            comment,
            decided_at: now,
        }
    }
}
