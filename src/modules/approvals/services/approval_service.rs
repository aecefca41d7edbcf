// Approval chain execution: strictly ordered steps, delegation without
// privilege escalation, append-only decisions, scheduled escalation of
// overdue steps.

use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::{AppError, Principal, Result};
use crate::modules::approvals::models::{
    ApprovalDecision, ApprovalKind, ApprovalRequest, ApprovalStep, Decision,
    StepStatus,
};
use crate::modules::jobs::services::JobQueue;
use crate::store::{EventKind, MemoryStore, StoreTx};

/// Default time a step may sit before escalation
fn default_step_due() -> ChronoDuration {
    ChronoDuration::hours(24)
}

pub struct ApprovalService {
    store: Arc<MemoryStore>,
    queue: Arc<JobQueue>,
}

impl ApprovalService {
    pub fn new(store: Arc<MemoryStore>, queue: Arc<JobQueue>) -> Self {
        Self { store, queue }
    }

    /// Create a request with one step per required role level, inside the
    /// caller's transaction.
    pub fn create_in_tx(
        tx: &mut StoreTx<'_>,
        subject_ref: Uuid,
        invoice_id: Uuid,
        kind: ApprovalKind,
        levels: &[u8],
        priority: u8,
    ) -> Result<ApprovalRequest> {
        let now = tx.now;
        let steps: Vec<ApprovalStep> = levels
            .iter()
            .map(|level| ApprovalStep::for_level(*level, Some(now + default_step_due())))
            .collect();
        let due_at = Some(now + default_step_due() * levels.len().max(1) as i32);
        let request =
            ApprovalRequest::new(subject_ref, invoice_id, kind, steps, priority, due_at, now)?;
        tx.append_outbox(
            EventKind::ApprovalRequested,
            Some(invoice_id),
            json!({
                "request_id": request.id,
                "kind": kind,
                "subject_ref": subject_ref,
                "steps": request.steps.len(),
                "created_at": request.created_at,
            }),
        );
        Ok(tx.insert_approval_request(request))
    }

    pub fn request(&self, request_id: Uuid) -> Result<ApprovalRequest> {
        self.store.read(|t| t.approval_request(request_id))
    }

    /// Act on one step. Repeating an identical decision is a no-op; a
    /// conflicting one fails with `Conflict`.
    pub async fn decide(
        &self,
        request_id: Uuid,
        step_index: usize,
        principal: &Principal,
        decision: Decision,
        comment: Option<String>,
    ) -> Result<ApprovalRequest> {
        let updated = self.store.transaction(|tx| {
            let mut request = tx.approval_request(request_id)?;
            if step_index >= request.steps.len() {
                return Err(AppError::not_found(format!(
                    "step {step_index} of approval request {request_id}"
                )));
            }

            // idempotent replay of the same decision
            let step = &request.steps[step_index];
            if matches!(step.status, StepStatus::Approved | StepStatus::Rejected) {
                let same = matches!(
                    (step.status, decision),
                    (StepStatus::Approved, Decision::Approve)
                        | (StepStatus::Rejected, Decision::Reject)
                ) && step.acted_by.as_deref() == Some(principal.id.as_str());
                if same {
                    return Ok(request);
                }
                return Err(AppError::conflict(format!(
                    "step {step_index} of request {request_id} already decided"
                )));
            }

            if request.is_settled() {
                return Err(AppError::conflict(format!(
                    "approval request {request_id} is already {:?}",
                    request.state
                )));
            }
            if !request.step_eligible(step_index) {
                return Err(AppError::conflict(format!(
                    "step {step_index} of request {request_id} is not eligible yet"
                )));
            }
            Self::assert_authority(&request.steps[step_index], principal)?;

            let now = tx.now;
            {
                let step = &mut request.steps[step_index];
                step.status = match decision {
                    Decision::Approve => StepStatus::Approved,
                    Decision::Reject => StepStatus::Rejected,
                };
                step.acted_by = Some(principal.id.clone());
                step.acted_at = Some(now);
                step.comment = comment.clone();
            }
            request.recompute_state();
            let updated = tx.update_approval_request(&request)?;

            tx.append_decision(ApprovalDecision::record(
                request_id,
                step_index,
                &principal.id,
                decision,
                comment.clone(),
                now,
            ));
            tx.append_outbox(
                EventKind::ApprovalDecided,
                Some(updated.invoice_id),
                json!({
                    "request_id": request_id,
                    "step_index": step_index,
                    "decision": decision,
                    "actor": principal.id,
                    "request_state": updated.state,
                    "requested_at": updated.created_at,
                    "decided_at": now,
                }),
            );
            Ok(updated)
        })?;

        info!(
            request_id = %request_id,
            step_index,
            decision = ?decision,
            actor = %principal.id,
            state = ?updated.state,
            "Approval decision recorded"
        );

        if updated.is_settled() {
            self.queue
                .enqueue("invoice.process", json!({ "invoice_id": updated.invoice_id }))?;
        }
        Ok(updated)
    }

    /// Delegate a step. The delegate must hold a role level at or above the
    /// step's requirement; responsibility transfers, the original record
    /// stays.
    pub async fn delegate(
        &self,
        request_id: Uuid,
        step_index: usize,
        from: &Principal,
        to: &Principal,
    ) -> Result<ApprovalRequest> {
        let updated = self.store.transaction(|tx| {
            let mut request = tx.approval_request(request_id)?;
            if step_index >= request.steps.len() {
                return Err(AppError::not_found(format!(
                    "step {step_index} of approval request {request_id}"
                )));
            }
            if !request.step_eligible(step_index) {
                return Err(AppError::conflict(format!(
                    "step {step_index} of request {request_id} is not eligible"
                )));
            }
            Self::assert_authority(&request.steps[step_index], from)?;
            let required = request.steps[step_index].required_role_level;
            if !to.role.at_least(required) {
                return Err(AppError::permission_denied(format!(
                    "cannot delegate to '{}': role level {} below required {}",
                    to.id,
                    to.role.level(),
                    required
                )));
            }

            let now = tx.now;
            {
                let step = &mut request.steps[step_index];
                step.status = StepStatus::Delegated;
                step.delegated_to = Some(to.id.clone());
            }
            let updated = tx.update_approval_request(&request)?;
            tx.append_outbox(
                EventKind::ApprovalDecided,
                Some(updated.invoice_id),
                json!({
                    "request_id": request_id,
                    "step_index": step_index,
                    "decision": "delegated",
                    "actor": from.id,
                    "delegated_to": to.id,
                    "decided_at": now,
                }),
            );
            Ok(updated)
        })?;
        info!(
            request_id = %request_id,
            step_index,
            from = %from.id,
            to = %to.id,
            "Approval step delegated"
        );
        Ok(updated)
    }

    fn assert_authority(step: &ApprovalStep, principal: &Principal) -> Result<()> {
        if let Some(delegate) = &step.delegated_to {
            if principal.id != *delegate {
                return Err(AppError::permission_denied(format!(
                    "step is delegated to '{delegate}'"
                )));
            }
        } else if let Some(approver) = &step.approver {
            if principal.id != *approver {
                return Err(AppError::permission_denied(format!(
                    "step is assigned to '{approver}'"
                )));
            }
        }
        if !principal.role.at_least(step.required_role_level) {
            return Err(AppError::permission_denied(format!(
                "role level {} below required {}",
                principal.role.level(),
                step.required_role_level
            )));
        }
        Ok(())
    }

    /// Escalate overdue pending steps to the next role level. Run by the
    /// scheduled escalation task.
    pub fn escalate_overdue(&self) -> Result<usize> {
        self.store.transaction(|tx| {
            let now = tx.now;
            let mut escalated = 0;
            for mut request in tx.pending_approval_requests() {
                let Some(index) = request.current_step() else {
                    continue;
                };
                let step = &mut request.steps[index];
                let overdue = step.due_at.map(|due| now > due).unwrap_or(false);
                if !overdue || step.required_role_level >= 4 {
                    continue;
                }
                step.required_role_level += 1;
                step.approver = None;
                step.delegated_to = None;
                step.status = StepStatus::Pending;
                step.due_at = Some(now + default_step_due());
                let level = step.required_role_level;
                let updated = tx.update_approval_request(&request)?;
                tx.append_outbox(
                    EventKind::ApprovalEscalated,
                    Some(updated.invoice_id),
                    json!({
                        "request_id": updated.id,
                        "step_index": index,
                        "new_level": level,
                    }),
                );
                warn!(
                    request_id = %updated.id,
                    step_index = index,
                    new_level = level,
                    "Approval step escalated"
                );
                escalated += 1;
            }
            Ok(escalated)
        })
    }
}

/// Scheduled escalation of overdue approval steps
pub struct EscalationTask(pub Arc<ApprovalService>);

#[async_trait::async_trait]
impl crate::modules::jobs::services::ScheduledTask for EscalationTask {
    fn name(&self) -> &'static str {
        "approval_escalation"
    }

    async fn run(&self) -> crate::core::Result<()> {
        self.0.escalate_overdue()?;
        Ok(())
    }
}
