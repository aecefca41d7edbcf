// Per-invoice workflow runner: the only component that transitions invoice
// state. Each step is one atomic transaction under optimistic concurrency;
// on a version conflict the step restarts from the persisted state. Every
// transition appends exactly one audit event to the outbox in the same
// transaction, which makes restarts crash-safe: the next step is always
// recomputed from what is stored, never from memory.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::core::{AppError, Clock, Principal, Result};
use crate::modules::exceptions::services::ExceptionManager;
use crate::modules::exports::models::ExportStatus;
use crate::modules::exports::services::StagingService;
use crate::modules::approvals::models::{ApprovalKind, GateAction, RequestState};
use crate::modules::approvals::services::{ApprovalService, PolicyEngine};
use crate::modules::invoices::models::{Invoice, InvoiceState, RunStatus};
use crate::modules::invoices::services::extractor::Extractor;
use crate::modules::jobs::models::{JobState, QueueName};
use crate::modules::jobs::services::{CancelSignal, JobQueue};
use crate::modules::validation::services::{FieldEnhancer, RuleEngine};
use crate::store::{EventKind, MemoryStore, StoreTx};

/// Bound on conflict restarts within one drive call
const MAX_STEP_RESTARTS: usize = 16;

/// Result of one workflow step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// State changed; the runner may take another step
    Transitioned(InvoiceState),
    /// Waiting on an external actor (exception, approval, export review)
    Blocked(String),
    /// Lifecycle complete
    Terminal(InvoiceState),
    /// The run is cancelled; nothing was mutated
    Cancelled,
}

pub struct WorkflowRunner {
    store: Arc<MemoryStore>,
    clock: Arc<dyn Clock>,
    config: Arc<Config>,
    extractor: Arc<dyn Extractor>,
    enhancer: Arc<dyn FieldEnhancer>,
    rules: Arc<RuleEngine>,
    policies: Arc<PolicyEngine>,
    staging: Arc<StagingService>,
    queue: Arc<JobQueue>,
}

impl WorkflowRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<MemoryStore>,
        clock: Arc<dyn Clock>,
        config: Arc<Config>,
        extractor: Arc<dyn Extractor>,
        enhancer: Arc<dyn FieldEnhancer>,
        rules: Arc<RuleEngine>,
        policies: Arc<PolicyEngine>,
        staging: Arc<StagingService>,
        queue: Arc<JobQueue>,
    ) -> Self {
        Self {
            store,
            clock,
            config,
            extractor,
            enhancer,
            rules,
            policies,
            staging,
            queue,
        }
    }

    pub fn invoice(&self, invoice_id: Uuid) -> Result<Invoice> {
        self.store.read(|t| t.invoice(invoice_id))
    }

    /// Take steps until the workflow blocks, completes, or observes
    /// cancellation.
    pub async fn drive(&self, invoice_id: Uuid, cancel: &CancelSignal) -> Result<StepOutcome> {
        let mut restarts = 0;
        loop {
            match self.advance(invoice_id, cancel).await {
                Ok(StepOutcome::Transitioned(state)) => {
                    info!(invoice_id = %invoice_id, state = %state, "Workflow advanced");
                }
                Ok(outcome) => return Ok(outcome),
                Err(AppError::Conflict(msg)) => {
                    restarts += 1;
                    if restarts > MAX_STEP_RESTARTS {
                        return Err(AppError::internal(format!(
                            "workflow for {invoice_id} cannot make progress: {msg}"
                        )));
                    }
                    warn!(invoice_id = %invoice_id, "Step conflict; restarting from stored state");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Execute exactly one step from the persisted state
    pub async fn advance(&self, invoice_id: Uuid, cancel: &CancelSignal) -> Result<StepOutcome> {
        let invoice = self.store.read(|t| t.invoice(invoice_id))?;
        if invoice.is_cancelled() {
            return Ok(StepOutcome::Cancelled);
        }
        cancel.check("workflow step")?;

        match invoice.state {
            InvoiceState::Received => self.step_parse(invoice, cancel).await,
            InvoiceState::Parsed => self.step_validate(invoice).await,
            InvoiceState::Validated => self.step_triage(invoice).await,
            InvoiceState::Exception => self.step_exception_wait(invoice),
            InvoiceState::Ready => self.step_policy(invoice).await,
            InvoiceState::Approved => self.step_stage(invoice).await,
            InvoiceState::Staged => self.step_export(invoice).await,
            InvoiceState::Posted => self.step_finalize(invoice),
            state @ (InvoiceState::Done | InvoiceState::Rejected) => {
                Ok(StepOutcome::Terminal(state))
            }
        }
    }

    // ---- steps ----

    async fn step_parse(&self, invoice: Invoice, cancel: &CancelSignal) -> Result<StepOutcome> {
        let draft = self.extractor.extract(&invoice.storage_ref).await?;
        let draft = self
            .enhancer
            .patch_low_confidence(draft, self.config.auto_approve_confidence)
            .await;
        cancel.check("parse step")?;

        let parser_version = draft.parser_version.clone();
        self.store.transaction(|tx| {
            let extraction = crate::modules::invoices::models::Extraction::from_draft(
                invoice.id, draft, tx.now,
            );
            tx.put_extraction(extraction);
            Self::transition_in_tx(
                tx,
                &invoice,
                InvoiceState::Parsed,
                json!({ "parser_version": parser_version }),
            )
        })?;
        Ok(StepOutcome::Transitioned(InvoiceState::Parsed))
    }

    async fn step_validate(&self, invoice: Invoice) -> Result<StepOutcome> {
        let extraction = self
            .store
            .read(|t| t.extraction_for(invoice.id))
            .ok_or_else(|| {
                AppError::internal(format!("parsed invoice {} has no extraction", invoice.id))
            })?;
        let validation = self
            .rules
            .validate(&invoice, &extraction, self.clock.now())
            .await;

        self.store.transaction(|tx| {
            tx.append_outbox(
                EventKind::ValidationCompleted,
                Some(invoice.id),
                json!({
                    "passed": validation.passed,
                    "failures": validation.blocking_checks().count(),
                    "min_confidence": validation.min_confidence,
                    "mean_confidence": extraction.mean_confidence(),
                }),
            );
            tx.put_validation(validation.clone());
            Self::transition_in_tx(
                tx,
                &invoice,
                InvoiceState::Validated,
                json!({ "passed": validation.passed }),
            )
        })?;
        Ok(StepOutcome::Transitioned(InvoiceState::Validated))
    }

    /// Auto-approval gate: validation passed and every field confidence at
    /// or above the threshold goes straight to ready; anything else opens
    /// exceptions for human review.
    async fn step_triage(&self, invoice: Invoice) -> Result<StepOutcome> {
        let validation = self
            .store
            .read(|t| t.validation_for(invoice.id))
            .ok_or_else(|| {
                AppError::internal(format!("validated invoice {} has no validation", invoice.id))
            })?;
        let confidence_ok = validation
            .min_confidence
            .map(|c| c >= self.config.auto_approve_confidence)
            .unwrap_or(false);

        if validation.passed && confidence_ok {
            self.transition(
                &invoice,
                InvoiceState::Ready,
                json!({ "auto_approved": true }),
            )?;
            return Ok(StepOutcome::Transitioned(InvoiceState::Ready));
        }

        self.store.transaction(|tx| {
            let opened =
                ExceptionManager::open_in_tx(tx, invoice.id, &validation, !confidence_ok);
            Self::transition_in_tx(
                tx,
                &invoice,
                InvoiceState::Exception,
                json!({ "exceptions_opened": opened.len() }),
            )
        })?;
        Ok(StepOutcome::Transitioned(InvoiceState::Exception))
    }

    fn step_exception_wait(&self, invoice: Invoice) -> Result<StepOutcome> {
        let open = self.store.read(|t| t.open_exceptions_for(invoice.id));
        if open.is_empty() {
            self.transition(
                &invoice,
                InvoiceState::Ready,
                json!({ "all_exceptions_resolved": true }),
            )?;
            Ok(StepOutcome::Transitioned(InvoiceState::Ready))
        } else {
            Ok(StepOutcome::Blocked(format!(
                "{} open exception(s)",
                open.len()
            )))
        }
    }

    async fn step_policy(&self, invoice: Invoice) -> Result<StepOutcome> {
        // a live or settled approval request decides first
        let requests = self
            .store
            .read(|t| t.approval_requests_for_subject(invoice.id));
        if let Some(latest) = requests.last() {
            match latest.state {
                RequestState::Pending | RequestState::Delegated => {
                    return Ok(StepOutcome::Blocked("awaiting approval".into()));
                }
                RequestState::Approved => {
                    self.transition(
                        &invoice,
                        InvoiceState::Approved,
                        json!({ "approval_request": latest.id }),
                    )?;
                    return Ok(StepOutcome::Transitioned(InvoiceState::Approved));
                }
                RequestState::Rejected => {
                    self.transition(
                        &invoice,
                        InvoiceState::Rejected,
                        json!({ "approval_request": latest.id, "rejected": true }),
                    )?;
                    return Ok(StepOutcome::Transitioned(InvoiceState::Rejected));
                }
                RequestState::Cancelled => {}
            }
        }

        let extraction = self
            .store
            .read(|t| t.extraction_for(invoice.id))
            .ok_or_else(|| {
                AppError::internal(format!("ready invoice {} has no extraction", invoice.id))
            })?;
        let validation = self.store.read(|t| t.validation_for(invoice.id));
        let ctx = self
            .policies
            .context_for(&invoice, &extraction, validation.as_ref())
            .await;
        let decision = self.policies.evaluate(&ctx);

        match decision.action {
            GateAction::Allow => {
                self.transition(
                    &invoice,
                    InvoiceState::Approved,
                    json!({ "policy": "allow", "gate": decision.gate_name }),
                )?;
                Ok(StepOutcome::Transitioned(InvoiceState::Approved))
            }
            GateAction::Flag => {
                self.store.transaction(|tx| {
                    tx.append_outbox(
                        EventKind::PolicyFlagged,
                        Some(invoice.id),
                        json!({ "gate": decision.gate_name }),
                    );
                    Self::transition_in_tx(
                        tx,
                        &invoice,
                        InvoiceState::Approved,
                        json!({ "policy": "flag", "gate": decision.gate_name }),
                    )
                })?;
                Ok(StepOutcome::Transitioned(InvoiceState::Approved))
            }
            GateAction::Block => {
                self.transition(
                    &invoice,
                    InvoiceState::Rejected,
                    json!({ "policy": "block", "gate": decision.gate_name }),
                )?;
                Ok(StepOutcome::Transitioned(InvoiceState::Rejected))
            }
            GateAction::RequireApproval => {
                let levels = if decision.approval_levels.is_empty() {
                    vec![2]
                } else {
                    decision.approval_levels.clone()
                };
                self.store.transaction(|tx| {
                    ApprovalService::create_in_tx(
                        tx,
                        invoice.id,
                        invoice.id,
                        ApprovalKind::Invoice,
                        &levels,
                        1,
                    )
                })?;
                Ok(StepOutcome::Blocked("awaiting approval".into()))
            }
        }
    }

    async fn step_stage(&self, invoice: Invoice) -> Result<StepOutcome> {
        let export = self.staging.prepare_default(invoice.id).await?;
        self.transition(
            &invoice,
            InvoiceState::Staged,
            json!({ "export_id": export.id }),
        )?;
        Ok(StepOutcome::Transitioned(InvoiceState::Staged))
    }

    async fn step_export(&self, invoice: Invoice) -> Result<StepOutcome> {
        let export = self
            .store
            .read(|t| t.staged_exports_for_invoice(invoice.id))
            .into_iter()
            .last()
            .ok_or_else(|| {
                AppError::internal(format!("staged invoice {} has no export", invoice.id))
            })?;

        match export.status {
            ExportStatus::Prepared => {
                self.staging.ensure_reviewed(export.id).await?;
                Ok(StepOutcome::Blocked("export under review".into()))
            }
            ExportStatus::UnderReview => {
                // a reviewer may act through the approval work item instead
                // of the staging surface; apply a settled request here
                let request = self
                    .store
                    .read(|t| t.approval_requests_for_subject(export.id))
                    .into_iter()
                    .last();
                if let Some(request) = request {
                    let decider = request
                        .steps
                        .iter()
                        .rev()
                        .find_map(|s| s.acted_by.clone())
                        .unwrap_or_else(|| "system".to_string());
                    let level = request
                        .steps
                        .last()
                        .map(|s| s.required_role_level)
                        .unwrap_or(2);
                    let principal =
                        crate::core::Principal::new(decider, crate::core::Role::for_level(level), "system");
                    match request.state {
                        RequestState::Approved => {
                            self.staging.approve(export.id, &principal, None).await?;
                            return Ok(StepOutcome::Blocked("export approved; posting".into()));
                        }
                        RequestState::Rejected => {
                            self.staging
                                .reject(export.id, &principal, "review request rejected")
                                .await?;
                            return Ok(StepOutcome::Blocked(
                                "export rejected by review".into(),
                            ));
                        }
                        _ => {}
                    }
                }
                Ok(StepOutcome::Blocked("export awaiting review".into()))
            }
            ExportStatus::Approved => {
                self.enqueue_post_once(export.id)?;
                Ok(StepOutcome::Blocked("export posting".into()))
            }
            ExportStatus::Posted => {
                self.transition(
                    &invoice,
                    InvoiceState::Posted,
                    json!({ "export_id": export.id, "external_ref": export.external_ref }),
                )?;
                Ok(StepOutcome::Transitioned(InvoiceState::Posted))
            }
            ExportStatus::Rejected | ExportStatus::Failed => Ok(StepOutcome::Blocked(format!(
                "export {} is {}; operator attention required",
                export.id, export.status
            ))),
            ExportStatus::RolledBack => {
                self.transition(
                    &invoice,
                    InvoiceState::Rejected,
                    json!({ "export_id": export.id, "rolled_back": true }),
                )?;
                Ok(StepOutcome::Transitioned(InvoiceState::Rejected))
            }
        }
    }

    fn step_finalize(&self, invoice: Invoice) -> Result<StepOutcome> {
        let export = self
            .store
            .read(|t| t.staged_exports_for_invoice(invoice.id))
            .into_iter()
            .last();
        let rolled_back = export
            .as_ref()
            .map(|e| e.status == ExportStatus::RolledBack)
            .unwrap_or(false);

        if rolled_back {
            self.transition(
                &invoice,
                InvoiceState::Rejected,
                json!({ "rolled_back": true }),
            )?;
            Ok(StepOutcome::Transitioned(InvoiceState::Rejected))
        } else {
            self.transition(&invoice, InvoiceState::Done, json!({ "finalized": true }))?;
            Ok(StepOutcome::Transitioned(InvoiceState::Done))
        }
    }

    // ---- operator surface ----

    /// Mark the run cancelled. Cancelling an already-cancelled run is a
    /// no-op. The lifecycle state is left untouched; running steps observe
    /// the flag at their next suspension point.
    pub fn cancel(&self, invoice_id: Uuid, principal: &Principal, reason: &str) -> Result<Invoice> {
        self.store.transaction(|tx| {
            let mut invoice = tx.invoice(invoice_id)?;
            if invoice.is_cancelled() {
                return Ok(invoice);
            }
            invoice.run_status = RunStatus::Cancelled;
            invoice.cancel_reason = Some(reason.to_string());
            let stored = tx.update_invoice(&invoice)?;
            tx.append_outbox(
                EventKind::WorkflowCancelled,
                Some(invoice_id),
                json!({ "actor": principal.id, "reason": reason }),
            );
            Ok(stored)
        })
    }

    /// Explicit operator action to resume a cancelled run
    pub fn resume(&self, invoice_id: Uuid, principal: &Principal) -> Result<Invoice> {
        let resumed = self.store.transaction(|tx| {
            let mut invoice = tx.invoice(invoice_id)?;
            if !invoice.is_cancelled() {
                return Ok(invoice);
            }
            invoice.run_status = RunStatus::Active;
            invoice.cancel_reason = None;
            let stored = tx.update_invoice(&invoice)?;
            tx.append_outbox(
                EventKind::WorkflowTransition,
                Some(invoice_id),
                json!({
                    "from": stored.state,
                    "to": stored.state,
                    "actor": principal.id,
                    "detail": { "resumed": true },
                }),
            );
            Ok(stored)
        })?;
        self.queue
            .enqueue("invoice.process", json!({ "invoice_id": invoice_id }))?;
        Ok(resumed)
    }

    /// Terminal parse failure after retry exhaustion
    pub fn reject_parse_failure(&self, invoice_id: Uuid, error: &AppError) -> Result<()> {
        self.store.transaction(|tx| {
            let mut invoice = tx.invoice(invoice_id)?;
            if invoice.state != InvoiceState::Received {
                return Ok(());
            }
            let from = invoice.state;
            invoice.transition_to(InvoiceState::Rejected, tx.now)?;
            tx.update_invoice(&invoice)?;
            tx.append_outbox(
                EventKind::WorkflowTransition,
                Some(invoice_id),
                json!({
                    "from": from,
                    "to": InvoiceState::Rejected,
                    "actor": "system",
                    "detail": { "parse_failed": error.to_string() },
                }),
            );
            Ok(())
        })
    }

    // ---- helpers ----

    /// One transition in its own transaction
    fn transition(&self, invoice: &Invoice, to: InvoiceState, detail: Value) -> Result<Invoice> {
        self.store
            .transaction(|tx| Self::transition_in_tx(tx, invoice, to, detail))
    }

    /// Transition composed into a larger transaction: asserts the version
    /// read by the step and appends exactly one audit event.
    fn transition_in_tx(
        tx: &mut StoreTx<'_>,
        invoice: &Invoice,
        to: InvoiceState,
        detail: Value,
    ) -> Result<Invoice> {
        let mut current = tx.invoice(invoice.id)?;
        if current.version != invoice.version {
            return Err(AppError::conflict(format!(
                "invoice {} advanced concurrently; restarting step",
                invoice.id
            )));
        }
        let from = current.state;
        current.transition_to(to, tx.now)?;
        let stored = tx.update_invoice(&current)?;
        tx.append_outbox(
            EventKind::WorkflowTransition,
            Some(invoice.id),
            json!({
                "from": from,
                "to": to,
                "actor": "system",
                "detail": detail,
                "received_at": stored.created_at,
            }),
        );
        Ok(stored)
    }

    /// Queue the posting job unless one is already pending for this export
    fn enqueue_post_once(&self, export_id: Uuid) -> Result<()> {
        let already_queued = self.store.read(|t| {
            let pending = |state| {
                t.jobs_in_state(QueueName::Export, state)
                    .into_iter()
                    .any(|j| {
                        j.op_type == "export.post"
                            && j.payload.get("export_id")
                                == Some(&Value::String(export_id.to_string()))
                    })
            };
            pending(JobState::Queued) || pending(JobState::Leased)
        });
        if !already_queued {
            self.queue
                .enqueue("export.post", json!({ "export_id": export_id.to_string() }))?;
        }
        Ok(())
    }
}
