// Staging/export pipeline: prepare → approve → post → rollback with diff
// tracking. Posting is idempotent by staged-export id; connector calls go
// through the circuit breaker.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::{AppError, Clock, Principal, Result, Role};
use crate::modules::exports::models::{
    ChangeSignificance, ExportFormat, ExportStatus, StagedExport,
};
use crate::modules::idempotency::models::fingerprint;
use crate::modules::idempotency::services::IdempotencyManager;
use crate::modules::invoices::models::{Extraction, InvoiceState};
use crate::modules::jobs::services::JobQueue;
use crate::modules::approvals::models::{ApprovalKind, Decision, StepStatus};
use crate::modules::approvals::services::ApprovalService;
use crate::modules::validation::models::Validation;
use crate::store::{EventKind, MemoryStore};

use super::connector::{CircuitBreaker, DestinationConnector};
use super::diff::{compute_diff, SignificanceRules};

/// TTL for staging idempotency records
const STAGING_IDEMPOTENCY_TTL: Duration = Duration::from_secs(86_400);

pub struct StagingService {
    store: Arc<MemoryStore>,
    queue: Arc<JobQueue>,
    idempotency: Arc<IdempotencyManager>,
    connector: Arc<dyn DestinationConnector>,
    breaker: CircuitBreaker,
    clock: Arc<dyn Clock>,
    significance: SignificanceRules,
    quality_threshold: u8,
    approval_timeout: chrono::Duration,
    rollback_window: chrono::Duration,
    default_format: ExportFormat,
}

impl StagingService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<MemoryStore>,
        queue: Arc<JobQueue>,
        idempotency: Arc<IdempotencyManager>,
        connector: Arc<dyn DestinationConnector>,
        breaker: CircuitBreaker,
        clock: Arc<dyn Clock>,
        quality_threshold: u8,
        approval_timeout: Duration,
        rollback_window: Duration,
    ) -> Self {
        Self {
            store,
            queue,
            idempotency,
            connector,
            breaker,
            clock,
            significance: SignificanceRules::standard(),
            quality_threshold,
            approval_timeout: chrono::Duration::from_std(approval_timeout)
                .unwrap_or_else(|_| chrono::Duration::hours(72)),
            rollback_window: chrono::Duration::from_std(rollback_window)
                .unwrap_or_else(|_| chrono::Duration::hours(24)),
            default_format: ExportFormat::Json,
        }
    }

    pub fn export(&self, export_id: Uuid) -> Result<StagedExport> {
        self.store.read(|t| t.staged_export(export_id))
    }

    /// Stage an export for the connector's destination in the default
    /// format. Idempotent by (invoice, destination, format).
    pub async fn prepare_default(&self, invoice_id: Uuid) -> Result<StagedExport> {
        self.prepare(invoice_id, self.connector.name().to_string(), self.default_format)
            .await
    }

    pub async fn prepare(
        &self,
        invoice_id: Uuid,
        destination: String,
        format: ExportFormat,
    ) -> Result<StagedExport> {
        let key = fingerprint(&[
            &invoice_id.to_string(),
            &destination,
            &format.to_string(),
            "stage",
        ]);
        let result = self
            .idempotency
            .execute(&key, "export.prepare", "system", STAGING_IDEMPOTENCY_TTL, || async {
                self.store.transaction(|tx| {
                    if let Some(existing) = tx.staged_export_for(invoice_id, &destination, format)
                    {
                        return Ok(json!({ "export_id": existing.id }));
                    }
                    let invoice = tx.invoice(invoice_id)?;
                    if !matches!(
                        invoice.state,
                        InvoiceState::Approved | InvoiceState::Staged
                    ) {
                        return Err(AppError::conflict(format!(
                            "invoice {invoice_id} is {}; only approved invoices stage exports",
                            invoice.state
                        )));
                    }
                    let extraction = tx.extraction_for(invoice_id).ok_or_else(|| {
                        AppError::not_found(format!("extraction for invoice {invoice_id}"))
                    })?;
                    let validation = tx.validation_for(invoice_id);

                    let prepared_data =
                        build_payload(&invoice.id, &destination, format, &extraction);
                    let quality_score = quality_score(&extraction, validation.as_ref());
                    let export = StagedExport::new(
                        invoice_id,
                        destination.clone(),
                        format,
                        prepared_data,
                        quality_score,
                        "system",
                        tx.now,
                    );
                    tx.append_outbox(
                        EventKind::ExportPrepared,
                        Some(invoice_id),
                        json!({
                            "export_id": export.id,
                            "destination": destination,
                            "format": format,
                            "quality_score": quality_score,
                        }),
                    );
                    let stored = tx.insert_staged_export(export);
                    Ok(json!({ "export_id": stored.id }))
                })
            })
            .await?;

        let export_id: Uuid = serde_json::from_value(
            result
                .get("export_id")
                .cloned()
                .ok_or_else(|| AppError::internal("prepare result missing export_id"))?,
        )?;
        self.export(export_id)
    }

    /// Move a prepared export into review; exports meeting the quality bar
    /// with an untouched payload are approved by the system principal so
    /// clean invoices flow to posting without human action.
    pub async fn ensure_reviewed(&self, export_id: Uuid) -> Result<StagedExport> {
        let export = self.export(export_id)?;
        match export.status {
            ExportStatus::Prepared => {}
            _ => return Ok(export),
        }

        let auto = export.quality_score >= self.quality_threshold;
        let reviewed = self.store.transaction(|tx| {
            let mut export = tx.staged_export(export_id)?;
            if export.status != ExportStatus::Prepared {
                return Ok(export);
            }
            export.transition_to(ExportStatus::UnderReview, tx.now)?;
            if !auto {
                let invoice_id = export.invoice_id;
                let mut request = ApprovalService::create_in_tx(
                    tx,
                    export.id,
                    invoice_id,
                    ApprovalKind::Export,
                    &[Role::ApManager.level()],
                    1,
                )?;
                // export reviews run on the staging approval window
                let review_due = tx.now + self.approval_timeout;
                request.due_at = Some(review_due);
                if let Some(step) = request.steps.first_mut() {
                    step.due_at = Some(review_due);
                }
                tx.update_approval_request(&request)?;
            }
            tx.update_staged_export(&export)
        })?;

        if auto {
            info!(
                export_id = %export_id,
                quality = reviewed.quality_score,
                "Export meets quality bar; auto-approving"
            );
            return self.approve(export_id, &Principal::system(), None).await;
        }
        Ok(reviewed)
    }

    /// Approve an export under review. A payload change is diffed against
    /// the prepared data; critical changes demand controller authority.
    pub async fn approve(
        &self,
        export_id: Uuid,
        principal: &Principal,
        approved_data: Option<Value>,
    ) -> Result<StagedExport> {
        if !principal.role.at_least(Role::ApManager.level()) {
            return Err(AppError::permission_denied(format!(
                "principal '{}' may not approve exports",
                principal.id
            )));
        }
        let updated = self.store.transaction(|tx| {
            let mut export = tx.staged_export(export_id)?;
            if export.status != ExportStatus::UnderReview {
                return Err(AppError::conflict(format!(
                    "export {export_id} is {}; expected under_review",
                    export.status
                )));
            }

            let diff = match &approved_data {
                Some(data) => compute_diff(&export.prepared_data, data, &self.significance),
                None => Vec::new(),
            };
            let max_significance = diff.iter().map(|c| c.significance).max();
            if max_significance == Some(ChangeSignificance::Critical)
                && !principal.role.at_least(Role::Controller.level())
            {
                return Err(AppError::permission_denied(
                    "critical payload changes require controller approval",
                ));
            }

            export.transition_to(ExportStatus::Approved, tx.now)?;
            export.approved_data = Some(
                approved_data
                    .clone()
                    .unwrap_or_else(|| export.prepared_data.clone()),
            );
            export.diff = diff;
            export.approved_by = Some(principal.id.clone());
            let invoice_id = export.invoice_id;

            Self::settle_export_request(tx, export_id, principal, Decision::Approve)?;
            tx.append_outbox(
                EventKind::ExportApproved,
                Some(invoice_id),
                json!({
                    "export_id": export_id,
                    "actor": principal.id,
                    "changes": export.diff.len(),
                    "max_significance": export.max_change_significance(),
                }),
            );
            tx.update_staged_export(&export)
        })?;

        self.queue
            .enqueue("invoice.process", json!({ "invoice_id": updated.invoice_id }))?;
        Ok(updated)
    }

    pub async fn reject(
        &self,
        export_id: Uuid,
        principal: &Principal,
        reason: &str,
    ) -> Result<StagedExport> {
        if !principal.role.at_least(Role::ApManager.level()) {
            return Err(AppError::permission_denied(format!(
                "principal '{}' may not reject exports",
                principal.id
            )));
        }
        let updated = self.store.transaction(|tx| {
            let mut export = tx.staged_export(export_id)?;
            if export.status != ExportStatus::UnderReview {
                return Err(AppError::conflict(format!(
                    "export {export_id} is {}; expected under_review",
                    export.status
                )));
            }
            export.transition_to(ExportStatus::Rejected, tx.now)?;
            let invoice_id = export.invoice_id;
            Self::settle_export_request(tx, export_id, principal, Decision::Reject)?;
            tx.append_outbox(
                EventKind::ExportRejected,
                Some(invoice_id),
                json!({
                    "export_id": export_id,
                    "actor": principal.id,
                    "reason": reason,
                }),
            );
            tx.update_staged_export(&export)
        })?;
        warn!(export_id = %export_id, reason, "Export rejected");
        Ok(updated)
    }

    /// Post an approved export. Idempotent by staged-export id: a repeat
    /// call returns the recorded external_ref without touching the
    /// connector.
    pub async fn post(&self, export_id: Uuid, principal: &Principal) -> Result<StagedExport> {
        let key = fingerprint(&[&export_id.to_string(), "post"]);
        self.idempotency
            .execute(&key, "export.post", &principal.id, STAGING_IDEMPOTENCY_TTL, || async {
                let export = self.export(export_id)?;
                match export.status {
                    ExportStatus::Approved => {}
                    ExportStatus::Posted => {
                        return Ok(json!({
                            "export_id": export_id,
                            "external_ref": export.external_ref,
                        }))
                    }
                    other => {
                        return Err(AppError::conflict(format!(
                            "export {export_id} is {other}; expected approved"
                        )))
                    }
                }

                let payload = export.effective_payload().clone();
                let external_ref = self
                    .breaker
                    .call(|| self.connector.post(&payload))
                    .await?;

                let posted = self.store.transaction(|tx| {
                    let mut export = tx.staged_export(export_id)?;
                    export.transition_to(ExportStatus::Posted, tx.now)?;
                    export.posted_data = Some(payload.clone());
                    export.external_ref = Some(external_ref.clone());
                    export.posted_by = Some(principal.id.clone());
                    let invoice_id = export.invoice_id;
                    tx.append_outbox(
                        EventKind::ExportPosted,
                        Some(invoice_id),
                        json!({
                            "export_id": export_id,
                            "external_ref": external_ref,
                            "actor": principal.id,
                        }),
                    );
                    tx.update_staged_export(&export)
                })?;
                info!(
                    export_id = %export_id,
                    external_ref = %external_ref,
                    "Export posted"
                );
                Ok(json!({
                    "export_id": posted.id,
                    "external_ref": posted.external_ref,
                }))
            })
            .await?;
        self.export(export_id)
    }

    /// Terminal failure after the job fabric exhausted its retries
    pub fn mark_failed(&self, export_id: Uuid, error: &AppError) -> Result<StagedExport> {
        let export = self.store.transaction(|tx| {
            let mut export = tx.staged_export(export_id)?;
            if export.status != ExportStatus::Approved {
                return Ok(export);
            }
            export.transition_to(ExportStatus::Failed, tx.now)?;
            tx.update_staged_export(&export)
        })?;
        warn!(export_id = %export_id, error = %error, "Export marked failed");
        Ok(export)
    }

    /// Reverse a posted export within the rollback window. Appends a
    /// compensating audit event and re-dispatches the workflow.
    pub async fn rollback(
        &self,
        export_id: Uuid,
        principal: &Principal,
        reason: &str,
    ) -> Result<StagedExport> {
        // validate state and window before touching the connector
        let now = self.clock.now();
        let window = self.rollback_window;
        let (external_ref, version) = self.store.read(|t| -> Result<(String, u64)> {
            let export = t.staged_export(export_id)?;
            if export.status != ExportStatus::Posted {
                return Err(AppError::conflict(format!(
                    "export {export_id} is {}; only posted exports roll back",
                    export.status
                )));
            }
            let posted_at = export
                .posted_at
                .ok_or_else(|| AppError::internal("posted export missing posted_at"))?;
            if now - posted_at > window {
                return Err(AppError::invalid(
                    "rollback_window_expired",
                    format!(
                        "export {export_id} was posted more than {}h ago",
                        window.num_hours()
                    ),
                ));
            }
            Ok((
                export
                    .external_ref
                    .clone()
                    .ok_or_else(|| AppError::internal("posted export missing external_ref"))?,
                export.version,
            ))
        })?;

        self.breaker
            .call(|| self.connector.reverse(&external_ref))
            .await?;

        let updated = self.store.transaction(|tx| {
            let mut export = tx.staged_export(export_id)?;
            if export.version != version {
                return Err(AppError::conflict(format!(
                    "export {export_id} changed during rollback"
                )));
            }
            export.transition_to(ExportStatus::RolledBack, tx.now)?;
            let invoice_id = export.invoice_id;
            tx.append_outbox(
                EventKind::ExportRolledBack,
                Some(invoice_id),
                json!({
                    "export_id": export_id,
                    "external_ref": external_ref,
                    "actor": principal.id,
                    "reason": reason,
                }),
            );
            tx.update_staged_export(&export)
        })?;

        info!(export_id = %export_id, reason, "Export rolled back");
        self.queue
            .enqueue("invoice.process", json!({ "invoice_id": updated.invoice_id }))?;
        Ok(updated)
    }

    /// Settle the export's pending review request, if one exists
    fn settle_export_request(
        tx: &mut crate::store::StoreTx<'_>,
        export_id: Uuid,
        principal: &Principal,
        decision: Decision,
    ) -> Result<()> {
        let Some(mut request) = tx.pending_approval_for_subject(export_id) else {
            return Ok(());
        };
        let Some(index) = request.current_step() else {
            return Ok(());
        };
        let now = tx.now;
        {
            let step = &mut request.steps[index];
            step.status = match decision {
                Decision::Approve => StepStatus::Approved,
                Decision::Reject => StepStatus::Rejected,
            };
            step.acted_by = Some(principal.id.clone());
            step.acted_at = Some(now);
        }
        request.recompute_state();
        tx.update_approval_request(&request)?;
        tx.append_decision(crate::modules::approvals::models::ApprovalDecision::record(
            request.id,
            index,
            &principal.id,
            decision,
            None,
            now,
        ));
        Ok(())
    }
}

/// Export payload the connector receives
fn build_payload(
    invoice_id: &Uuid,
    destination: &str,
    format: ExportFormat,
    extraction: &Extraction,
) -> Value {
    let lines: Vec<Value> = extraction
        .lines
        .iter()
        .map(|line| {
            let mut obj = serde_json::Map::new();
            for (name, field) in &line.fields {
                obj.insert(name.clone(), Value::String(field.value.clone()));
            }
            Value::Object(obj)
        })
        .collect();

    let mut payload = serde_json::Map::new();
    payload.insert("invoice_id".into(), json!(invoice_id));
    payload.insert("destination".into(), json!(destination));
    payload.insert("format".into(), json!(format));
    for name in [
        "vendor_name",
        "invoice_number",
        "invoice_date",
        "due_date",
        "currency",
        "subtotal",
        "tax_amount",
        "total_amount",
        "po_number",
    ] {
        if let Some(value) = extraction.header_value(name) {
            payload.insert(name.into(), Value::String(value.to_string()));
        }
    }
    payload.insert("lines".into(), Value::Array(lines));
    Value::Object(payload)
}

/// Fitness of the staged payload for posting, 0..=100
fn quality_score(extraction: &Extraction, validation: Option<&Validation>) -> u8 {
    let mut score: i32 = 100;

    for optional in ["currency", "due_date", "po_number"] {
        if extraction.header_value(optional).is_none() {
            score -= 5;
        }
    }
    if let Some(min_confidence) = extraction.min_confidence() {
        score -= ((1.0 - min_confidence) * 40.0).round() as i32;
    } else {
        score -= 40;
    }
    if let Some(validation) = validation {
        let warnings = validation
            .checks
            .iter()
            .filter(|c| !c.passed && !c.is_blocking())
            .count() as i32;
        score -= (warnings * 10).min(30);
    }

    score.clamp(0, 100) as u8
}
