// Elevates failed validation checks into resolvable work items and applies
// resolution actions atomically: exception mutation, optional invoice data
// repair, and the audit event all commit in one transaction.

use std::collections::BTreeMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::{money, AppError, Principal, Result, Role};
use crate::modules::exceptions::models::{
    Exception, ExceptionCategory, ExceptionIssue, ResolutionAction,
};
use crate::modules::jobs::services::JobQueue;
use crate::modules::validation::models::{ReasonCode, Validation};
use crate::store::{EventKind, MemoryStore, StoreTx};

/// Field adjustments supplied with a resolution
#[derive(Debug, Clone, Default)]
pub struct ResolutionParams {
    pub adjusted_fields: BTreeMap<String, String>,
    pub notes: Option<String>,
}

pub struct ExceptionManager {
    store: Arc<MemoryStore>,
    queue: Arc<JobQueue>,
}

impl ExceptionManager {
    pub fn new(store: Arc<MemoryStore>, queue: Arc<JobQueue>) -> Self {
        Self { store, queue }
    }

    /// Open exceptions for a failed (or low-confidence) validation inside
    /// the caller's transaction. Failures sharing a category coalesce into
    /// one exception with a multi-issue payload.
    pub fn open_in_tx(
        tx: &mut StoreTx<'_>,
        invoice_id: Uuid,
        validation: &Validation,
        low_confidence: bool,
    ) -> Vec<Exception> {
        let mut by_category: BTreeMap<ExceptionCategory, Vec<ExceptionIssue>> = BTreeMap::new();
        for check in validation.blocking_checks() {
            let reason = check.reason_code.unwrap_or(ReasonCode::ValidationError);
            by_category
                .entry(ExceptionCategory::for_reason(reason))
                .or_default()
                .push(ExceptionIssue {
                    reason_code: reason,
                    details: check.details.clone(),
                });
        }
        if low_confidence {
            let confidence = validation.min_confidence.unwrap_or(0.0);
            by_category
                .entry(ExceptionCategory::DataQuality)
                .or_default()
                .push(ExceptionIssue {
                    reason_code: ReasonCode::InvalidDataStructure,
                    details: format!(
                        "extraction confidence {confidence:.2} below auto-approval threshold"
                    ),
                });
        }

        let now = tx.now;
        let mut opened = Vec::new();
        for (category, issues) in by_category {
            let exception = Exception::new(invoice_id, category, issues, now);
            tx.append_outbox(
                EventKind::ExceptionOpened,
                Some(invoice_id),
                json!({
                    "exception_id": exception.id,
                    "category": category,
                    "reason_code": exception.reason_code,
                    "issues": exception.issues.len(),
                }),
            );
            opened.push(tx.insert_exception(exception));
        }
        opened
    }

    /// Resolve one exception. Requires `ap_clerk` or higher; the action must
    /// be one of the suggested set or an explicit override.
    pub async fn resolve(
        &self,
        exception_id: Uuid,
        principal: &Principal,
        action: ResolutionAction,
        params: ResolutionParams,
    ) -> Result<Exception> {
        let (resolved, data_changed) =
            self.resolve_many(&[exception_id], principal, action, params)?;
        let exception = resolved
            .into_iter()
            .next()
            .ok_or_else(|| AppError::internal("resolution returned no exception"))?;
        self.dispatch_follow_up(exception.invoice_id, data_changed)?;
        Ok(exception)
    }

    /// Resolve a batch with the same action in a single transaction
    pub async fn resolve_batch(
        &self,
        exception_ids: &[Uuid],
        principal: &Principal,
        action: ResolutionAction,
        params: ResolutionParams,
    ) -> Result<Vec<Exception>> {
        let (resolved, data_changed) = self.resolve_many(exception_ids, principal, action, params)?;
        let mut invoices: Vec<Uuid> = resolved.iter().map(|e| e.invoice_id).collect();
        invoices.sort_unstable();
        invoices.dedup();
        for invoice_id in invoices {
            self.dispatch_follow_up(invoice_id, data_changed)?;
        }
        Ok(resolved)
    }

    fn resolve_many(
        &self,
        exception_ids: &[Uuid],
        principal: &Principal,
        action: ResolutionAction,
        params: ResolutionParams,
    ) -> Result<(Vec<Exception>, bool)> {
        if !principal.role.at_least(Role::ApClerk.level()) {
            return Err(AppError::permission_denied(format!(
                "principal '{}' may not resolve exceptions",
                principal.id
            )));
        }
        let data_changed = matches!(
            action,
            ResolutionAction::ManualAdjust | ResolutionAction::Recalculate
        );

        let resolved = self.store.transaction(|tx| {
            let mut resolved = Vec::with_capacity(exception_ids.len());
            for &exception_id in exception_ids {
                let mut exception = tx.exception(exception_id)?;
                let now = tx.now;
                exception.resolve(&principal.id, action, params.notes.clone(), now)?;
                let stored = tx.update_exception(&exception)?;

                match action {
                    ResolutionAction::ManualAdjust => {
                        Self::apply_manual_adjust(tx, stored.invoice_id, &params.adjusted_fields)?;
                    }
                    ResolutionAction::Recalculate => {
                        Self::apply_recalculate(tx, stored.invoice_id)?;
                    }
                    ResolutionAction::MarkDuplicate => {
                        let mut invoice = tx.invoice(stored.invoice_id)?;
                        invoice.archived = true;
                        tx.update_invoice(&invoice)?;
                    }
                    _ => {}
                }

                tx.append_outbox(
                    EventKind::ExceptionResolved,
                    Some(stored.invoice_id),
                    json!({
                        "exception_id": stored.id,
                        "category": stored.category,
                        "action": action,
                        "actor": principal.id,
                        "opened_at": stored.created_at,
                        "resolved_at": stored.resolved_at,
                    }),
                );
                resolved.push(stored);
            }
            Ok(resolved)
        })?;

        for exception in &resolved {
            info!(
                exception_id = %exception.id,
                invoice_id = %exception.invoice_id,
                action = ?action,
                resolved_by = %principal.id,
                "Exception resolved"
            );
        }
        Ok((resolved, data_changed))
    }

    /// Patch extraction header fields with reviewed values
    fn apply_manual_adjust(
        tx: &mut StoreTx<'_>,
        invoice_id: Uuid,
        adjusted_fields: &BTreeMap<String, String>,
    ) -> Result<()> {
        if adjusted_fields.is_empty() {
            warn!(invoice_id = %invoice_id, "Manual adjust without adjusted fields");
            return Ok(());
        }
        let mut extraction = tx
            .extraction_for(invoice_id)
            .ok_or_else(|| AppError::not_found(format!("extraction for invoice {invoice_id}")))?;
        for (field, value) in adjusted_fields {
            extraction.patch_header(field, value.clone());
        }
        tx.update_extraction(&extraction)?;
        Ok(())
    }

    /// Recompute subtotal and total from the line items
    fn apply_recalculate(tx: &mut StoreTx<'_>, invoice_id: Uuid) -> Result<()> {
        let mut extraction = tx
            .extraction_for(invoice_id)
            .ok_or_else(|| AppError::not_found(format!("extraction for invoice {invoice_id}")))?;
        let line_sum: Decimal = extraction
            .lines
            .iter()
            .filter_map(|l| l.decimal("amount"))
            .sum();
        let tax = extraction
            .header_decimal("tax_amount")
            .unwrap_or(Decimal::ZERO);
        let subtotal = money::round_money(line_sum);
        let total = money::round_money(subtotal + tax);
        extraction.patch_header("subtotal", subtotal.to_string());
        extraction.patch_header("total_amount", total.to_string());
        tx.update_extraction(&extraction)?;
        Ok(())
    }

    /// After resolution the workflow advances: data-changing actions go
    /// through re-validation first.
    fn dispatch_follow_up(&self, invoice_id: Uuid, data_changed: bool) -> Result<()> {
        let op_type = if data_changed {
            "invoice.revalidate"
        } else {
            "invoice.process"
        };
        self.queue
            .enqueue(op_type, json!({ "invoice_id": invoice_id }))?;
        Ok(())
    }

    pub fn exceptions_for(&self, invoice_id: Uuid) -> Vec<Exception> {
        self.store.read(|t| t.exceptions_for(invoice_id))
    }

    pub fn open_exceptions_for(&self, invoice_id: Uuid) -> Vec<Exception> {
        self.store.read(|t| t.open_exceptions_for(invoice_id))
    }
}
