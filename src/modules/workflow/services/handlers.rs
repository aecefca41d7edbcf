// Job handlers binding the workflow runner into the job fabric.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{error, warn};
use uuid::Uuid;

use crate::core::{AppError, Clock, Principal, Result};
use crate::modules::exceptions::services::ExceptionManager;
use crate::modules::exports::services::StagingService;
use crate::modules::invoices::models::InvoiceState;
use crate::modules::jobs::models::Job;
use crate::modules::jobs::services::{JobContext, JobHandler, JobQueue};
use crate::modules::validation::services::RuleEngine;
use crate::store::{EventKind, MemoryStore};

use super::runner::WorkflowRunner;

fn invoice_id_from(job: &Job) -> Result<Uuid> {
    let raw = job
        .payload
        .get("invoice_id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| AppError::internal("job payload missing invoice_id"))?;
    raw.parse()
        .map_err(|_| AppError::internal(format!("malformed invoice_id '{raw}'")))
}

/// Drives the workflow; registered under both the parse and process ops so
/// queue routing stays a pure configuration concern.
pub struct WorkflowJobHandler {
    runner: Arc<WorkflowRunner>,
    op: &'static str,
}

impl WorkflowJobHandler {
    pub fn parse(runner: Arc<WorkflowRunner>) -> Self {
        Self {
            runner,
            op: "invoice.parse",
        }
    }

    pub fn process(runner: Arc<WorkflowRunner>) -> Self {
        Self {
            runner,
            op: "invoice.process",
        }
    }
}

#[async_trait]
impl JobHandler for WorkflowJobHandler {
    fn op_type(&self) -> &'static str {
        self.op
    }

    async fn handle(&self, job: &Job, ctx: &JobContext) -> Result<()> {
        let invoice_id = invoice_id_from(job)?;
        match self.runner.drive(invoice_id, &ctx.cancel).await {
            Ok(_) => Ok(()),
            Err(e) => {
                let state = self.runner.invoice(invoice_id).map(|i| i.state);
                if matches!(state, Ok(InvoiceState::Received))
                    && (!e.is_retryable() || ctx.final_attempt)
                {
                    error!(
                        invoice_id = %invoice_id,
                        error = %e,
                        "Parse retries exhausted; rejecting invoice"
                    );
                    self.runner.reject_parse_failure(invoice_id, &e)?;
                }
                Err(e)
            }
        }
    }
}

/// Re-runs validation after a data-changing resolution, opening fresh
/// exceptions if the repair introduced new failures, then drives on.
pub struct RevalidateHandler {
    store: Arc<MemoryStore>,
    clock: Arc<dyn Clock>,
    rules: Arc<RuleEngine>,
    runner: Arc<WorkflowRunner>,
}

impl RevalidateHandler {
    pub fn new(
        store: Arc<MemoryStore>,
        clock: Arc<dyn Clock>,
        rules: Arc<RuleEngine>,
        runner: Arc<WorkflowRunner>,
    ) -> Self {
        Self {
            store,
            clock,
            rules,
            runner,
        }
    }
}

#[async_trait]
impl JobHandler for RevalidateHandler {
    fn op_type(&self) -> &'static str {
        "invoice.revalidate"
    }

    async fn handle(&self, job: &Job, ctx: &JobContext) -> Result<()> {
        let invoice_id = invoice_id_from(job)?;
        let invoice = self.store.read(|t| t.invoice(invoice_id))?;

        if invoice.state == InvoiceState::Exception {
            let Some(extraction) = self.store.read(|t| t.extraction_for(invoice_id)) else {
                return Err(AppError::internal(format!(
                    "invoice {invoice_id} has no extraction to revalidate"
                )));
            };
            let validation = self
                .rules
                .validate(&invoice, &extraction, self.clock.now())
                .await;
            let passed = validation.passed;

            self.store.transaction(|tx| {
                tx.append_outbox(
                    EventKind::ValidationCompleted,
                    Some(invoice_id),
                    json!({
                        "passed": validation.passed,
                        "failures": validation.blocking_checks().count(),
                        "min_confidence": validation.min_confidence,
                        "mean_confidence": extraction.mean_confidence(),
                        "revalidation": true,
                    }),
                );
                let stored = tx.put_validation(validation.clone());
                if !passed && tx.open_exceptions_for(invoice_id).is_empty() {
                    ExceptionManager::open_in_tx(tx, invoice_id, &stored, false);
                }
                Ok(())
            })?;
            if !passed {
                warn!(
                    invoice_id = %invoice_id,
                    "Revalidation after repair still fails; exceptions reopened"
                );
            }
        }

        self.runner.drive(invoice_id, &ctx.cancel).await?;
        Ok(())
    }
}

/// Posts an approved export; on final failure the export is marked failed.
pub struct ExportPostHandler {
    staging: Arc<StagingService>,
    queue: Arc<JobQueue>,
}

impl ExportPostHandler {
    pub fn new(staging: Arc<StagingService>, queue: Arc<JobQueue>) -> Self {
        Self { staging, queue }
    }
}

#[async_trait]
impl JobHandler for ExportPostHandler {
    fn op_type(&self) -> &'static str {
        "export.post"
    }

    async fn handle(&self, job: &Job, ctx: &JobContext) -> Result<()> {
        let raw = job
            .payload
            .get("export_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AppError::internal("job payload missing export_id"))?;
        let export_id: Uuid = raw
            .parse()
            .map_err(|_| AppError::internal(format!("malformed export_id '{raw}'")))?;

        ctx.cancel.check("export post")?;
        match self.staging.post(export_id, &Principal::system()).await {
            Ok(export) => {
                self.queue.enqueue(
                    "invoice.process",
                    json!({ "invoice_id": export.invoice_id }),
                )?;
                Ok(())
            }
            Err(e) => {
                if !e.is_retryable() || ctx.final_attempt {
                    self.staging.mark_failed(export_id, &e)?;
                }
                Err(e)
            }
        }
    }
}
