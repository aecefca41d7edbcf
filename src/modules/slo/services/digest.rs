// Weekly executive digest: aggregates the week's throughput, exception and
// export activity, and SLI standings into one outbox event (Mon 09:00 UTC).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use serde_json::{json, Value};
use tracing::info;

use crate::core::{Clock, Result};
use crate::modules::exceptions::models::ExceptionStatus;
use crate::modules::exports::models::ExportStatus;
use crate::modules::invoices::models::InvoiceState;
use crate::modules::jobs::services::ScheduledTask;
use crate::store::{EventKind, MemoryStore};

pub struct DigestService {
    store: Arc<MemoryStore>,
    clock: Arc<dyn Clock>,
}

impl DigestService {
    pub fn new(store: Arc<MemoryStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Build the digest payload for the trailing seven days
    pub fn build(&self) -> Value {
        let now = self.clock.now();
        let week_ago = now - ChronoDuration::days(7);

        self.store.read(|t| {
            let invoices = t.invoices();
            let received = invoices.iter().filter(|i| i.created_at >= week_ago).count();
            let completed = invoices
                .iter()
                .filter(|i| i.state == InvoiceState::Done && i.updated_at >= week_ago)
                .count();
            let rejected = invoices
                .iter()
                .filter(|i| i.state == InvoiceState::Rejected && i.updated_at >= week_ago)
                .count();

            let mut exceptions_opened = 0;
            let mut exceptions_resolved = 0;
            let mut exports_posted = 0;
            let mut exports_rolled_back = 0;
            for invoice in &invoices {
                for exception in t.exceptions_for(invoice.id) {
                    if exception.created_at >= week_ago {
                        exceptions_opened += 1;
                    }
                    if exception.status == ExceptionStatus::Resolved
                        && exception.resolved_at.map(|at| at >= week_ago).unwrap_or(false)
                    {
                        exceptions_resolved += 1;
                    }
                }
                for export in t.staged_exports_for_invoice(invoice.id) {
                    if export.status == ExportStatus::Posted
                        && export.posted_at.map(|at| at >= week_ago).unwrap_or(false)
                    {
                        exports_posted += 1;
                    }
                    if export.status == ExportStatus::RolledBack {
                        exports_rolled_back += 1;
                    }
                }
            }

            let slo_standings: Vec<Value> = t
                .slo_definitions()
                .iter()
                .map(|definition| {
                    let recent: Vec<_> = t
                        .sli_measurements_for(&definition.name)
                        .into_iter()
                        .filter(|m| m.window_end >= week_ago)
                        .collect();
                    let met = recent.iter().filter(|m| m.met).count();
                    json!({
                        "slo": definition.name,
                        "target": definition.target,
                        "unit": definition.unit,
                        "windows_measured": recent.len(),
                        "windows_met": met,
                    })
                })
                .collect();

            json!({
                "period_start": week_ago,
                "period_end": now,
                "invoices": {
                    "received": received,
                    "completed": completed,
                    "rejected": rejected,
                },
                "exceptions": {
                    "opened": exceptions_opened,
                    "resolved": exceptions_resolved,
                },
                "exports": {
                    "posted": exports_posted,
                    "rolled_back": exports_rolled_back,
                },
                "slos": slo_standings,
            })
        })
    }

    pub fn publish(&self) -> Result<()> {
        let digest = self.build();
        self.store.transaction(|tx| {
            tx.append_outbox(EventKind::WeeklyDigest, None, digest.clone());
            Ok(())
        })?;
        info!("Weekly digest published");
        Ok(())
    }
}

pub struct DigestTask(pub Arc<DigestService>);

#[async_trait]
impl ScheduledTask for DigestTask {
    fn name(&self) -> &'static str {
        "cfo_digest"
    }

    async fn run(&self) -> Result<()> {
        self.0.publish()
    }
}
