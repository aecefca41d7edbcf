// Document intake: size/type bounds, content-hash deduplication, and the
// idempotent create-then-enqueue path that starts every workflow.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::{ids, AppError, Principal, Result};
use crate::modules::idempotency::models::fingerprint;
use crate::modules::idempotency::services::IdempotencyManager;
use crate::modules::invoices::models::{Invoice, InvoiceSource};
use crate::modules::jobs::services::JobQueue;
use crate::store::{EventKind, MemoryStore};

/// Per-document ceiling: 50 MB
pub const MAX_DOCUMENT_BYTES: usize = 50 * 1024 * 1024;

/// Per-batch ceiling: 50 items
pub const MAX_BATCH_ITEMS: usize = 50;

const ACCEPTED_EXTENSIONS: [&str; 7] = ["pdf", "png", "jpg", "jpeg", "tif", "tiff", "json"];

#[derive(Debug, Clone)]
pub struct DocumentSubmission {
    pub bytes: Vec<u8>,
    pub filename: String,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SubmitOutcome {
    pub invoice_id: Uuid,
    pub duplicate: bool,
}

/// Per-item status for batch submissions
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum BatchItemStatus {
    Ok { invoice_id: Uuid },
    Duplicate { invoice_id: Uuid },
    InvalidType,
    TooLarge,
    Error { message: String },
}

pub struct IngestService {
    store: Arc<MemoryStore>,
    queue: Arc<JobQueue>,
    idempotency: Arc<IdempotencyManager>,
    idempotency_ttl: Duration,
}

impl IngestService {
    pub fn new(
        store: Arc<MemoryStore>,
        queue: Arc<JobQueue>,
        idempotency: Arc<IdempotencyManager>,
        idempotency_ttl: Duration,
    ) -> Self {
        Self {
            store,
            queue,
            idempotency,
            idempotency_ttl,
        }
    }

    /// Submit one document. The same bytes from the same submitter scope
    /// collapse onto the existing invoice with `duplicate = true`.
    pub async fn submit_document(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        principal: &Principal,
        source: InvoiceSource,
        idempotency_key: Option<&str>,
    ) -> Result<SubmitOutcome> {
        Self::check_bounds(&bytes, filename)?;
        let content_hash = ids::content_hash(&bytes);

        // the unique fingerprint decides duplicates, not idempotent replay,
        // so resubmissions are reported as duplicates rather than echoing
        // the first response
        if let Some(existing) = self
            .store
            .read(|t| t.invoice_by_fingerprint(&content_hash, &principal.scope))
        {
            info!(
                invoice_id = %existing.id,
                submitter = %principal.id,
                "Duplicate submission collapsed onto existing invoice"
            );
            self.store.transaction(|tx| {
                tx.append_outbox(
                    EventKind::InvoiceReceived,
                    Some(existing.id),
                    json!({
                        "duplicate": true,
                        "actor": principal.id,
                        "filename": filename,
                    }),
                );
                Ok(())
            })?;
            return Ok(SubmitOutcome {
                invoice_id: existing.id,
                duplicate: true,
            });
        }

        let key = match idempotency_key {
            Some(key) => key.to_string(),
            None => fingerprint(&[&content_hash, &principal.scope, "upload"]),
        };
        let filename_owned = filename.to_string();
        let principal_clone = principal.clone();
        let result = self
            .idempotency
            .execute(&key, "invoice.upload", &principal.id, self.idempotency_ttl, || async {
                let invoice = self.store.transaction(|tx| {
                    let storage_ref = tx.put_document(bytes.clone());
                    let invoice = Invoice::new(
                        content_hash.clone(),
                        principal_clone.id.clone(),
                        principal_clone.scope.clone(),
                        source,
                        storage_ref,
                        filename_owned.clone(),
                        tx.now,
                    );
                    let stored = tx.insert_invoice(invoice)?;
                    tx.append_outbox(
                        EventKind::InvoiceReceived,
                        Some(stored.id),
                        json!({
                            "duplicate": false,
                            "actor": principal_clone.id,
                            "filename": filename_owned,
                            "source": source,
                        }),
                    );
                    Ok(stored)
                })?;
                self.queue
                    .enqueue("invoice.parse", json!({ "invoice_id": invoice.id }))?;
                info!(
                    invoice_id = %invoice.id,
                    submitter = %principal_clone.id,
                    filename = %filename_owned,
                    "Invoice received"
                );
                Ok(json!(SubmitOutcome {
                    invoice_id: invoice.id,
                    duplicate: false,
                }))
            })
            .await?;

        Ok(serde_json::from_value(result)?)
    }

    /// Submit up to 50 documents; each item reports its own status
    pub async fn submit_batch(
        &self,
        items: Vec<DocumentSubmission>,
        principal: &Principal,
        batch_idempotency_key: Option<&str>,
    ) -> Result<Vec<BatchItemStatus>> {
        if items.len() > MAX_BATCH_ITEMS {
            return Err(AppError::invalid(
                "batch_too_large",
                format!("batch of {} exceeds {MAX_BATCH_ITEMS} items", items.len()),
            ));
        }

        match batch_idempotency_key {
            None => Ok(self.run_batch(items, principal).await),
            Some(key) => {
                let result = self
                    .idempotency
                    .execute(key, "invoice.batch", &principal.id, self.idempotency_ttl, || async {
                        let statuses = self.run_batch(items, principal).await;
                        Ok(serde_json::to_value(&statuses)?)
                    })
                    .await?;
                Ok(serde_json::from_value(result)?)
            }
        }
    }

    async fn run_batch(
        &self,
        items: Vec<DocumentSubmission>,
        principal: &Principal,
    ) -> Vec<BatchItemStatus> {
        let mut statuses = Vec::with_capacity(items.len());
        for item in items {
            let status = match self
                .submit_document(item.bytes, &item.filename, principal, InvoiceSource::Api, None)
                .await
            {
                Ok(outcome) if outcome.duplicate => BatchItemStatus::Duplicate {
                    invoice_id: outcome.invoice_id,
                },
                Ok(outcome) => BatchItemStatus::Ok {
                    invoice_id: outcome.invoice_id,
                },
                Err(AppError::Invalid { code, .. }) if code == "too_large" => {
                    BatchItemStatus::TooLarge
                }
                Err(AppError::Invalid { code, .. }) if code == "invalid_type" => {
                    BatchItemStatus::InvalidType
                }
                Err(e) => {
                    warn!(filename = %item.filename, error = %e, "Batch item failed");
                    BatchItemStatus::Error {
                        message: e.to_string(),
                    }
                }
            };
            statuses.push(status);
        }
        statuses
    }

    fn check_bounds(bytes: &[u8], filename: &str) -> Result<()> {
        if bytes.len() > MAX_DOCUMENT_BYTES {
            return Err(AppError::invalid(
                "too_large",
                format!(
                    "document of {} bytes exceeds the {MAX_DOCUMENT_BYTES} byte limit",
                    bytes.len()
                ),
            ));
        }
        let extension = filename
            .rsplit('.')
            .next()
            .unwrap_or_default()
            .to_lowercase();
        if !ACCEPTED_EXTENSIONS.contains(&extension.as_str()) {
            return Err(AppError::invalid(
                "invalid_type",
                format!("unsupported document type '.{extension}'"),
            ));
        }
        Ok(())
    }
}
