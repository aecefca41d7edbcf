// Transactional in-process store.
//
// `transaction` runs the closure against a snapshot of all tables and
// commits atomically on Ok; an Err discards every staged change. The global
// write lock serializes transactions, which gives the serializable isolation
// the staged-export transitions require. Optimistic concurrency is still
// enforced per entity via `version` asserts so that steps interleaved across
// transactions fail with `Conflict` instead of silently clobbering.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::core::{ids, AppError, Clock, Result};
use crate::modules::approvals::models::{ApprovalDecision, ApprovalRequest, PolicyGate};
use crate::modules::exceptions::models::Exception;
use crate::modules::exports::models::{ExportFormat, StagedExport};
use crate::modules::idempotency::models::IdempotencyRecord;
use crate::modules::invoices::models::{Extraction, Invoice};
use crate::modules::validation::models::Validation;
use crate::modules::jobs::models::{Job, JobState, QueueName};
use crate::modules::slo::models::{SliMeasurement, SloAlert, SloDefinition};

use super::outbox::{AuditRecord, EventKind, OutboxEvent};

#[derive(Debug, Clone)]
struct OutboxEntry {
    event: OutboxEvent,
    done: bool,
}

/// All persisted tables. Entities are exclusively owned by their parent
/// aggregate; extraction and validation are keyed by their owning invoice.
#[derive(Default, Clone)]
pub struct Tables {
    invoices: HashMap<Uuid, Invoice>,
    invoice_fingerprints: HashMap<(String, String), Uuid>,
    extractions: HashMap<Uuid, Extraction>,
    validations: HashMap<Uuid, Validation>,
    exceptions: HashMap<Uuid, Exception>,
    approval_requests: HashMap<Uuid, ApprovalRequest>,
    approval_decisions: Vec<ApprovalDecision>,
    policy_gates: Vec<PolicyGate>,
    staged_exports: HashMap<Uuid, StagedExport>,
    idempotency_records: HashMap<String, IdempotencyRecord>,
    jobs: HashMap<Uuid, Job>,
    outbox: Vec<OutboxEntry>,
    outbox_seq: u64,
    audit_log: Vec<AuditRecord>,
    slo_definitions: HashMap<String, SloDefinition>,
    sli_measurements: Vec<SliMeasurement>,
    slo_alerts: Vec<SloAlert>,
    documents: HashMap<String, Vec<u8>>,
}

impl Tables {
    // ---- invoices ----

    pub fn invoice(&self, id: Uuid) -> Result<Invoice> {
        self.try_invoice(id)
            .ok_or_else(|| AppError::not_found(format!("invoice {id}")))
    }

    pub fn try_invoice(&self, id: Uuid) -> Option<Invoice> {
        self.invoices.get(&id).cloned()
    }

    pub fn invoice_by_fingerprint(&self, content_hash: &str, scope: &str) -> Option<Invoice> {
        self.invoice_fingerprints
            .get(&(content_hash.to_string(), scope.to_string()))
            .and_then(|id| self.invoices.get(id))
            .cloned()
    }

    pub fn invoices(&self) -> Vec<Invoice> {
        let mut all: Vec<Invoice> = self.invoices.values().cloned().collect();
        all.sort_by_key(|i| i.created_at);
        all
    }

    // ---- extractions / validations ----

    pub fn extraction_for(&self, invoice_id: Uuid) -> Option<Extraction> {
        self.extractions.get(&invoice_id).cloned()
    }

    pub fn validation_for(&self, invoice_id: Uuid) -> Option<Validation> {
        self.validations.get(&invoice_id).cloned()
    }

    // ---- exceptions ----

    pub fn exception(&self, id: Uuid) -> Result<Exception> {
        self.exceptions
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::not_found(format!("exception {id}")))
    }

    pub fn exceptions_for(&self, invoice_id: Uuid) -> Vec<Exception> {
        let mut all: Vec<Exception> = self
            .exceptions
            .values()
            .filter(|e| e.invoice_id == invoice_id)
            .cloned()
            .collect();
        all.sort_by_key(|e| e.created_at);
        all
    }

    pub fn open_exceptions_for(&self, invoice_id: Uuid) -> Vec<Exception> {
        self.exceptions_for(invoice_id)
            .into_iter()
            .filter(|e| e.is_open())
            .collect()
    }

    // ---- approvals ----

    pub fn approval_request(&self, id: Uuid) -> Result<ApprovalRequest> {
        self.approval_requests
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::not_found(format!("approval request {id}")))
    }

    pub fn approval_requests_for_subject(&self, subject_ref: Uuid) -> Vec<ApprovalRequest> {
        let mut all: Vec<ApprovalRequest> = self
            .approval_requests
            .values()
            .filter(|r| r.subject_ref == subject_ref)
            .cloned()
            .collect();
        all.sort_by_key(|r| r.created_at);
        all
    }

    pub fn pending_approval_for_subject(&self, subject_ref: Uuid) -> Option<ApprovalRequest> {
        self.approval_requests_for_subject(subject_ref)
            .into_iter()
            .find(|r| !r.is_settled())
    }

    pub fn pending_approval_requests(&self) -> Vec<ApprovalRequest> {
        let mut all: Vec<ApprovalRequest> = self
            .approval_requests
            .values()
            .filter(|r| !r.is_settled())
            .cloned()
            .collect();
        all.sort_by_key(|r| r.created_at);
        all
    }

    pub fn decisions_for(&self, request_id: Uuid) -> Vec<ApprovalDecision> {
        self.approval_decisions
            .iter()
            .filter(|d| d.request_id == request_id)
            .cloned()
            .collect()
    }

    /// Gates in evaluation order: ascending priority value
    pub fn policy_gates(&self) -> Vec<PolicyGate> {
        let mut gates = self.policy_gates.clone();
        gates.sort_by_key(|g| g.priority);
        gates
    }

    // ---- staged exports ----

    pub fn staged_export(&self, id: Uuid) -> Result<StagedExport> {
        self.staged_exports
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::not_found(format!("staged export {id}")))
    }

    pub fn staged_export_for(
        &self,
        invoice_id: Uuid,
        destination: &str,
        format: ExportFormat,
    ) -> Option<StagedExport> {
        self.staged_exports
            .values()
            .find(|e| {
                e.invoice_id == invoice_id && e.destination == destination && e.format == format
            })
            .cloned()
    }

    pub fn staged_exports_for_invoice(&self, invoice_id: Uuid) -> Vec<StagedExport> {
        let mut all: Vec<StagedExport> = self
            .staged_exports
            .values()
            .filter(|e| e.invoice_id == invoice_id)
            .cloned()
            .collect();
        all.sort_by_key(|e| e.created_at);
        all
    }

    // ---- idempotency ----

    pub fn idempotency(&self, key: &str) -> Option<IdempotencyRecord> {
        self.idempotency_records.get(key).cloned()
    }

    // ---- jobs ----

    pub fn job(&self, id: Uuid) -> Result<Job> {
        self.jobs
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::not_found(format!("job {id}")))
    }

    pub fn jobs_in_state(&self, queue: QueueName, state: JobState) -> Vec<Job> {
        let mut all: Vec<Job> = self
            .jobs
            .values()
            .filter(|j| j.queue == queue && j.state == state)
            .cloned()
            .collect();
        all.sort_by_key(|j| (j.next_visible_at, j.enqueued_at));
        all
    }

    /// Live depth: jobs not yet in a terminal state
    pub fn queue_depth(&self, queue: QueueName) -> usize {
        self.jobs
            .values()
            .filter(|j| {
                j.queue == queue && matches!(j.state, JobState::Queued | JobState::Leased)
            })
            .count()
    }

    // ---- slo ----

    pub fn slo_definition(&self, name: &str) -> Option<SloDefinition> {
        self.slo_definitions.get(name).cloned()
    }

    pub fn slo_definitions(&self) -> Vec<SloDefinition> {
        let mut all: Vec<SloDefinition> = self.slo_definitions.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub fn sli_measurements_for(&self, slo_name: &str) -> Vec<SliMeasurement> {
        self.sli_measurements
            .iter()
            .filter(|m| m.slo_name == slo_name)
            .cloned()
            .collect()
    }

    pub fn slo_alerts(&self) -> Vec<SloAlert> {
        self.slo_alerts.clone()
    }

    pub fn slo_alerts_for(&self, slo_name: &str) -> Vec<SloAlert> {
        self.slo_alerts
            .iter()
            .filter(|a| a.slo_name == slo_name)
            .cloned()
            .collect()
    }

    // ---- outbox / audit ----

    /// Every event recorded for an invoice, regardless of relay progress
    pub fn outbox_events_for(&self, invoice_id: Uuid) -> Vec<OutboxEvent> {
        self.outbox
            .iter()
            .filter(|e| e.event.invoice_id == Some(invoice_id))
            .map(|e| e.event.clone())
            .collect()
    }

    pub fn outbox_events(&self) -> Vec<OutboxEvent> {
        self.outbox.iter().map(|e| e.event.clone()).collect()
    }

    pub fn audit_for_invoice(&self, invoice_id: Uuid) -> Vec<AuditRecord> {
        self.audit_log
            .iter()
            .filter(|a| a.invoice_id == Some(invoice_id))
            .cloned()
            .collect()
    }

    // ---- documents ----

    pub fn document(&self, storage_ref: &str) -> Option<Vec<u8>> {
        self.documents.get(storage_ref).cloned()
    }
}

/// Mutating view inside a transaction
pub struct StoreTx<'a> {
    tables: &'a mut Tables,
    pub now: DateTime<Utc>,
}

impl<'a> std::ops::Deref for StoreTx<'a> {
    type Target = Tables;

    fn deref(&self) -> &Tables {
        self.tables
    }
}

impl<'a> StoreTx<'a> {
    // ---- invoices ----

    pub fn insert_invoice(&mut self, invoice: Invoice) -> Result<Invoice> {
        let fingerprint = invoice.fingerprint();
        if let Some(existing) = self.tables.invoice_fingerprints.get(&fingerprint) {
            return Err(AppError::duplicate(format!(
                "invoice with same content hash already exists: {existing}"
            )));
        }
        self.tables
            .invoice_fingerprints
            .insert(fingerprint, invoice.id);
        self.tables.invoices.insert(invoice.id, invoice.clone());
        Ok(invoice)
    }

    pub fn update_invoice(&mut self, invoice: &Invoice) -> Result<Invoice> {
        let current = self
            .tables
            .invoices
            .get(&invoice.id)
            .ok_or_else(|| AppError::not_found(format!("invoice {}", invoice.id)))?;
        if current.version != invoice.version {
            return Err(AppError::conflict(format!(
                "invoice {} modified concurrently (stored v{}, expected v{})",
                invoice.id, current.version, invoice.version
            )));
        }
        let mut stored = invoice.clone();
        stored.version += 1;
        stored.updated_at = self.now;
        self.tables.invoices.insert(stored.id, stored.clone());
        Ok(stored)
    }

    // ---- extractions / validations ----

    /// Bind a new current extraction, superseding any previous one
    pub fn put_extraction(&mut self, extraction: Extraction) -> Extraction {
        let mut stored = extraction;
        if let Some(previous) = self.tables.extractions.get(&stored.invoice_id) {
            stored.version = previous.version + 1;
        }
        self.tables
            .extractions
            .insert(stored.invoice_id, stored.clone());
        stored
    }

    pub fn update_extraction(&mut self, extraction: &Extraction) -> Result<Extraction> {
        let current = self
            .tables
            .extractions
            .get(&extraction.invoice_id)
            .ok_or_else(|| {
                AppError::not_found(format!("extraction for invoice {}", extraction.invoice_id))
            })?;
        if current.version != extraction.version {
            return Err(AppError::conflict(format!(
                "extraction for invoice {} modified concurrently",
                extraction.invoice_id
            )));
        }
        let mut stored = extraction.clone();
        stored.version += 1;
        self.tables
            .extractions
            .insert(stored.invoice_id, stored.clone());
        Ok(stored)
    }

    pub fn put_validation(&mut self, validation: Validation) -> Validation {
        let mut stored = validation;
        if let Some(previous) = self.tables.validations.get(&stored.invoice_id) {
            stored.version = previous.version + 1;
        }
        self.tables
            .validations
            .insert(stored.invoice_id, stored.clone());
        stored
    }

    // ---- exceptions ----

    pub fn insert_exception(&mut self, exception: Exception) -> Exception {
        self.tables
            .exceptions
            .insert(exception.id, exception.clone());
        exception
    }

    pub fn update_exception(&mut self, exception: &Exception) -> Result<Exception> {
        let current = self
            .tables
            .exceptions
            .get(&exception.id)
            .ok_or_else(|| AppError::not_found(format!("exception {}", exception.id)))?;
        if current.version != exception.version {
            return Err(AppError::conflict(format!(
                "exception {} modified concurrently",
                exception.id
            )));
        }
        let mut stored = exception.clone();
        stored.version += 1;
        stored.updated_at = self.now;
        self.tables.exceptions.insert(stored.id, stored.clone());
        Ok(stored)
    }

    // ---- approvals ----

    pub fn insert_approval_request(&mut self, request: ApprovalRequest) -> ApprovalRequest {
        self.tables
            .approval_requests
            .insert(request.id, request.clone());
        request
    }

    pub fn update_approval_request(&mut self, request: &ApprovalRequest) -> Result<ApprovalRequest> {
        let current = self
            .tables
            .approval_requests
            .get(&request.id)
            .ok_or_else(|| AppError::not_found(format!("approval request {}", request.id)))?;
        if current.version != request.version {
            return Err(AppError::conflict(format!(
                "approval request {} modified concurrently",
                request.id
            )));
        }
        let mut stored = request.clone();
        stored.version += 1;
        stored.updated_at = self.now;
        self.tables
            .approval_requests
            .insert(stored.id, stored.clone());
        Ok(stored)
    }

    /// Decisions are append-only; conflicts are impossible by construction
    pub fn append_decision(&mut self, decision: ApprovalDecision) {
        self.tables.approval_decisions.push(decision);
    }

    pub fn upsert_policy_gate(&mut self, gate: PolicyGate) {
        if let Some(existing) = self
            .tables
            .policy_gates
            .iter_mut()
            .find(|g| g.id == gate.id)
        {
            *existing = gate;
        } else {
            self.tables.policy_gates.push(gate);
        }
    }

    // ---- staged exports ----

    pub fn insert_staged_export(&mut self, export: StagedExport) -> StagedExport {
        self.tables.staged_exports.insert(export.id, export.clone());
        export
    }

    pub fn update_staged_export(&mut self, export: &StagedExport) -> Result<StagedExport> {
        let current = self
            .tables
            .staged_exports
            .get(&export.id)
            .ok_or_else(|| AppError::not_found(format!("staged export {}", export.id)))?;
        if current.version != export.version {
            return Err(AppError::conflict(format!(
                "staged export {} modified concurrently",
                export.id
            )));
        }
        let mut stored = export.clone();
        stored.version += 1;
        stored.updated_at = self.now;
        self.tables.staged_exports.insert(stored.id, stored.clone());
        Ok(stored)
    }

    // ---- idempotency ----

    /// Insert honoring UNIQUE(key); concurrent claims serialize here
    pub fn insert_idempotency(&mut self, record: IdempotencyRecord) -> Result<()> {
        if self.tables.idempotency_records.contains_key(&record.key) {
            return Err(AppError::duplicate(format!(
                "idempotency key already claimed: {}",
                record.key
            )));
        }
        self.tables
            .idempotency_records
            .insert(record.key.clone(), record);
        Ok(())
    }

    pub fn update_idempotency(&mut self, record: IdempotencyRecord) -> Result<()> {
        if !self.tables.idempotency_records.contains_key(&record.key) {
            return Err(AppError::not_found(format!(
                "idempotency record {}",
                record.key
            )));
        }
        self.tables
            .idempotency_records
            .insert(record.key.clone(), record);
        Ok(())
    }

    /// Delete expired completed/failed records; returns how many
    pub fn sweep_idempotency(&mut self) -> usize {
        let now = self.now;
        let before = self.tables.idempotency_records.len();
        self.tables
            .idempotency_records
            .retain(|_, rec| !rec.is_expired(now));
        before - self.tables.idempotency_records.len()
    }

    // ---- jobs ----

    pub fn insert_job(&mut self, job: Job) -> Job {
        self.tables.jobs.insert(job.id, job.clone());
        job
    }

    pub fn update_job(&mut self, job: &Job) -> Result<Job> {
        let current = self
            .tables
            .jobs
            .get(&job.id)
            .ok_or_else(|| AppError::not_found(format!("job {}", job.id)))?;
        if current.version != job.version {
            return Err(AppError::conflict(format!(
                "job {} modified concurrently",
                job.id
            )));
        }
        let mut stored = job.clone();
        stored.version += 1;
        stored.updated_at = self.now;
        self.tables.jobs.insert(stored.id, stored.clone());
        Ok(stored)
    }

    // ---- outbox / audit ----

    /// Record an observable event in the same transaction as the mutation
    pub fn append_outbox(
        &mut self,
        kind: EventKind,
        invoice_id: Option<Uuid>,
        payload: Value,
    ) -> u64 {
        self.tables.outbox_seq += 1;
        let seq = self.tables.outbox_seq;
        self.tables.outbox.push(OutboxEntry {
            event: OutboxEvent {
                id: ids::new_id(),
                seq,
                kind,
                invoice_id,
                payload,
                recorded_at: self.now,
            },
            done: false,
        });
        seq
    }

    /// Append an audit row for a drained event unless already recorded
    pub fn append_audit_once(&mut self, event: &OutboxEvent) {
        if self
            .tables
            .audit_log
            .iter()
            .any(|a| a.event_seq == event.seq)
        {
            return;
        }
        let actor = event
            .payload
            .get("actor")
            .and_then(|a| a.as_str())
            .map(|a| a.to_string());
        self.tables.audit_log.push(AuditRecord {
            id: ids::new_id(),
            event_seq: event.seq,
            kind: event.kind,
            invoice_id: event.invoice_id,
            actor,
            payload: event.payload.clone(),
            recorded_at: event.recorded_at,
        });
    }

    // ---- slo ----

    pub fn upsert_slo_definition(&mut self, definition: SloDefinition) {
        self.tables
            .slo_definitions
            .insert(definition.name.clone(), definition);
    }

    pub fn insert_sli_measurement(&mut self, measurement: SliMeasurement) {
        self.tables.sli_measurements.push(measurement);
    }

    pub fn insert_slo_alert(&mut self, alert: SloAlert) {
        self.tables.slo_alerts.push(alert);
    }

    // ---- documents ----

    pub fn put_document(&mut self, bytes: Vec<u8>) -> String {
        let storage_ref = format!("mem://{}", ids::new_id());
        self.tables.documents.insert(storage_ref.clone(), bytes);
        storage_ref
    }
}

/// Shared transactional store
pub struct MemoryStore {
    inner: Mutex<Tables>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Tables::default()),
            clock,
        })
    }

    /// Atomic multi-entity transaction. The closure runs against a snapshot;
    /// Ok commits everything, Err discards everything.
    pub fn transaction<T>(&self, f: impl FnOnce(&mut StoreTx) -> Result<T>) -> Result<T> {
        let mut guard = self.inner.lock().unwrap();
        let mut staged = guard.clone();
        let mut tx = StoreTx {
            tables: &mut staged,
            now: self.clock.now(),
        };
        let result = f(&mut tx)?;
        *guard = staged;
        Ok(result)
    }

    /// Read-only access without snapshot cost
    pub fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> T {
        let guard = self.inner.lock().unwrap();
        f(&guard)
    }

    /// Pending outbox events in sequence order, up to `limit`
    pub fn drain_outbox(&self, limit: usize) -> Vec<OutboxEvent> {
        let guard = self.inner.lock().unwrap();
        guard
            .outbox
            .iter()
            .filter(|e| !e.done)
            .take(limit)
            .map(|e| e.event.clone())
            .collect()
    }

    pub fn mark_outbox_done(&self, seqs: &[u64]) {
        let mut guard = self.inner.lock().unwrap();
        for entry in guard.outbox.iter_mut() {
            if seqs.contains(&entry.event.seq) {
                entry.done = true;
            }
        }
    }
}
