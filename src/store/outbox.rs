// Transactional outbox: every mutation that must emit an observable event
// writes the event in the same transaction as the entity change. A relay
// drains the outbox to subscribers at least once; events for a single
// invoice appear in transition order.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::core::Result;

use super::memory::MemoryStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    InvoiceReceived,
    WorkflowTransition,
    WorkflowCancelled,
    ValidationCompleted,
    ExceptionOpened,
    ExceptionResolved,
    ApprovalRequested,
    ApprovalDecided,
    ApprovalEscalated,
    PolicyFlagged,
    ExportPrepared,
    ExportApproved,
    ExportRejected,
    ExportPosted,
    ExportRolledBack,
    SloAlert,
    WeeklyDigest,
    DlqAlert,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: Uuid,
    /// Global sequence; per-invoice order follows transition order
    pub seq: u64,
    pub kind: EventKind,
    pub invoice_id: Option<Uuid>,
    pub payload: Value,
    pub recorded_at: DateTime<Utc>,
}

/// Audit trail row, written by the relay's audit subscriber
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub event_seq: u64,
    pub kind: EventKind,
    pub invoice_id: Option<Uuid>,
    pub actor: Option<String>,
    pub payload: Value,
    pub recorded_at: DateTime<Utc>,
}

/// Consumer of drained outbox batches. Delivery is at least once; handlers
/// must tolerate replays.
#[async_trait]
pub trait OutboxSubscriber: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, events: &[OutboxEvent]) -> Result<()>;
}

/// Drains the outbox to all subscribers. An event is marked done only after
/// every subscriber accepted the batch; a failing subscriber leaves the
/// batch for redelivery.
pub struct OutboxRelay {
    store: Arc<MemoryStore>,
    subscribers: std::sync::Mutex<Vec<Arc<dyn OutboxSubscriber>>>,
    batch_limit: usize,
    poll_interval: Duration,
}

impl OutboxRelay {
    /// `max_delivery_delay` bounds how stale a delivered event may be; the
    /// relay polls at a tenth of it (alert events inherit this bound as
    /// their delivery SLA).
    pub fn new(store: Arc<MemoryStore>, max_delivery_delay: Duration) -> Self {
        let poll_interval = (max_delivery_delay / 10)
            .max(Duration::from_millis(50))
            .min(Duration::from_millis(500));
        Self {
            store,
            subscribers: std::sync::Mutex::new(Vec::new()),
            batch_limit: 256,
            poll_interval,
        }
    }

    pub fn subscribe(&self, subscriber: Arc<dyn OutboxSubscriber>) {
        self.subscribers.lock().unwrap().push(subscriber);
    }

    /// Drain one batch; returns the number of events delivered
    pub async fn drain_once(&self) -> usize {
        let batch = self.store.drain_outbox(self.batch_limit);
        if batch.is_empty() {
            return 0;
        }
        let subscribers: Vec<Arc<dyn OutboxSubscriber>> =
            self.subscribers.lock().unwrap().clone();
        for subscriber in &subscribers {
            if let Err(e) = subscriber.handle(&batch).await {
                error!(
                    subscriber = subscriber.name(),
                    error = %e,
                    "Outbox subscriber failed; batch will be redelivered"
                );
                return 0;
            }
        }
        let seqs: Vec<u64> = batch.iter().map(|e| e.seq).collect();
        self.store.mark_outbox_done(&seqs);
        debug!(delivered = batch.len(), "Outbox batch delivered");
        batch.len()
    }

    /// Drain until the outbox is empty (used by tests and shutdown)
    pub async fn drain_all(&self) -> usize {
        let mut total = 0;
        loop {
            let delivered = self.drain_once().await;
            if delivered == 0 {
                return total;
            }
            total += delivered;
        }
    }

    /// Continuous relay loop; exits on shutdown signal
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(poll_ms = self.poll_interval.as_millis() as u64, "Starting outbox relay");
        let mut ticker = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.drain_once().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        self.drain_all().await;
                        info!("Outbox relay stopped");
                        return;
                    }
                }
            }
        }
    }
}

/// Copies every drained event into the audit log table
pub struct AuditLogSubscriber {
    store: Arc<MemoryStore>,
}

impl AuditLogSubscriber {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl OutboxSubscriber for AuditLogSubscriber {
    fn name(&self) -> &'static str {
        "audit_log"
    }

    async fn handle(&self, events: &[OutboxEvent]) -> Result<()> {
        self.store.transaction(|tx| {
            for event in events {
                // replays are possible; the audit log keys on event_seq
                tx.append_audit_once(event);
            }
            Ok(())
        })
    }
}
