// Deduplication of externally triggered operations.
//
// The claim is committed before the body runs, so a crash mid-body leaves an
// in_flight record that blocks concurrent duplicates; the record's attempt
// budget lets a retry re-claim it after a recorded failure.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::core::{AppError, Result};
use crate::modules::idempotency::models::{IdempotencyRecord, IdempotencyState};
use crate::store::MemoryStore;

pub struct IdempotencyManager {
    store: Arc<MemoryStore>,
    max_executions: u32,
}

impl IdempotencyManager {
    pub fn new(store: Arc<MemoryStore>, max_executions: u32) -> Self {
        Self {
            store,
            max_executions,
        }
    }

    /// Execute `body` at most once per key.
    ///
    /// - absent key: claim, run, record the outcome
    /// - completed: return the stored result verbatim
    /// - in_flight: `Duplicate` — the caller may poll
    /// - failed with attempts left: re-claim and run again
    pub async fn execute<F, Fut>(
        &self,
        key: &str,
        op_type: &str,
        principal: &str,
        ttl: Duration,
        body: F,
    ) -> Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|_| AppError::internal("idempotency ttl out of range"))?;

        // Claim (or reuse) the record in its own committed transaction so a
        // concurrent duplicate observes in_flight immediately.
        let claimed = self.store.transaction(|tx| {
            match tx.idempotency(key) {
                None => {
                    let record = IdempotencyRecord::begin(
                        key,
                        op_type,
                        principal,
                        self.max_executions,
                        ttl,
                        tx.now,
                    );
                    tx.insert_idempotency(record.clone())?;
                    Ok(record)
                }
                Some(existing) if existing.state == IdempotencyState::Completed => Err(
                    AppError::duplicate(format!("operation already completed: {key}")),
                ),
                Some(existing) if existing.state == IdempotencyState::InFlight => Err(
                    AppError::duplicate(format!("operation in flight: {key}")),
                ),
                Some(mut failed) => {
                    if failed.attempts >= failed.max_attempts {
                        return Err(AppError::invalid(
                            "attempts_exhausted",
                            format!(
                                "operation {key} failed permanently after {} attempts",
                                failed.attempts
                            ),
                        ));
                    }
                    failed.attempts += 1;
                    failed.state = IdempotencyState::InFlight;
                    failed.updated_at = tx.now;
                    tx.update_idempotency(failed.clone())?;
                    Ok(failed)
                }
            }
        });

        let record = match claimed {
            Ok(record) => record,
            Err(AppError::Duplicate(msg)) => {
                // completed records replay their stored result
                if let Some(stored) = self.store.read(|t| t.idempotency(key)) {
                    if stored.state == IdempotencyState::Completed {
                        debug!(key, op_type, "Replaying stored idempotent result");
                        return stored
                            .result
                            .ok_or_else(|| AppError::internal("completed record missing result"));
                    }
                }
                return Err(AppError::Duplicate(msg));
            }
            Err(other) => return Err(other),
        };

        match body().await {
            Ok(result) => {
                self.store.transaction(|tx| {
                    let mut rec = record.clone();
                    rec.state = IdempotencyState::Completed;
                    rec.result = Some(result.clone());
                    rec.error = None;
                    rec.updated_at = tx.now;
                    tx.update_idempotency(rec)
                })?;
                Ok(result)
            }
            Err(e) => {
                warn!(key, op_type, error = %e, "Idempotent operation failed");
                self.store.transaction(|tx| {
                    let mut rec = record.clone();
                    rec.state = IdempotencyState::Failed;
                    rec.error = Some(e.to_string());
                    rec.updated_at = tx.now;
                    tx.update_idempotency(rec)
                })?;
                Err(e)
            }
        }
    }

    /// Stored result for a key, if the operation completed
    pub fn peek(&self, key: &str) -> Option<Value> {
        self.store.read(|t| t.idempotency(key)).and_then(|r| {
            if r.state == IdempotencyState::Completed {
                r.result
            } else {
                None
            }
        })
    }

    /// Delete expired completed/failed records; the hourly sweep task
    pub fn sweep(&self) -> Result<usize> {
        let removed = self.store.transaction(|tx| Ok(tx.sweep_idempotency()))?;
        if removed > 0 {
            debug!(removed, "Swept expired idempotency records");
        }
        Ok(removed)
    }
}
