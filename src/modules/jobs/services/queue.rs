// Named bounded queues over the jobs table with a lease protocol.
//
// `lease` hides a job for the visibility timeout; a worker that does not
// ack/fail before the deadline forfeits the lease and the job returns to
// queued. This is the only fault-tolerance mechanism for worker crashes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::{AppError, Result};
use crate::modules::jobs::models::{Job, JobState, QueueName};
use crate::store::MemoryStore;

use super::retry::RetryPolicy;

/// Maximum live jobs per queue before producers see rejection
pub const DEFAULT_QUEUE_DEPTH: usize = 1_000;

/// Default lease visibility window
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(120);

/// Queue selection per job type
#[derive(Debug, Clone)]
pub struct QueueRouting {
    routes: HashMap<String, QueueName>,
}

impl QueueRouting {
    pub fn standard() -> Self {
        let mut routes = HashMap::new();
        routes.insert("invoice.parse".to_string(), QueueName::Ingestion);
        routes.insert("invoice.process".to_string(), QueueName::Processing);
        routes.insert("invoice.revalidate".to_string(), QueueName::Validation);
        routes.insert("export.post".to_string(), QueueName::Export);
        routes.insert("maintenance.sweep".to_string(), QueueName::Maintenance);
        Self { routes }
    }

    pub fn queue_for(&self, op_type: &str) -> QueueName {
        self.routes
            .get(op_type)
            .copied()
            .unwrap_or(QueueName::Processing)
    }
}

pub struct JobQueue {
    store: Arc<MemoryStore>,
    routing: QueueRouting,
    retry: RetryPolicy,
    max_depth: usize,
    visibility_timeout: Duration,
}

impl JobQueue {
    pub fn new(store: Arc<MemoryStore>, retry: RetryPolicy) -> Self {
        Self {
            store,
            routing: QueueRouting::standard(),
            retry,
            max_depth: DEFAULT_QUEUE_DEPTH,
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Enqueue a typed payload; rejects with `Unavailable` on a full queue
    /// so the producer backs off at its own layer.
    pub fn enqueue(&self, op_type: &str, payload: Value) -> Result<Job> {
        let queue = self.routing.queue_for(op_type);
        self.store.transaction(|tx| {
            if tx.queue_depth(queue) >= self.max_depth {
                return Err(AppError::unavailable(format!(
                    "queue {queue} is full ({} jobs)",
                    self.max_depth
                )));
            }
            let job = Job::new(queue, op_type, payload, tx.now);
            Ok(tx.insert_job(job))
        })
    }

    /// Lease the next visible job, if any. Expired leases are reclaimed
    /// lazily before selection.
    pub fn lease(&self, queue: QueueName, visibility_timeout: Duration) -> Result<Option<Job>> {
        let visibility = chrono::Duration::from_std(visibility_timeout)
            .map_err(|_| AppError::internal("visibility timeout out of range"))?;
        self.store.transaction(|tx| {
            // reclaim lapsed leases first so crashed workers release work
            let now = tx.now;
            for mut job in tx.jobs_in_state(queue, JobState::Leased) {
                if job.lease_expired(now) {
                    warn!(job_id = %job.id, queue = %queue, "Lease expired; returning job to queue");
                    job.state = JobState::Queued;
                    job.lease_deadline = None;
                    job.lease_token = None;
                    tx.update_job(&job)?;
                }
            }

            let next = tx
                .jobs_in_state(queue, JobState::Queued)
                .into_iter()
                .find(|j| j.next_visible_at <= now);
            let Some(mut job) = next else {
                return Ok(None);
            };
            job.state = JobState::Leased;
            job.attempts += 1;
            job.lease_deadline = Some(now + visibility);
            job.lease_token = Some(Uuid::new_v4());
            let leased = tx.update_job(&job)?;
            Ok(Some(leased))
        })
    }

    pub fn default_lease(&self, queue: QueueName) -> Result<Option<Job>> {
        self.lease(queue, self.visibility_timeout)
    }

    /// Acknowledge successful completion; requires the live lease token
    pub fn ack(&self, job_id: Uuid, lease_token: Uuid) -> Result<()> {
        self.store.transaction(|tx| {
            let mut job = tx.job(job_id)?;
            Self::assert_lease(&job, lease_token)?;
            job.state = JobState::Succeeded;
            job.lease_deadline = None;
            job.lease_token = None;
            tx.update_job(&job)?;
            Ok(())
        })
    }

    /// Record a failure: retryable errors reschedule with backoff until the
    /// policy is exhausted, then the job is dead-lettered. Non-retryable
    /// errors dead-letter immediately.
    pub fn fail(&self, job_id: Uuid, lease_token: Uuid, error: &AppError) -> Result<JobState> {
        self.store.transaction(|tx| {
            let mut job = tx.job(job_id)?;
            Self::assert_lease(&job, lease_token)?;
            job.last_error = Some(error.to_string());
            job.lease_deadline = None;
            job.lease_token = None;

            let exhausted = self.retry.is_exhausted(job.attempts);
            if !error.is_retryable() || exhausted {
                job.state = JobState::Dead;
                warn!(
                    job_id = %job.id,
                    queue = %job.queue,
                    attempts = job.attempts,
                    error = %error,
                    "Job dead-lettered"
                );
            } else {
                let delay = self.retry.next_delay(job.attempts);
                job.state = JobState::Queued;
                job.next_visible_at = tx.now
                    + chrono::Duration::from_std(delay)
                        .unwrap_or_else(|_| chrono::Duration::seconds(60));
                info!(
                    job_id = %job.id,
                    queue = %job.queue,
                    attempts = job.attempts,
                    delay_s = delay.as_secs(),
                    "Job scheduled for retry"
                );
            }
            let state = job.state;
            tx.update_job(&job)?;
            Ok(state)
        })
    }

    fn assert_lease(job: &Job, lease_token: Uuid) -> Result<()> {
        if job.state != JobState::Leased || job.lease_token != Some(lease_token) {
            return Err(AppError::conflict(format!(
                "job {} is not held under this lease",
                job.id
            )));
        }
        Ok(())
    }

    /// Dead-letter entries for a queue, inspectable and replayable
    pub fn dead_jobs(&self, queue: QueueName) -> Vec<Job> {
        self.store.read(|t| t.jobs_in_state(queue, JobState::Dead))
    }

    /// Requeue dead jobs with a fresh attempt budget; returns how many
    pub fn replay_dlq(&self, queue: QueueName, max: usize) -> Result<usize> {
        self.store.transaction(|tx| {
            let dead = tx.jobs_in_state(queue, JobState::Dead);
            let mut replayed = 0;
            for mut job in dead.into_iter().take(max) {
                job.state = JobState::Queued;
                job.attempts = 0;
                job.next_visible_at = tx.now;
                job.last_error = None;
                tx.update_job(&job)?;
                replayed += 1;
            }
            if replayed > 0 {
                info!(queue = %queue, replayed, "Replayed dead-letter jobs");
            }
            Ok(replayed)
        })
    }

    pub fn depth(&self, queue: QueueName) -> usize {
        self.store.read(|t| t.queue_depth(queue))
    }
}
