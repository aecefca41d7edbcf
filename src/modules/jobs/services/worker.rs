// Worker pool drawing from the named queues.
//
// Each leased job runs under a soft and a hard timeout: at the soft timeout
// the job's cancellation signal fires and the handler is expected to abort
// at its next suspension point; at the hard timeout the work future is
// dropped and the lease is left to lapse.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::core::{AppError, Result};
use crate::modules::jobs::models::{Job, QueueName};

use super::queue::JobQueue;

/// Cooperative cancellation handle passed to every handler
#[derive(Clone)]
pub struct CancelSignal {
    rx: Option<watch::Receiver<bool>>,
}

impl CancelSignal {
    pub fn pair() -> (watch::Sender<bool>, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        (tx, CancelSignal { rx: Some(rx) })
    }

    /// A signal that never fires
    pub fn none() -> CancelSignal {
        CancelSignal { rx: None }
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    /// Errors with `Cancelled` if the signal has fired; call at suspension
    /// points.
    pub fn check(&self, what: &str) -> Result<()> {
        if self.is_cancelled() {
            Err(AppError::cancelled(format!("{what} cancelled")))
        } else {
            Ok(())
        }
    }
}

/// Per-dispatch context
pub struct JobContext {
    /// True when the retry policy permits no further attempt after this one
    pub final_attempt: bool,
    pub cancel: CancelSignal,
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    fn op_type(&self) -> &'static str;

    async fn handle(&self, job: &Job, ctx: &JobContext) -> Result<()>;
}

pub struct WorkerPool {
    queue: Arc<JobQueue>,
    handlers: HashMap<&'static str, Arc<dyn JobHandler>>,
    soft_timeout: Duration,
    hard_timeout: Duration,
    concurrency: usize,
    /// Jobs a worker leases from one queue per pass
    prefetch: usize,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<JobQueue>,
        soft_timeout: Duration,
        hard_timeout: Duration,
        concurrency: usize,
        prefetch: usize,
    ) -> Self {
        Self {
            queue,
            handlers: HashMap::new(),
            soft_timeout,
            hard_timeout,
            concurrency: concurrency.max(1),
            prefetch: prefetch.max(1),
        }
    }

    pub fn register(&mut self, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(handler.op_type(), handler);
    }

    /// Run one job through its handler under the timeout envelope and
    /// settle the lease.
    async fn dispatch(&self, job: Job) -> Result<()> {
        let lease_token = job
            .lease_token
            .ok_or_else(|| AppError::internal("dispatched job has no lease"))?;

        let Some(handler) = self.handlers.get(job.op_type.as_str()).cloned() else {
            let err = AppError::internal(format!("no handler for op_type {}", job.op_type));
            error!(job_id = %job.id, op_type = %job.op_type, "No handler registered");
            self.queue.fail(job.id, lease_token, &err)?;
            return Ok(());
        };

        let final_attempt = self
            .queue
            .retry_policy()
            .is_exhausted(job.attempts);
        let (cancel_tx, cancel) = CancelSignal::pair();
        let ctx = JobContext {
            final_attempt,
            cancel,
        };

        debug!(
            job_id = %job.id,
            queue = %job.queue,
            op_type = %job.op_type,
            attempt = job.attempts,
            "Dispatching job"
        );

        let work = handler.handle(&job, &ctx);
        tokio::pin!(work);
        let soft = tokio::time::sleep(self.soft_timeout);
        tokio::pin!(soft);
        let hard = tokio::time::sleep(self.hard_timeout);
        tokio::pin!(hard);
        let mut soft_fired = false;

        let outcome = loop {
            tokio::select! {
                result = &mut work => break Some(result),
                _ = &mut soft, if !soft_fired => {
                    warn!(job_id = %job.id, "Soft timeout; signalling cancellation");
                    let _ = cancel_tx.send(true);
                    soft_fired = true;
                }
                _ = &mut hard => break None,
            }
        };

        match outcome {
            Some(Ok(())) => {
                self.queue.ack(job.id, lease_token)?;
                debug!(job_id = %job.id, "Job succeeded");
            }
            Some(Err(e)) => {
                self.queue.fail(job.id, lease_token, &e)?;
            }
            None => {
                // hard timeout: the worker is terminated and the lease is
                // left to expire; no ack/fail on a forfeited lease
                error!(job_id = %job.id, "Hard timeout; forfeiting lease");
            }
        }
        Ok(())
    }

    /// Deterministic drain: process runnable jobs across all queues until
    /// nothing is immediately visible. Used by tests and by maintenance
    /// commands; production workers use `spawn`.
    pub async fn run_until_idle(&self) -> Result<usize> {
        let mut processed = 0;
        loop {
            let mut progressed = false;
            for queue in QueueName::ALL {
                while let Some(job) = self.queue.default_lease(queue)? {
                    self.dispatch(job).await?;
                    processed += 1;
                    progressed = true;
                }
            }
            if !progressed {
                return Ok(processed);
            }
        }
    }

    /// Spawn the parallel worker loops; they exit on the shutdown signal.
    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<tokio::task::JoinHandle<()>> {
        (0..self.concurrency)
            .map(|worker_index| {
                let pool = Arc::clone(&self);
                let mut shutdown = shutdown.clone();
                tokio::spawn(async move {
                    info!(worker_index, "Worker started");
                    loop {
                        if *shutdown.borrow() {
                            info!(worker_index, "Worker stopping");
                            return;
                        }
                        let mut worked = false;
                        for queue in QueueName::ALL {
                            for _ in 0..pool.prefetch {
                                match pool.queue.default_lease(queue) {
                                    Ok(Some(job)) => {
                                        if let Err(e) = pool.dispatch(job).await {
                                            error!(worker_index, error = %e, "Dispatch failed");
                                        }
                                        worked = true;
                                    }
                                    Ok(None) => break,
                                    Err(e) => {
                                        error!(worker_index, error = %e, "Lease failed");
                                        break;
                                    }
                                }
                            }
                        }
                        if !worked {
                            tokio::select! {
                                _ = tokio::time::sleep(Duration::from_millis(100)) => {}
                                _ = shutdown.changed() => {}
                            }
                        }
                    }
                })
            })
            .collect()
    }
}
