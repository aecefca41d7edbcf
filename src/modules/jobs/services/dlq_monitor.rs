// Dead-letter monitor: alerts when any queue's DLQ depth crosses the
// threshold (every 5 minutes).

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

use crate::core::Result;
use crate::modules::jobs::models::QueueName;
use crate::store::{EventKind, MemoryStore};

use super::queue::JobQueue;
use super::scheduler::ScheduledTask;

pub struct DlqMonitorTask {
    store: Arc<MemoryStore>,
    queue: Arc<JobQueue>,
    threshold: usize,
}

impl DlqMonitorTask {
    pub fn new(store: Arc<MemoryStore>, queue: Arc<JobQueue>, threshold: usize) -> Self {
        Self {
            store,
            queue,
            threshold,
        }
    }
}

#[async_trait]
impl ScheduledTask for DlqMonitorTask {
    fn name(&self) -> &'static str {
        "dlq_monitor"
    }

    async fn run(&self) -> Result<()> {
        for queue_name in QueueName::ALL {
            let depth = self.queue.dead_jobs(queue_name).len();
            if depth < self.threshold {
                continue;
            }
            warn!(queue = %queue_name, depth, "DLQ depth over threshold");
            self.store.transaction(|tx| {
                tx.append_outbox(
                    EventKind::DlqAlert,
                    None,
                    json!({
                        "queue": queue_name,
                        "depth": depth,
                        "threshold": self.threshold,
                    }),
                );
                Ok(())
            })?;
        }
        Ok(())
    }
}
