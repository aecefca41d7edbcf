// Hourly expiry sweep for idempotency records.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::core::Result;
use crate::modules::jobs::services::ScheduledTask;

use super::manager::IdempotencyManager;

pub struct SweepTask(pub Arc<IdempotencyManager>);

#[async_trait]
impl ScheduledTask for SweepTask {
    fn name(&self) -> &'static str {
        "idempotency_sweep"
    }

    async fn run(&self) -> Result<()> {
        let removed = self.0.sweep()?;
        if removed > 0 {
            info!(removed, "Idempotency sweep complete");
        }
        Ok(())
    }
}
