pub mod dlq_monitor;
pub mod queue;
pub mod retry;
pub mod scheduler;
pub mod worker;

pub use dlq_monitor::DlqMonitorTask;
pub use queue::{JobQueue, QueueRouting, DEFAULT_QUEUE_DEPTH, DEFAULT_VISIBILITY_TIMEOUT};
pub use retry::RetryPolicy;
pub use scheduler::{CronSchedule, ScheduledTask, Scheduler};
pub use worker::{CancelSignal, JobContext, JobHandler, WorkerPool};
