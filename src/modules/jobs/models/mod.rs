pub mod job;

pub use job::{Job, JobState, QueueName, PAYLOAD_VERSION};
