pub mod handlers;
pub mod runner;

pub use handlers::{ExportPostHandler, RevalidateHandler, WorkflowJobHandler};
pub use runner::{StepOutcome, WorkflowRunner};
