pub mod digest;
pub mod metrics_service;

pub use digest::{DigestService, DigestTask};
pub use metrics_service::{DailySliTask, HourlySliTask, MetricsService};
