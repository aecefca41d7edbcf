pub mod connector;
pub mod diff;
pub mod staging_service;

pub use connector::{BreakerState, CircuitBreaker, DestinationConnector, RecordingConnector};
pub use diff::{compute_diff, SignificanceRules};
pub use staging_service::StagingService;
