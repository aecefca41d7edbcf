pub mod slo;

pub use slo::{
    percentile, AlertSeverity, SliAggregation, SliMeasurement, SliSample, SloAlert,
    SloComparison, SloDefinition, SloWindow,
};
