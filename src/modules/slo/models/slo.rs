// Service-level objectives, indicator measurements, and breach alerts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::ids;

/// How an SLI value is aggregated from its samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SliAggregation {
    /// Nearest-rank percentile of sample values
    P95,
    /// Fraction of samples with value >= 0.5, as a percentage
    SuccessRate,
    /// Arithmetic mean of sample values
    Mean,
}

/// Direction of the objective
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SloComparison {
    AtMost,
    AtLeast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SloWindow {
    Hourly,
    Daily,
    Weekly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SloDefinition {
    pub name: String,
    pub target: f64,
    pub unit: String,
    pub comparison: SloComparison,
    pub aggregation: SliAggregation,
    pub window: SloWindow,
    /// Burn-rate multiple that triggers an alert
    pub burn_alert_threshold: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl SloDefinition {
    pub fn new(
        name: &str,
        target: f64,
        unit: &str,
        comparison: SloComparison,
        aggregation: SliAggregation,
        window: SloWindow,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.to_string(),
            target,
            unit: unit.to_string(),
            comparison,
            aggregation,
            window,
            burn_alert_threshold: 1.0,
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    /// Whether one sample consumes error budget
    pub fn sample_is_bad(&self, value: f64) -> bool {
        match (self.comparison, self.aggregation) {
            (SloComparison::AtMost, _) => value > self.target,
            // rate objectives sample per-event success as 0/1
            (SloComparison::AtLeast, SliAggregation::SuccessRate) => value < 0.5,
            // mean objectives sample on the target's own scale
            (SloComparison::AtLeast, _) => value < self.target,
        }
    }

    /// Fraction of events allowed to be bad before the budget is gone
    pub fn error_budget(&self) -> f64 {
        match self.comparison {
            // p95-style objective: 5% of events may exceed the target
            SloComparison::AtMost => 0.05,
            // rate objective: target is a percentage of good events
            SloComparison::AtLeast => (1.0 - self.target / 100.0).max(0.001),
        }
    }

    /// The spec's seven required objectives
    pub fn defaults(now: DateTime<Utc>) -> Vec<SloDefinition> {
        use SliAggregation::*;
        use SloComparison::*;
        use SloWindow::*;
        vec![
            SloDefinition::new("time_to_ready", 5.0, "minutes p95", AtMost, P95, Hourly, now),
            SloDefinition::new(
                "validation_pass_rate",
                90.0,
                "% daily",
                AtLeast,
                SuccessRate,
                Daily,
                now,
            ),
            SloDefinition::new(
                "duplicate_recall",
                98.0,
                "% weekly",
                AtLeast,
                SuccessRate,
                Weekly,
                now,
            ),
            SloDefinition::new(
                "approval_latency",
                2.0,
                "hours p95",
                AtMost,
                P95,
                Hourly,
                now,
            ),
            SloDefinition::new(
                "processing_success_rate",
                95.0,
                "% daily",
                AtLeast,
                SuccessRate,
                Daily,
                now,
            ),
            SloDefinition::new(
                "extraction_accuracy",
                92.0,
                "mean confidence daily",
                AtLeast,
                Mean,
                Daily,
                now,
            ),
            SloDefinition::new(
                "exception_resolution_time",
                4.0,
                "hours p95",
                AtMost,
                P95,
                Hourly,
                now,
            ),
        ]
    }
}

/// One raw SLI observation (an event-derived data point)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SliSample {
    pub slo_name: String,
    pub value: f64,
    pub at: DateTime<Utc>,
}

/// Aggregated SLI over a fixed window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SliMeasurement {
    pub id: Uuid,
    pub slo_name: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub value: f64,
    pub sample_count: usize,
    pub met: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SloAlert {
    pub id: Uuid,
    pub slo_name: String,
    pub severity: AlertSeverity,
    pub burn_rate: f64,
    pub window: String,
    pub message: String,
    pub triggered_at: DateTime<Utc>,
}

impl SloAlert {
    pub fn new(
        slo_name: &str,
        severity: AlertSeverity,
        burn_rate: f64,
        window: &str,
        message: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ids::new_id(),
            slo_name: slo_name.to_string(),
            severity,
            burn_rate,
            window: window.to_string(),
            message,
            triggered_at: now,
        }
    }
}

/// Nearest-rank percentile; `p` in (0, 1]
pub fn percentile(samples: &[f64], p: f64) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let rank = ((p * sorted.len() as f64).ceil() as usize).clamp(1, sorted.len());
    Some(sorted[rank - 1])
}
