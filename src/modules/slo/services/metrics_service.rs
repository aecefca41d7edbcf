// SLO/metrics core: derives SLI samples from outbox events, aggregates them
// over fixed windows, computes error-budget burn over rolling 1 h and 24 h
// windows, and emits breach alerts. Burn evaluation runs synchronously on
// every sample batch, which keeps alert delivery well inside the 30 s SLA.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::json;
use tracing::{info, warn};

use crate::core::{ids, Clock, Result};
use crate::modules::slo::models::{
    percentile, AlertSeverity, SliAggregation, SliMeasurement, SliSample, SloAlert,
    SloDefinition,
};
use crate::store::{EventKind, MemoryStore, OutboxEvent, OutboxSubscriber};

/// Re-alert interval for a still-breaching objective
fn alert_suppression() -> ChronoDuration {
    ChronoDuration::hours(1)
}

/// In-memory sample retention
fn sample_retention() -> ChronoDuration {
    ChronoDuration::days(8)
}

pub struct MetricsService {
    store: Arc<MemoryStore>,
    clock: Arc<dyn Clock>,
    samples: Mutex<Vec<SliSample>>,
    last_alert: Mutex<HashMap<(String, &'static str), DateTime<Utc>>>,
    /// Highest event seq already ingested; redelivered batches are skipped
    last_seq: Mutex<u64>,
}

impl MetricsService {
    pub fn new(store: Arc<MemoryStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            samples: Mutex::new(Vec::new()),
            last_alert: Mutex::new(HashMap::new()),
            last_seq: Mutex::new(0),
        }
    }

    /// Seed the required objectives if they are not already defined
    pub fn seed_defaults(&self) -> Result<()> {
        self.store.transaction(|tx| {
            for definition in SloDefinition::defaults(tx.now) {
                if tx.slo_definition(&definition.name).is_none() {
                    tx.upsert_slo_definition(definition);
                }
            }
            Ok(())
        })
    }

    /// Record one SLI observation and evaluate burn immediately
    pub fn record_sample(&self, slo_name: &str, value: f64, at: DateTime<Utc>) -> Result<()> {
        {
            let mut samples = self.samples.lock().unwrap();
            samples.push(SliSample {
                slo_name: slo_name.to_string(),
                value,
                at,
            });
            let cutoff = self.clock.now() - sample_retention();
            samples.retain(|s| s.at >= cutoff);
        }
        self.evaluate_burn()
    }

    fn samples_in(&self, slo_name: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<f64> {
        // closed interval: a sample stamped exactly at the window end counts
        self.samples
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.slo_name == slo_name && s.at >= from && s.at <= to)
            .map(|s| s.value)
            .collect()
    }

    /// Aggregate one objective over a fixed window
    pub fn measure(
        &self,
        definition: &SloDefinition,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Option<SliMeasurement> {
        let values = self.samples_in(&definition.name, window_start, window_end);
        if values.is_empty() {
            return None;
        }
        let value = match definition.aggregation {
            SliAggregation::P95 => percentile(&values, 0.95)?,
            SliAggregation::SuccessRate => {
                100.0 * values.iter().filter(|v| **v >= 0.5).count() as f64 / values.len() as f64
            }
            SliAggregation::Mean => values.iter().sum::<f64>() / values.len() as f64,
        };
        let met = match definition.comparison {
            crate::modules::slo::models::SloComparison::AtMost => value <= definition.target,
            crate::modules::slo::models::SloComparison::AtLeast => value >= definition.target,
        };
        Some(SliMeasurement {
            id: ids::new_id(),
            slo_name: definition.name.clone(),
            window_start,
            window_end,
            value,
            sample_count: values.len(),
            met,
            created_at: self.clock.now(),
        })
    }

    /// Hourly task: compute the last hour's SLIs for every objective
    pub fn compute_hourly(&self) -> Result<usize> {
        let now = self.clock.now();
        self.persist_measurements(now - ChronoDuration::hours(1), now)
    }

    /// Daily task (01:05 UTC): daily windows, plus weekly windows for the
    /// weekly objectives
    pub fn compute_daily(&self) -> Result<usize> {
        let now = self.clock.now();
        let mut written = self.persist_measurements(now - ChronoDuration::days(1), now)?;
        let definitions = self.store.read(|t| t.slo_definitions());
        for definition in definitions
            .iter()
            .filter(|d| d.window == crate::modules::slo::models::SloWindow::Weekly)
        {
            if let Some(measurement) = self.measure(definition, now - ChronoDuration::days(7), now)
            {
                self.store
                    .transaction(|tx| Ok(tx.insert_sli_measurement(measurement.clone())))?;
                written += 1;
            }
        }
        Ok(written)
    }

    fn persist_measurements(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<usize> {
        let definitions = self.store.read(|t| t.slo_definitions());
        let mut written = 0;
        for definition in &definitions {
            if let Some(measurement) = self.measure(definition, window_start, window_end) {
                self.store
                    .transaction(|tx| Ok(tx.insert_sli_measurement(measurement.clone())))?;
                written += 1;
            }
        }
        Ok(written)
    }

    /// Burn-rate evaluation over rolling 1 h and 24 h windows. A breach of
    /// the alert threshold writes an slo_alerts row and an outbox alert
    /// event in one transaction.
    pub fn evaluate_burn(&self) -> Result<()> {
        let now = self.clock.now();
        let definitions = self.store.read(|t| t.slo_definitions());

        for definition in &definitions {
            for (window_name, window) in [
                ("1h", ChronoDuration::hours(1)),
                ("24h", ChronoDuration::hours(24)),
            ] {
                let values = self.samples_in(&definition.name, now - window, now);
                if values.is_empty() {
                    continue;
                }
                let bad = values
                    .iter()
                    .filter(|v| definition.sample_is_bad(**v))
                    .count();
                let bad_fraction = bad as f64 / values.len() as f64;
                let burn_rate = bad_fraction / definition.error_budget();
                if burn_rate < definition.burn_alert_threshold {
                    continue;
                }

                {
                    let mut last = self.last_alert.lock().unwrap();
                    let key = (definition.name.clone(), window_name);
                    if let Some(at) = last.get(&key) {
                        if now - *at < alert_suppression() {
                            continue;
                        }
                    }
                    last.insert(key, now);
                }

                let severity = if burn_rate >= 2.0 * definition.burn_alert_threshold {
                    AlertSeverity::Critical
                } else {
                    AlertSeverity::Warning
                };
                let alert = SloAlert::new(
                    &definition.name,
                    severity,
                    burn_rate,
                    window_name,
                    format!(
                        "{} burning error budget at {:.1}x over the {} window ({} of {} samples bad)",
                        definition.name,
                        burn_rate,
                        window_name,
                        bad,
                        values.len()
                    ),
                    now,
                );
                warn!(
                    slo = %definition.name,
                    burn_rate,
                    window = window_name,
                    severity = ?severity,
                    "SLO burn alert"
                );
                self.store.transaction(|tx| {
                    tx.append_outbox(
                        EventKind::SloAlert,
                        None,
                        json!({
                            "slo": alert.slo_name,
                            "severity": alert.severity,
                            "burn_rate": alert.burn_rate,
                            "window": alert.window,
                            "message": alert.message,
                        }),
                    );
                    tx.insert_slo_alert(alert.clone());
                    Ok(())
                })?;
            }
        }
        Ok(())
    }

    fn minutes_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
        (to - from).num_seconds().max(0) as f64 / 60.0
    }

    fn hours_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
        (to - from).num_seconds().max(0) as f64 / 3600.0
    }

    /// Derive SLI samples from one outbox event
    fn ingest_event(&self, event: &OutboxEvent) -> Result<()> {
        let payload = &event.payload;
        match event.kind {
            EventKind::WorkflowTransition => {
                let to = payload.get("to").and_then(|v| v.as_str());
                match to {
                    Some("ready") => {
                        if let Some(received_at) = payload
                            .get("received_at")
                            .and_then(|v| serde_json::from_value(v.clone()).ok())
                        {
                            self.record_sample(
                                "time_to_ready",
                                Self::minutes_between(received_at, event.recorded_at),
                                event.recorded_at,
                            )?;
                        }
                    }
                    Some("done") => {
                        self.record_sample(
                            "processing_success_rate",
                            1.0,
                            event.recorded_at,
                        )?;
                    }
                    Some("rejected") => {
                        self.record_sample(
                            "processing_success_rate",
                            0.0,
                            event.recorded_at,
                        )?;
                    }
                    _ => {}
                }
            }
            EventKind::ValidationCompleted => {
                let passed = payload.get("passed").and_then(|v| v.as_bool()).unwrap_or(false);
                self.record_sample(
                    "validation_pass_rate",
                    if passed { 1.0 } else { 0.0 },
                    event.recorded_at,
                )?;
                if let Some(mean) = payload.get("mean_confidence").and_then(|v| v.as_f64()) {
                    self.record_sample(
                        "extraction_accuracy",
                        mean * 100.0,
                        event.recorded_at,
                    )?;
                }
            }
            EventKind::ApprovalDecided => {
                if let (Some(requested_at), Some(decided_at)) = (
                    payload
                        .get("requested_at")
                        .and_then(|v| serde_json::from_value(v.clone()).ok()),
                    payload
                        .get("decided_at")
                        .and_then(|v| serde_json::from_value(v.clone()).ok()),
                ) {
                    self.record_sample(
                        "approval_latency",
                        Self::hours_between(requested_at, decided_at),
                        event.recorded_at,
                    )?;
                }
            }
            EventKind::ExceptionResolved => {
                if let (Some(opened_at), Some(resolved_at)) = (
                    payload
                        .get("opened_at")
                        .and_then(|v| serde_json::from_value(v.clone()).ok()),
                    payload
                        .get("resolved_at")
                        .and_then(|v| serde_json::from_value(v.clone()).ok()),
                ) {
                    self.record_sample(
                        "exception_resolution_time",
                        Self::hours_between(opened_at, resolved_at),
                        event.recorded_at,
                    )?;
                }
            }
            EventKind::InvoiceReceived => {
                if payload.get("duplicate").and_then(|v| v.as_bool()) == Some(true) {
                    self.record_sample("duplicate_recall", 1.0, event.recorded_at)?;
                }
            }
            EventKind::ExceptionOpened => {
                if payload.get("category").and_then(|v| v.as_str()) == Some("duplicate") {
                    self.record_sample("duplicate_recall", 1.0, event.recorded_at)?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

#[async_trait]
impl OutboxSubscriber for MetricsService {
    fn name(&self) -> &'static str {
        "metrics"
    }

    async fn handle(&self, events: &[OutboxEvent]) -> Result<()> {
        for event in events {
            {
                let mut last = self.last_seq.lock().unwrap();
                if event.seq <= *last {
                    continue;
                }
                *last = event.seq;
            }
            self.ingest_event(event)?;
        }
        Ok(())
    }
}

// ---- scheduled task bindings ----

use crate::modules::jobs::services::ScheduledTask;

pub struct HourlySliTask(pub Arc<MetricsService>);

#[async_trait]
impl ScheduledTask for HourlySliTask {
    fn name(&self) -> &'static str {
        "sli_hourly"
    }

    async fn run(&self) -> Result<()> {
        let written = self.0.compute_hourly()?;
        info!(measurements = written, "Hourly SLI computation complete");
        self.0.evaluate_burn()
    }
}

pub struct DailySliTask(pub Arc<MetricsService>);

#[async_trait]
impl ScheduledTask for DailySliTask {
    fn name(&self) -> &'static str {
        "sli_daily"
    }

    async fn run(&self) -> Result<()> {
        let written = self.0.compute_daily()?;
        info!(measurements = written, "Daily SLI computation complete");
        Ok(())
    }
}
