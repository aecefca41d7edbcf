use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use rust_decimal::Decimal;

/// Frozen application configuration.
///
/// Built once at startup from the environment and passed by reference
/// everywhere; nothing re-reads the environment after construction.
#[derive(Debug, Clone)]
pub struct Config {
    pub worker_concurrency: usize,
    pub worker_prefetch: usize,
    pub job_soft_timeout: Duration,
    pub job_hard_timeout: Duration,
    pub retry_max_attempts: u32,
    pub retry_initial_delay: Duration,
    pub retry_multiplier: f64,
    pub retry_max_delay: Duration,
    pub idempotency_ttl: Duration,
    pub idempotency_max_executions: u32,
    pub validation_tolerance: Decimal,
    pub auto_approve_confidence: f64,
    pub staging_quality_threshold: u8,
    pub staging_approval_timeout: Duration,
    pub staging_rollback_window: Duration,
    pub alert_delivery_sla: Duration,
}

impl Config {
    /// Load configuration from environment variables, applying defaults.
    ///
    /// A present-but-malformed value is a startup error, never a silent
    /// fallback.
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        Ok(Self {
            worker_concurrency: parse_var("WORKER_CONCURRENCY", 4usize)?,
            worker_prefetch: parse_var("WORKER_PREFETCH", 1usize)?,
            job_soft_timeout: Duration::from_secs(parse_var("JOB_SOFT_TIMEOUT_S", 300u64)?),
            job_hard_timeout: Duration::from_secs(parse_var("JOB_HARD_TIMEOUT_S", 600u64)?),
            retry_max_attempts: parse_var("RETRY_MAX_ATTEMPTS", 3u32)?,
            retry_initial_delay: Duration::from_secs(parse_var("RETRY_INITIAL_DELAY_S", 60u64)?),
            retry_multiplier: parse_var("RETRY_MULTIPLIER", 2.0f64)?,
            retry_max_delay: Duration::from_secs(parse_var("RETRY_MAX_DELAY_S", 600u64)?),
            idempotency_ttl: Duration::from_secs(parse_var("IDEMPOTENCY_TTL_S", 86_400u64)?),
            idempotency_max_executions: parse_var("IDEMPOTENCY_MAX_EXECUTIONS", 3u32)?,
            validation_tolerance: parse_var("VALIDATION_TOLERANCE", Decimal::new(1, 2))?,
            auto_approve_confidence: parse_var("AUTO_APPROVE_CONFIDENCE", 0.85f64)?,
            staging_quality_threshold: parse_var("STAGING_QUALITY_THRESHOLD", 70u8)?,
            staging_approval_timeout: Duration::from_secs(
                parse_var("STAGING_APPROVAL_TIMEOUT_H", 72u64)? * 3600,
            ),
            staging_rollback_window: Duration::from_secs(
                parse_var("STAGING_ROLLBACK_WINDOW_H", 24u64)? * 3600,
            ),
            alert_delivery_sla: Duration::from_secs(parse_var("ALERT_DELIVERY_SLA_S", 30u64)?),
        })
    }
}

impl Default for Config {
    /// Spec defaults, independent of the environment (used by tests)
    fn default() -> Self {
        Self {
            worker_concurrency: 4,
            worker_prefetch: 1,
            job_soft_timeout: Duration::from_secs(300),
            job_hard_timeout: Duration::from_secs(600),
            retry_max_attempts: 3,
            retry_initial_delay: Duration::from_secs(60),
            retry_multiplier: 2.0,
            retry_max_delay: Duration::from_secs(600),
            idempotency_ttl: Duration::from_secs(86_400),
            idempotency_max_executions: 3,
            validation_tolerance: Decimal::new(1, 2),
            auto_approve_confidence: 0.85,
            staging_quality_threshold: 70,
            staging_approval_timeout: Duration::from_secs(72 * 3600),
            staging_rollback_window: Duration::from_secs(24 * 3600),
            alert_delivery_sla: Duration::from_secs(30),
        }
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{name} is malformed: {e}"))
            .context(format!("parsing {name}")),
        Err(_) => Ok(default),
    }
}
