// Destination connector seam plus the circuit breaker that wraps every
// external call: closed → open after N consecutive failures, half-open
// probe after the cool-down.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{info, warn};

use crate::core::{AppError, Clock, Result};

#[async_trait]
pub trait DestinationConnector: Send + Sync {
    fn name(&self) -> &str;

    /// Post the payload; returns the destination's external reference
    async fn post(&self, payload: &Value) -> Result<String>;

    /// Reverse a previously posted payload
    async fn reverse(&self, external_ref: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<DateTime<Utc>>,
}

pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    clock: Arc<dyn Clock>,
    failure_threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    /// Spec defaults: trip after 5 consecutive failures, cool down 5 min
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_settings(clock, 5, Duration::from_secs(300))
    }

    pub fn with_settings(clock: Arc<dyn Clock>, failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
            clock,
            failure_threshold,
            cooldown,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().unwrap().state
    }

    /// Admission check; moves open → half-open once the cool-down elapsed
    fn admit(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => Ok(()),
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| self.clock.now() - at)
                    .unwrap_or_else(chrono::Duration::zero);
                if elapsed
                    >= chrono::Duration::from_std(self.cooldown)
                        .unwrap_or_else(|_| chrono::Duration::seconds(300))
                {
                    inner.state = BreakerState::HalfOpen;
                    info!("Circuit breaker half-open; admitting probe call");
                    Ok(())
                } else {
                    Err(AppError::unavailable(
                        "destination circuit open; failing fast",
                    ))
                }
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != BreakerState::Closed {
            info!("Circuit breaker closed after successful call");
        }
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.consecutive_failures += 1;
        let trip = match inner.state {
            BreakerState::HalfOpen => true,
            _ => inner.consecutive_failures >= self.failure_threshold,
        };
        if trip {
            inner.state = BreakerState::Open;
            inner.opened_at = Some(self.clock.now());
            warn!(
                consecutive_failures = inner.consecutive_failures,
                "Circuit breaker opened"
            );
        }
    }

    /// Run an external call under breaker admission
    pub async fn call<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.admit()?;
        match f().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(e)
            }
        }
    }
}


/// In-memory connector used by the bundled runtime and tests: records every
/// posted payload, issues deterministic-looking references, and can be
/// toggled to fail for resilience scenarios.
pub struct RecordingConnector {
    name: String,
    posted: Mutex<Vec<(String, Value)>>,
    reversed: Mutex<Vec<String>>,
    fail_posts: std::sync::atomic::AtomicU32,
}

impl RecordingConnector {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            posted: Mutex::new(Vec::new()),
            reversed: Mutex::new(Vec::new()),
            fail_posts: std::sync::atomic::AtomicU32::new(0),
        }
    }

    /// Make the next `count` post calls fail with `Unavailable`
    pub fn fail_next_posts(&self, count: u32) {
        self.fail_posts
            .store(count, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn posted(&self) -> Vec<(String, Value)> {
        self.posted.lock().unwrap().clone()
    }

    pub fn reversed(&self) -> Vec<String> {
        self.reversed.lock().unwrap().clone()
    }
}

#[async_trait]
impl DestinationConnector for RecordingConnector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn post(&self, payload: &Value) -> Result<String> {
        let remaining = self.fail_posts.load(std::sync::atomic::Ordering::SeqCst);
        if remaining > 0 {
            self.fail_posts
                .store(remaining - 1, std::sync::atomic::Ordering::SeqCst);
            return Err(AppError::unavailable("destination rejected the post"));
        }
        let mut posted = self.posted.lock().unwrap();
        let external_ref = format!("{}-{:06}", self.name, posted.len() + 1);
        posted.push((external_ref.clone(), payload.clone()));
        Ok(external_ref)
    }

    async fn reverse(&self, external_ref: &str) -> Result<()> {
        let known = self
            .posted
            .lock()
            .unwrap()
            .iter()
            .any(|(r, _)| r == external_ref);
        if !known {
            return Err(AppError::not_found(format!(
                "external ref {external_ref} was never posted here"
            )));
        }
        self.reversed.lock().unwrap().push(external_ref.to_string());
        Ok(())
    }
}
