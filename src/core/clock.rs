use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeZone, Utc};

/// Wall-clock + monotonic time source.
///
/// Every state machine takes the clock as a construction-time dependency so
/// that tests can drive time deterministically.
pub trait Clock: Send + Sync {
    /// Current UTC wall time
    fn now(&self) -> DateTime<Utc>;

    /// Monotonic duration since an arbitrary fixed origin
    fn monotonic(&self) -> Duration;
}

/// Production clock backed by the OS
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn monotonic(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Manually advanced clock for deterministic tests
pub struct ManualClock {
    start: DateTime<Utc>,
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Starts at a fixed, readable instant
    pub fn new() -> Self {
        Self::starting_at(Utc.with_ymd_and_hms(2025, 6, 2, 8, 0, 0).unwrap())
    }

    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            start,
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += chrono::Duration::from_std(by).expect("clock advance out of range");
    }

    pub fn set(&self, to: DateTime<Utc>) {
        let mut now = self.now.lock().unwrap();
        assert!(to >= *now, "manual clock cannot move backwards");
        *now = to;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    fn monotonic(&self) -> Duration {
        (self.now() - self.start)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}
