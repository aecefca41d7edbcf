// Exponential backoff with full jitter, parameterized per job type.

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(
        initial_delay: Duration,
        multiplier: f64,
        max_delay: Duration,
        max_attempts: u32,
    ) -> Self {
        Self {
            initial_delay,
            multiplier,
            max_delay,
            max_attempts,
        }
    }

    /// Spec defaults: 60 s initial, ×2, 10 min cap, 3 attempts
    pub fn standard() -> Self {
        Self::new(Duration::from_secs(60), 2.0, Duration::from_secs(600), 3)
    }

    /// Upper bound of the backoff window for the given completed attempt
    /// count (attempt 1 = first failure).
    pub fn backoff_ceiling(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(24);
        let raw = self.initial_delay.as_secs_f64() * self.multiplier.powi(exp as i32);
        let capped = raw.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Full-jitter delay: uniform in (0, ceiling]
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let ceiling = self.backoff_ceiling(attempt);
        if ceiling.is_zero() {
            return ceiling;
        }
        let jittered = rand::thread_rng().gen_range(0.0..=ceiling.as_secs_f64());
        // never schedule at zero; a minimum keeps hot loops off the queue
        Duration::from_secs_f64(jittered.max(1.0))
    }

    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}
