// Retry policy properties: exponential ceiling growth, jitter bounds,
// exhaustion at max attempts.

use std::time::Duration;

use apflow::jobs::services::RetryPolicy;
use proptest::prelude::*;

#[test]
fn test_spec_defaults() {
    let policy = RetryPolicy::standard();
    assert_eq!(policy.initial_delay, Duration::from_secs(60));
    assert_eq!(policy.multiplier, 2.0);
    assert_eq!(policy.max_delay, Duration::from_secs(600));
    assert_eq!(policy.max_attempts, 3);
}

#[test]
fn test_ceiling_doubles_then_caps() {
    let policy = RetryPolicy::standard();
    let ceilings: Vec<u64> = (1..=6)
        .map(|attempt| policy.backoff_ceiling(attempt).as_secs())
        .collect();
    assert_eq!(ceilings, vec![60, 120, 240, 480, 600, 600]);
}

proptest! {
    #[test]
    fn test_jitter_never_exceeds_ceiling(attempt in 1u32..30) {
        let policy = RetryPolicy::standard();
        for _ in 0..16 {
            let delay = policy.next_delay(attempt);
            prop_assert!(delay <= policy.backoff_ceiling(attempt));
            prop_assert!(delay >= Duration::from_secs(1));
        }
    }

    #[test]
    fn test_ceiling_is_monotone(a in 1u32..30, b in 1u32..30) {
        let policy = RetryPolicy::standard();
        if a <= b {
            prop_assert!(policy.backoff_ceiling(a) <= policy.backoff_ceiling(b));
        }
    }

    #[test]
    fn test_exhaustion_is_a_step_function(attempts in 0u32..10) {
        let policy = RetryPolicy::standard();
        prop_assert_eq!(policy.is_exhausted(attempts), attempts >= policy.max_attempts);
    }
}
