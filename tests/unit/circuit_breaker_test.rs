// Circuit breaker state machine at the spec defaults: trip after 5
// consecutive failures, 5 minute cool-down, half-open probe.

use std::sync::Arc;
use std::time::Duration;

use apflow::core::{AppError, ManualClock, Result};
use apflow::modules::exports::services::{BreakerState, CircuitBreaker};

async fn fail(cb: &CircuitBreaker) -> Result<()> {
    cb.call(|| async { Err::<(), _>(AppError::unavailable("connector down")) })
        .await
        .map(|_| ())
}

async fn succeed(cb: &CircuitBreaker) -> Result<()> {
    cb.call(|| async { Ok(()) }).await
}

#[tokio::test]
async fn test_five_consecutive_failures_open_the_circuit() {
    let clock = Arc::new(ManualClock::new());
    let cb = CircuitBreaker::new(clock.clone());

    for _ in 0..4 {
        let _ = fail(&cb).await;
        assert_eq!(cb.state(), BreakerState::Closed);
    }
    let _ = fail(&cb).await;
    assert_eq!(cb.state(), BreakerState::Open);
}

#[tokio::test]
async fn test_open_circuit_fails_fast() {
    let clock = Arc::new(ManualClock::new());
    let cb = CircuitBreaker::new(clock.clone());
    for _ in 0..5 {
        let _ = fail(&cb).await;
    }

    // the wrapped call must not run while open
    let mut ran = false;
    let result: Result<()> = cb
        .call(|| {
            ran = true;
            async { Ok(()) }
        })
        .await;
    assert!(result.is_err());
    assert!(!ran);
}

#[tokio::test]
async fn test_cooldown_then_probe_then_close() {
    let clock = Arc::new(ManualClock::new());
    let cb = CircuitBreaker::new(clock.clone());
    for _ in 0..5 {
        let _ = fail(&cb).await;
    }

    // still inside the 5 minute cool-down
    clock.advance(Duration::from_secs(200));
    assert!(succeed(&cb).await.is_err());

    clock.advance(Duration::from_secs(101));
    assert!(succeed(&cb).await.is_ok());
    assert_eq!(cb.state(), BreakerState::Closed);
}

#[tokio::test]
async fn test_probe_failure_reopens_immediately() {
    let clock = Arc::new(ManualClock::new());
    let cb = CircuitBreaker::new(clock.clone());
    for _ in 0..5 {
        let _ = fail(&cb).await;
    }
    clock.advance(Duration::from_secs(301));
    let _ = fail(&cb).await;
    assert_eq!(cb.state(), BreakerState::Open);
}
