// Idempotency manager: replay of completed results, in-flight duplicates,
// failure/retry accounting, and TTL sweeping.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use apflow::core::{AppError, ManualClock};
use apflow::modules::idempotency::models::{fingerprint, IdempotencyRecord, IdempotencyState};
use apflow::modules::idempotency::services::IdempotencyManager;
use apflow::store::MemoryStore;
use serde_json::json;

struct Fixture {
    clock: Arc<ManualClock>,
    store: Arc<MemoryStore>,
    manager: IdempotencyManager,
}

fn fixture() -> Fixture {
    let clock = Arc::new(ManualClock::new());
    let store = MemoryStore::new(clock.clone());
    let manager = IdempotencyManager::new(store.clone(), 3);
    Fixture {
        clock,
        store,
        manager,
    }
}

const TTL: Duration = Duration::from_secs(86_400);

#[tokio::test]
async fn test_completed_operation_replays_identical_result() {
    let f = fixture();
    let calls = AtomicUsize::new(0);

    let body = || async {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!({ "invoice_id": "abc", "total": "220.00" }))
    };
    let first = f
        .manager
        .execute("upload:1", "invoice.upload", "clerk-1", TTL, body)
        .await
        .unwrap();

    let second = f
        .manager
        .execute("upload:1", "invoice.upload", "clerk-1", TTL, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({ "different": true }))
        })
        .await
        .unwrap();

    // bitwise-identical stored result, body ran exactly once
    assert_eq!(first, second);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_in_flight_duplicate_is_rejected() {
    let f = fixture();
    // simulate a concurrently claimed key
    f.store
        .transaction(|tx| {
            tx.insert_idempotency(IdempotencyRecord::begin(
                "race:1",
                "invoice.upload",
                "clerk-2",
                3,
                chrono::Duration::hours(24),
                tx.now,
            ))
        })
        .unwrap();

    let err = f
        .manager
        .execute("race:1", "invoice.upload", "clerk-1", TTL, || async {
            Ok(json!({}))
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "duplicate");
}

#[tokio::test]
async fn test_failed_operation_retries_until_budget_exhausted() {
    let f = fixture();
    let calls = AtomicUsize::new(0);

    for _ in 0..3 {
        let err = f
            .manager
            .execute("flaky:1", "export.post", "system", TTL, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<serde_json::Value, _>(AppError::unavailable("connector down"))
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "unavailable");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    // budget spent: the fourth run is refused without invoking the body
    let err = f
        .manager
        .execute("flaky:1", "export.post", "system", TTL, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({}))
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "invalid");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_failure_then_success_records_result() {
    let f = fixture();
    let calls = AtomicUsize::new(0);

    let _ = f
        .manager
        .execute("heal:1", "export.post", "system", TTL, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<serde_json::Value, _>(AppError::unavailable("down"))
        })
        .await;
    let result = f
        .manager
        .execute("heal:1", "export.post", "system", TTL, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({ "external_ref": "ledger-000001" }))
        })
        .await
        .unwrap();
    assert_eq!(result["external_ref"], "ledger-000001");

    let record = f.store.read(|t| t.idempotency("heal:1")).unwrap();
    assert_eq!(record.state, IdempotencyState::Completed);
    assert_eq!(record.attempts, 2);
}

#[tokio::test]
async fn test_sweep_removes_expired_records_only() {
    let f = fixture();
    f.manager
        .execute("old:1", "invoice.upload", "clerk-1", Duration::from_secs(60), || async {
            Ok(json!({}))
        })
        .await
        .unwrap();
    f.manager
        .execute("fresh:1", "invoice.upload", "clerk-1", TTL, || async { Ok(json!({})) })
        .await
        .unwrap();

    f.clock.advance(Duration::from_secs(120));
    let removed = f.manager.sweep().unwrap();
    assert_eq!(removed, 1);
    assert!(f.store.read(|t| t.idempotency("old:1")).is_none());
    assert!(f.store.read(|t| t.idempotency("fresh:1")).is_some());
}

#[test]
fn test_fingerprint_recipes_are_stable_and_distinct() {
    let stage = fingerprint(&["inv-1", "quickbooks", "json", "stage"]);
    let stage_again = fingerprint(&["inv-1", "quickbooks", "json", "stage"]);
    let post = fingerprint(&["export-9", "post"]);
    assert_eq!(stage, stage_again);
    assert_ne!(stage, post);
}
