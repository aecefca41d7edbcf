// Job fabric behavior end to end: retry with backoff, dead-lettering after
// exhaustion, DLQ replay, lease expiry, and queue backpressure.

#[path = "../helpers/mod.rs"]
mod helpers;

use std::time::Duration;

use apflow::invoices::models::InvoiceState;
use apflow::jobs::models::{JobState, QueueName};
use apflow::modules::exports::models::ExportStatus;
use helpers::{clean_invoice, TestHarness};
use serde_json::json;

/// Drain with manual-clock advances so backoff windows elapse
async fn pump_through_retries(harness: &TestHarness, rounds: usize) {
    for _ in 0..rounds {
        harness.pump().await;
        harness.clock.advance(Duration::from_secs(11 * 60));
    }
    harness.pump().await;
}

#[tokio::test]
async fn test_exhausted_post_job_lands_in_dlq_not_queued() {
    let harness = TestHarness::new();
    harness.connector.fail_next_posts(10);

    let invoice = harness
        .submit_and_pump(&clean_invoice("Initech Supplies", "INV-7001"))
        .await;
    assert_eq!(invoice.state, InvoiceState::Staged);

    // three attempts (max) across the backoff windows
    pump_through_retries(&harness, 3).await;

    let dead = harness.engine.queue.dead_jobs(QueueName::Export);
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].op_type, "export.post");
    assert_eq!(dead[0].state, JobState::Dead);
    assert!(dead[0].last_error.is_some());

    let queued = harness
        .engine
        .store
        .read(|t| t.jobs_in_state(QueueName::Export, JobState::Queued));
    assert!(queued.is_empty());

    let export = harness
        .engine
        .store
        .read(|t| t.staged_exports_for_invoice(invoice.id))
        .pop()
        .unwrap();
    assert_eq!(export.status, ExportStatus::Failed);
}

#[tokio::test]
async fn test_dlq_replay_recovers_after_destination_heals() {
    let harness = TestHarness::new();
    harness.connector.fail_next_posts(3);

    let invoice = harness
        .submit_and_pump(&clean_invoice("Globex Corp", "INV-7002"))
        .await;
    pump_through_retries(&harness, 3).await;
    assert_eq!(harness.engine.queue.dead_jobs(QueueName::Export).len(), 1);

    // destination healed; replay the dead job
    let replayed = harness.engine.queue.replay_dlq(QueueName::Export, 10).unwrap();
    assert_eq!(replayed, 1);

    // failed is terminal for that export; replaying the job is a no-op on
    // it, so the invoice stays put rather than double-posting
    harness.pump().await;
    let export = harness
        .engine
        .store
        .read(|t| t.staged_exports_for_invoice(invoice.id))
        .pop()
        .unwrap();
    assert_eq!(export.status, ExportStatus::Failed);
    assert!(harness.connector.posted().is_empty());
}

#[tokio::test]
async fn test_transient_failure_retries_to_success() {
    let harness = TestHarness::new();
    harness.connector.fail_next_posts(1);

    let invoice = harness
        .submit_and_pump(&clean_invoice("Umbrella Ltd", "INV-7003"))
        .await;
    pump_through_retries(&harness, 2).await;

    assert_eq!(harness.state(invoice.id), InvoiceState::Done);
    assert_eq!(harness.connector.posted().len(), 1);
    assert!(harness.engine.queue.dead_jobs(QueueName::Export).is_empty());
}

#[tokio::test]
async fn test_lease_is_exclusive_until_it_expires() {
    let harness = TestHarness::new();
    let queue = &harness.engine.queue;
    queue
        .enqueue("invoice.process", json!({ "invoice_id": "not-a-real-one" }))
        .unwrap();

    let first = queue
        .lease(QueueName::Processing, Duration::from_secs(120))
        .unwrap()
        .expect("job leased");
    assert_eq!(first.attempts, 1);

    // at most one live lease
    let second = queue
        .lease(QueueName::Processing, Duration::from_secs(120))
        .unwrap();
    assert!(second.is_none());

    // lease lapses; the job returns to queued and leases again
    harness.clock.advance(Duration::from_secs(121));
    let third = queue
        .lease(QueueName::Processing, Duration::from_secs(120))
        .unwrap()
        .expect("job re-leased after expiry");
    assert_eq!(third.id, first.id);
    assert_eq!(third.attempts, 2);
}

#[tokio::test]
async fn test_ack_requires_the_live_lease_token() {
    let harness = TestHarness::new();
    let queue = &harness.engine.queue;
    queue
        .enqueue("invoice.process", json!({ "invoice_id": "x" }))
        .unwrap();
    let job = queue
        .lease(QueueName::Processing, Duration::from_secs(60))
        .unwrap()
        .unwrap();

    let err = queue.ack(job.id, uuid::Uuid::new_v4()).unwrap_err();
    assert_eq!(err.kind(), "conflict");
    queue.ack(job.id, job.lease_token.unwrap()).unwrap();
}

#[tokio::test]
async fn test_full_queue_rejects_producers() {
    use apflow::core::ManualClock;
    use apflow::jobs::services::{JobQueue, RetryPolicy};
    use apflow::store::MemoryStore;
    use std::sync::Arc;

    let clock = Arc::new(ManualClock::new());
    let store = MemoryStore::new(clock);
    let queue = JobQueue::new(store, RetryPolicy::standard()).with_max_depth(2);

    queue.enqueue("invoice.process", json!({"invoice_id": "a"})).unwrap();
    queue.enqueue("invoice.process", json!({"invoice_id": "b"})).unwrap();
    let err = queue
        .enqueue("invoice.process", json!({"invoice_id": "c"}))
        .unwrap_err();
    assert_eq!(err.kind(), "unavailable");
    assert_eq!(queue.depth(QueueName::Processing), 2);
}
