// Duplicate submissions: the same bytes from the same submitter scope
// collapse onto one invoice; the second response carries duplicate = true.

#[path = "../helpers/mod.rs"]
mod helpers;

use apflow::core::{Principal, Role};
use apflow::invoices::models::InvoiceSource;
use helpers::{clean_invoice, doc_bytes, TestHarness};

#[tokio::test]
async fn test_same_bytes_same_invoice() {
    let harness = TestHarness::new();
    let doc = clean_invoice("Initech Supplies", "INV-2001");

    let first = harness.submit(&doc).await;
    assert!(!first.duplicate);
    harness.pump().await;

    let second = harness.submit(&doc).await;
    assert_eq!(second.invoice_id, first.invoice_id);
    assert!(second.duplicate);

    let invoice_rows = harness.engine.store.read(|t| t.invoices().len());
    assert_eq!(invoice_rows, 1);
}

#[tokio::test]
async fn test_duplicate_detected_without_pump_between() {
    let harness = TestHarness::new();
    let doc = clean_invoice("Initech Supplies", "INV-2002");

    let first = harness.submit(&doc).await;
    let second = harness.submit(&doc).await;
    assert_eq!(first.invoice_id, second.invoice_id);
    assert!(second.duplicate);
}

#[tokio::test]
async fn test_different_scope_is_not_a_duplicate() {
    let harness = TestHarness::new();
    let doc = clean_invoice("Initech Supplies", "INV-2003");
    let bytes = doc_bytes(&doc);

    let acme = harness
        .engine
        .ingest
        .submit_document(
            bytes.clone(),
            "invoice.json",
            &Principal::new("clerk-1", Role::ApClerk, "acme"),
            InvoiceSource::Api,
            None,
        )
        .await
        .unwrap();
    let globex = harness
        .engine
        .ingest
        .submit_document(
            bytes,
            "invoice.json",
            &Principal::new("clerk-9", Role::ApClerk, "globex"),
            InvoiceSource::Api,
            None,
        )
        .await
        .unwrap();

    assert_ne!(acme.invoice_id, globex.invoice_id);
    assert!(!globex.duplicate);
}

#[tokio::test]
async fn test_explicit_idempotency_key_replays_result() {
    let harness = TestHarness::new();
    let doc = clean_invoice("Initech Supplies", "INV-2004");

    let first = harness
        .engine
        .ingest
        .submit_document(
            doc_bytes(&doc),
            "invoice.json",
            &TestHarness::clerk(),
            InvoiceSource::Upload,
            Some("client-request-77"),
        )
        .await
        .unwrap();
    harness.pump().await;

    // same key resubmitted: the fingerprint check reports the duplicate
    let second = harness
        .engine
        .ingest
        .submit_document(
            doc_bytes(&doc),
            "invoice.json",
            &TestHarness::clerk(),
            InvoiceSource::Upload,
            Some("client-request-77"),
        )
        .await
        .unwrap();
    assert_eq!(second.invoice_id, first.invoice_id);
}
