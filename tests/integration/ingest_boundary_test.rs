// Upload and batch boundaries: 50 MB and 50 items pass; one byte or one
// item more fails with the precise error code.

#[path = "../helpers/mod.rs"]
mod helpers;

use apflow::core::AppError;
use apflow::invoices::models::InvoiceSource;
use apflow::invoices::services::{
    BatchItemStatus, DocumentSubmission, MAX_BATCH_ITEMS, MAX_DOCUMENT_BYTES,
};
use helpers::{doc_bytes, invoice_with_total, TestHarness};

#[tokio::test]
async fn test_fifty_megabyte_document_accepted() {
    let harness = TestHarness::new();
    let bytes = vec![b'x'; MAX_DOCUMENT_BYTES];
    let outcome = harness
        .engine
        .ingest
        .submit_document(
            bytes,
            "scan.pdf",
            &TestHarness::clerk(),
            InvoiceSource::Upload,
            None,
        )
        .await
        .unwrap();
    assert!(!outcome.duplicate);
}

#[tokio::test]
async fn test_oversize_document_rejected() {
    let harness = TestHarness::new();
    let bytes = vec![b'x'; MAX_DOCUMENT_BYTES + 1];
    let err = harness
        .engine
        .ingest
        .submit_document(
            bytes,
            "scan.pdf",
            &TestHarness::clerk(),
            InvoiceSource::Upload,
            None,
        )
        .await
        .unwrap_err();
    match err {
        AppError::Invalid { code, .. } => assert_eq!(code, "too_large"),
        other => panic!("expected invalid, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unsupported_type_rejected() {
    let harness = TestHarness::new();
    let err = harness
        .engine
        .ingest
        .submit_document(
            b"MZ\x90\x00".to_vec(),
            "invoice.exe",
            &TestHarness::clerk(),
            InvoiceSource::Upload,
            None,
        )
        .await
        .unwrap_err();
    match err {
        AppError::Invalid { code, .. } => assert_eq!(code, "invalid_type"),
        other => panic!("expected invalid, got {other:?}"),
    }
}

#[tokio::test]
async fn test_batch_of_fifty_succeeds() {
    let harness = TestHarness::new();
    let items: Vec<DocumentSubmission> = (0..MAX_BATCH_ITEMS)
        .map(|i| DocumentSubmission {
            bytes: doc_bytes(&invoice_with_total(
                &format!("Vendor {i}"),
                &format!("INV-B{i:03}"),
                "100.00",
            )),
            filename: format!("invoice-{i}.json"),
        })
        .collect();

    let statuses = harness
        .engine
        .ingest
        .submit_batch(items, &TestHarness::clerk(), None)
        .await
        .unwrap();
    assert_eq!(statuses.len(), MAX_BATCH_ITEMS);
    assert!(statuses
        .iter()
        .all(|s| matches!(s, BatchItemStatus::Ok { .. })));
}

#[tokio::test]
async fn test_batch_of_fifty_one_rejected() {
    let harness = TestHarness::new();
    let items: Vec<DocumentSubmission> = (0..=MAX_BATCH_ITEMS)
        .map(|i| DocumentSubmission {
            bytes: format!("{{\"invoice_number\": \"B{i}\"}}").into_bytes(),
            filename: format!("invoice-{i}.json"),
        })
        .collect();

    let err = harness
        .engine
        .ingest
        .submit_batch(items, &TestHarness::clerk(), None)
        .await
        .unwrap_err();
    match err {
        AppError::Invalid { code, .. } => assert_eq!(code, "batch_too_large"),
        other => panic!("expected invalid, got {other:?}"),
    }
}

#[tokio::test]
async fn test_batch_reports_per_item_status() {
    let harness = TestHarness::new();
    let good = invoice_with_total("Initech Supplies", "INV-B900", "100.00");
    let items = vec![
        DocumentSubmission {
            bytes: doc_bytes(&good),
            filename: "a.json".into(),
        },
        // same bytes again: duplicate
        DocumentSubmission {
            bytes: doc_bytes(&good),
            filename: "b.json".into(),
        },
        DocumentSubmission {
            bytes: b"binary".to_vec(),
            filename: "c.exe".into(),
        },
        DocumentSubmission {
            bytes: vec![b'x'; MAX_DOCUMENT_BYTES + 1],
            filename: "d.pdf".into(),
        },
    ];

    let statuses = harness
        .engine
        .ingest
        .submit_batch(items, &TestHarness::clerk(), None)
        .await
        .unwrap();
    assert!(matches!(statuses[0], BatchItemStatus::Ok { .. }));
    assert!(matches!(statuses[1], BatchItemStatus::Duplicate { .. }));
    assert!(matches!(statuses[2], BatchItemStatus::InvalidType));
    assert!(matches!(statuses[3], BatchItemStatus::TooLarge));
}
