// Math failure: total 221.00 against subtotal 200.00 + tax 20.00 opens a
// TOTAL_MISMATCH exception; a manual adjustment repairs the invoice and the
// workflow advances through ready.

#[path = "../helpers/mod.rs"]
mod helpers;

use std::collections::BTreeMap;

use apflow::invoices::models::InvoiceState;
use apflow::modules::exceptions::models::{ExceptionCategory, ExceptionStatus, ResolutionAction};
use apflow::modules::exceptions::services::ResolutionParams;
use apflow::modules::validation::models::{ReasonCode, Severity};
use helpers::{total_mismatch_invoice, TestHarness};

#[tokio::test]
async fn test_total_mismatch_opens_math_exception() {
    let harness = TestHarness::new();
    let invoice = harness
        .submit_and_pump(&total_mismatch_invoice("Initech Supplies", "INV-3001"))
        .await;

    assert_eq!(invoice.state, InvoiceState::Exception);
    let exceptions = harness.engine.exceptions.exceptions_for(invoice.id);
    assert_eq!(exceptions.len(), 1);
    let exception = &exceptions[0];
    assert_eq!(exception.category, ExceptionCategory::Math);
    assert_eq!(exception.reason_code, ReasonCode::TotalMismatch);
    assert_eq!(exception.severity, Severity::Error);
    assert_eq!(exception.status, ExceptionStatus::Open);
    assert!(exception
        .suggested_actions
        .contains(&ResolutionAction::ManualAdjust));
}

#[tokio::test]
async fn test_manual_adjust_advances_to_ready_and_beyond() {
    let harness = TestHarness::new();
    let invoice = harness
        .submit_and_pump(&total_mismatch_invoice("Initech Supplies", "INV-3002"))
        .await;
    let exception = harness.engine.exceptions.exceptions_for(invoice.id)[0].clone();

    let mut adjusted = BTreeMap::new();
    adjusted.insert("total_amount".to_string(), "220.00".to_string());
    let resolved = harness
        .engine
        .exceptions
        .resolve(
            exception.id,
            &TestHarness::clerk(),
            ResolutionAction::ManualAdjust,
            ResolutionParams {
                adjusted_fields: adjusted,
                notes: Some("corrected grand total".into()),
            },
        )
        .await
        .unwrap();
    assert_eq!(resolved.status, ExceptionStatus::Resolved);
    assert_eq!(resolved.resolved_by.as_deref(), Some("clerk-1"));

    harness.pump().await;

    let transitions = harness.transitions(invoice.id);
    assert!(
        transitions.contains(&("exception".to_string(), "ready".to_string())),
        "transitions: {transitions:?}"
    );
    assert_eq!(harness.state(invoice.id), InvoiceState::Done);
}

#[tokio::test]
async fn test_double_resolution_conflicts() {
    let harness = TestHarness::new();
    let invoice = harness
        .submit_and_pump(&total_mismatch_invoice("Initech Supplies", "INV-3003"))
        .await;
    let exception = harness.engine.exceptions.exceptions_for(invoice.id)[0].clone();

    harness
        .engine
        .exceptions
        .resolve(
            exception.id,
            &TestHarness::clerk(),
            ResolutionAction::AcceptAsIs,
            ResolutionParams::default(),
        )
        .await
        .unwrap();

    let err = harness
        .engine
        .exceptions
        .resolve(
            exception.id,
            &TestHarness::clerk(),
            ResolutionAction::AcceptAsIs,
            ResolutionParams::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "conflict");
}

#[tokio::test]
async fn test_unsuggested_action_requires_override() {
    let harness = TestHarness::new();
    let invoice = harness
        .submit_and_pump(&total_mismatch_invoice("Initech Supplies", "INV-3004"))
        .await;
    let exception = harness.engine.exceptions.exceptions_for(invoice.id)[0].clone();

    let err = harness
        .engine
        .exceptions
        .resolve(
            exception.id,
            &TestHarness::clerk(),
            ResolutionAction::MarkDuplicate,
            ResolutionParams::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "validation");

    harness
        .engine
        .exceptions
        .resolve(
            exception.id,
            &TestHarness::clerk(),
            ResolutionAction::Override,
            ResolutionParams {
                adjusted_fields: BTreeMap::new(),
                notes: Some("accepted out of band".into()),
            },
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_recalculate_repairs_totals_from_lines() {
    let harness = TestHarness::new();
    let invoice = harness
        .submit_and_pump(&total_mismatch_invoice("Initech Supplies", "INV-3005"))
        .await;
    let exception = harness.engine.exceptions.exceptions_for(invoice.id)[0].clone();

    harness
        .engine
        .exceptions
        .resolve(
            exception.id,
            &TestHarness::clerk(),
            ResolutionAction::Recalculate,
            ResolutionParams::default(),
        )
        .await
        .unwrap();
    harness.pump().await;

    let extraction = harness
        .engine
        .store
        .read(|t| t.extraction_for(invoice.id))
        .unwrap();
    assert_eq!(extraction.header_value("total_amount"), Some("220.00"));
    assert_eq!(harness.state(invoice.id), InvoiceState::Done);
}
