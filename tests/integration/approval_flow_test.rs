// High-value invoices pass through a policy gate into an approval chain:
// amount > 10000 requires a level-2 approval before the workflow proceeds.

#[path = "../helpers/mod.rs"]
mod helpers;

use apflow::invoices::models::InvoiceState;
use apflow::modules::approvals::models::{
    CmpOp, Condition, Decision, GateAction, PolicyGate, RequestState, StepStatus,
};
use helpers::{invoice_with_total, TestHarness};
use rust_decimal_macros::dec;

fn high_value_gate() -> PolicyGate {
    PolicyGate::new(
        "high_value_requires_approval",
        10,
        Condition::Amount {
            op: CmpOp::Gt,
            value: dec!(10000),
        },
        GateAction::RequireApproval,
        vec![2],
        chrono::Utc::now(),
    )
}

#[tokio::test]
async fn test_high_value_invoice_waits_for_approval() {
    let harness = TestHarness::new();
    harness.add_gate(high_value_gate());

    let invoice = harness
        .submit_and_pump(&invoice_with_total("Initech Supplies", "INV-4001", "15000.00"))
        .await;

    assert_eq!(invoice.state, InvoiceState::Ready);
    let request = harness
        .engine
        .store
        .read(|t| t.pending_approval_for_subject(invoice.id))
        .expect("approval request created");
    assert_eq!(request.state, RequestState::Pending);
    assert_eq!(request.steps.len(), 1);
    assert_eq!(request.steps[0].required_role_level, 2);
    assert_eq!(request.steps[0].status, StepStatus::Pending);
}

#[tokio::test]
async fn test_approval_advances_to_staged_and_done() {
    let harness = TestHarness::new();
    harness.add_gate(high_value_gate());

    let invoice = harness
        .submit_and_pump(&invoice_with_total("Initech Supplies", "INV-4002", "15000.00"))
        .await;
    let request = harness
        .engine
        .store
        .read(|t| t.pending_approval_for_subject(invoice.id))
        .unwrap();

    let updated = harness
        .engine
        .approvals
        .decide(
            request.id,
            0,
            &TestHarness::manager(),
            Decision::Approve,
            Some("amount verified against contract".into()),
        )
        .await
        .unwrap();
    assert_eq!(updated.state, RequestState::Approved);

    harness.pump().await;
    let transitions = harness.transitions(invoice.id);
    assert!(transitions.contains(&("ready".to_string(), "approved".to_string())));
    assert!(transitions.contains(&("approved".to_string(), "staged".to_string())));
    assert_eq!(harness.state(invoice.id), InvoiceState::Done);
}

#[tokio::test]
async fn test_rejection_sinks_the_invoice() {
    let harness = TestHarness::new();
    harness.add_gate(high_value_gate());

    let invoice = harness
        .submit_and_pump(&invoice_with_total("Globex Corp", "INV-4003", "20000.00"))
        .await;
    let request = harness
        .engine
        .store
        .read(|t| t.pending_approval_for_subject(invoice.id))
        .unwrap();

    harness
        .engine
        .approvals
        .decide(
            request.id,
            0,
            &TestHarness::manager(),
            Decision::Reject,
            Some("no matching contract".into()),
        )
        .await
        .unwrap();
    harness.pump().await;

    assert_eq!(harness.state(invoice.id), InvoiceState::Rejected);
    assert!(harness.connector.posted().is_empty());
}

#[tokio::test]
async fn test_clerk_cannot_act_on_level_two_step() {
    let harness = TestHarness::new();
    harness.add_gate(high_value_gate());

    let invoice = harness
        .submit_and_pump(&invoice_with_total("Umbrella Ltd", "INV-4004", "30000.00"))
        .await;
    let request = harness
        .engine
        .store
        .read(|t| t.pending_approval_for_subject(invoice.id))
        .unwrap();

    let err = harness
        .engine
        .approvals
        .decide(
            request.id,
            0,
            &TestHarness::clerk(),
            Decision::Approve,
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "permission_denied");
}

#[tokio::test]
async fn test_delegated_step_acts_through_delegate() {
    let harness = TestHarness::new();
    harness.add_gate(high_value_gate());

    let invoice = harness
        .submit_and_pump(&invoice_with_total("Stark Industries", "INV-4005", "50000.00"))
        .await;
    let request = harness
        .engine
        .store
        .read(|t| t.pending_approval_for_subject(invoice.id))
        .unwrap();

    let manager = TestHarness::manager();
    let deputy = apflow::core::Principal::new("manager-2", apflow::core::Role::ApManager, "acme");
    harness
        .engine
        .approvals
        .delegate(request.id, 0, &manager, &deputy)
        .await
        .unwrap();

    // the original approver no longer holds the step
    let err = harness
        .engine
        .approvals
        .decide(request.id, 0, &manager, Decision::Approve, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "permission_denied");

    let updated = harness
        .engine
        .approvals
        .decide(request.id, 0, &deputy, Decision::Approve, None)
        .await
        .unwrap();
    assert_eq!(updated.state, RequestState::Approved);
    assert_eq!(updated.steps[0].delegated_to.as_deref(), Some("manager-2"));

    harness.pump().await;
    assert_eq!(harness.state(invoice.id), InvoiceState::Done);
}

#[tokio::test]
async fn test_repeat_identical_decision_is_a_noop() {
    let harness = TestHarness::new();
    harness.add_gate(high_value_gate());

    let invoice = harness
        .submit_and_pump(&invoice_with_total("Initech Supplies", "INV-4006", "12000.00"))
        .await;
    let request = harness
        .engine
        .store
        .read(|t| t.pending_approval_for_subject(invoice.id))
        .unwrap();

    let manager = TestHarness::manager();
    let first = harness
        .engine
        .approvals
        .decide(request.id, 0, &manager, Decision::Approve, None)
        .await
        .unwrap();
    let second = harness
        .engine
        .approvals
        .decide(request.id, 0, &manager, Decision::Approve, None)
        .await
        .unwrap();
    assert_eq!(first.state, second.state);

    // a conflicting decision is refused
    let err = harness
        .engine
        .approvals
        .decide(request.id, 0, &manager, Decision::Reject, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "conflict");
}
