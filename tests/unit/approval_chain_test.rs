// Approval chain execution against the service: ordered steps, chain state
// laws, delegation constraints, and overdue escalation.

use std::sync::Arc;

use apflow::core::{ManualClock, Principal, Role};
use apflow::jobs::services::{JobQueue, RetryPolicy};
use apflow::modules::approvals::models::{
    ApprovalKind, Decision, RequestState, StepStatus,
};
use apflow::modules::approvals::services::ApprovalService;
use apflow::store::MemoryStore;
use uuid::Uuid;

struct Fixture {
    clock: Arc<ManualClock>,
    store: Arc<MemoryStore>,
    service: ApprovalService,
}

fn fixture() -> Fixture {
    let clock = Arc::new(ManualClock::new());
    let store = MemoryStore::new(clock.clone());
    let queue = Arc::new(JobQueue::new(store.clone(), RetryPolicy::standard()));
    let service = ApprovalService::new(store.clone(), queue);
    Fixture {
        clock,
        store,
        service,
    }
}

fn create_request(fixture: &Fixture, levels: &[u8]) -> Uuid {
    fixture
        .store
        .transaction(|tx| {
            let request = ApprovalService::create_in_tx(
                tx,
                Uuid::new_v4(),
                Uuid::new_v4(),
                ApprovalKind::Invoice,
                levels,
                1,
            )?;
            Ok(request.id)
        })
        .unwrap()
}

fn manager() -> Principal {
    Principal::new("manager-1", Role::ApManager, "acme")
}

fn controller() -> Principal {
    Principal::new("controller-1", Role::Controller, "acme")
}

#[tokio::test]
async fn test_steps_execute_strictly_in_order() {
    let f = fixture();
    let request_id = create_request(&f, &[2, 3]);

    // step 1 cannot act before step 0
    let err = f
        .service
        .decide(request_id, 1, &controller(), Decision::Approve, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "conflict");

    f.service
        .decide(request_id, 0, &manager(), Decision::Approve, None)
        .await
        .unwrap();
    let updated = f
        .service
        .decide(request_id, 1, &controller(), Decision::Approve, None)
        .await
        .unwrap();
    assert_eq!(updated.state, RequestState::Approved);
}

#[tokio::test]
async fn test_approved_iff_all_steps_approved() {
    let f = fixture();
    let request_id = create_request(&f, &[2, 3]);

    let after_first = f
        .service
        .decide(request_id, 0, &manager(), Decision::Approve, None)
        .await
        .unwrap();
    assert_eq!(after_first.state, RequestState::Pending);
    assert_eq!(after_first.steps[0].status, StepStatus::Approved);
}

#[tokio::test]
async fn test_rejected_as_soon_as_any_step_rejects() {
    let f = fixture();
    let request_id = create_request(&f, &[2, 3]);

    let updated = f
        .service
        .decide(
            request_id,
            0,
            &manager(),
            Decision::Reject,
            Some("insufficient documentation".into()),
        )
        .await
        .unwrap();
    assert_eq!(updated.state, RequestState::Rejected);

    // the chain is settled; the second step can no longer act
    let err = f
        .service
        .decide(request_id, 1, &controller(), Decision::Approve, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "conflict");
}

#[tokio::test]
async fn test_decisions_are_append_only() {
    let f = fixture();
    let request_id = create_request(&f, &[2]);
    f.service
        .decide(request_id, 0, &manager(), Decision::Approve, None)
        .await
        .unwrap();

    let decisions = f.store.read(|t| t.decisions_for(request_id));
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].decided_by, "manager-1");
}

#[tokio::test]
async fn test_delegation_rejects_privilege_escalation_down() {
    let f = fixture();
    let request_id = create_request(&f, &[3]);

    let clerk = Principal::new("clerk-1", Role::ApClerk, "acme");
    let err = f
        .service
        .delegate(request_id, 0, &controller(), &clerk)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "permission_denied");
}

#[tokio::test]
async fn test_delegate_inherits_responsibility() {
    let f = fixture();
    let request_id = create_request(&f, &[2]);
    let deputy = Principal::new("manager-2", Role::ApManager, "acme");

    f.service
        .delegate(request_id, 0, &manager(), &deputy)
        .await
        .unwrap();
    let request = f.service.request(request_id).unwrap();
    assert_eq!(request.steps[0].status, StepStatus::Delegated);
    assert_eq!(request.steps[0].delegated_to.as_deref(), Some("manager-2"));

    let updated = f
        .service
        .decide(request_id, 0, &deputy, Decision::Approve, None)
        .await
        .unwrap();
    assert_eq!(updated.state, RequestState::Approved);
}

#[tokio::test]
async fn test_overdue_step_escalates_to_next_level() {
    let f = fixture();
    let request_id = create_request(&f, &[2]);

    // past the 24h step due time
    f.clock.advance(std::time::Duration::from_secs(25 * 3600));
    let escalated = f.service.escalate_overdue().unwrap();
    assert_eq!(escalated, 1);

    let request = f.service.request(request_id).unwrap();
    assert_eq!(request.steps[0].required_role_level, 3);

    // a manager no longer suffices after escalation
    let err = f
        .service
        .decide(request_id, 0, &manager(), Decision::Approve, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "permission_denied");
    f.service
        .decide(request_id, 0, &controller(), Decision::Approve, None)
        .await
        .unwrap();
}
