// Policy gate evaluation: priority precedence, first-match-decides,
// default allow, and condition serialization.

use std::sync::Arc;

use apflow::core::ManualClock;
use apflow::modules::approvals::models::{
    CmpOp, Condition, GateAction, GateContext, PolicyGate,
};
use apflow::modules::approvals::services::PolicyEngine;
use apflow::modules::validation::services::StaticVendorDirectory;
use apflow::store::MemoryStore;
use chrono::Utc;
use rust_decimal_macros::dec;

fn engine_with_gates(gates: Vec<PolicyGate>) -> PolicyEngine {
    let store = MemoryStore::new(Arc::new(ManualClock::new()));
    store
        .transaction(|tx| {
            for gate in gates.clone() {
                tx.upsert_policy_gate(gate);
            }
            Ok(())
        })
        .unwrap();
    PolicyEngine::new(store, Arc::new(StaticVendorDirectory::new()))
}

fn amount_gate(name: &str, priority: i32, threshold: rust_decimal::Decimal, action: GateAction) -> PolicyGate {
    PolicyGate::new(
        name,
        priority,
        Condition::Amount {
            op: CmpOp::Gt,
            value: threshold,
        },
        action,
        vec![2],
        Utc::now(),
    )
}

fn ctx(total: rust_decimal::Decimal) -> GateContext {
    GateContext {
        total_amount: Some(total),
        ..Default::default()
    }
}

#[test]
fn test_first_matching_gate_decides_by_priority() {
    let engine = engine_with_gates(vec![
        amount_gate("block_huge", 1, dec!(100000), GateAction::Block),
        amount_gate("approve_large", 10, dec!(10000), GateAction::RequireApproval),
        amount_gate("flag_medium", 20, dec!(1000), GateAction::Flag),
    ]);

    let decision = engine.evaluate(&ctx(dec!(250000)));
    assert_eq!(decision.action, GateAction::Block);
    assert_eq!(decision.gate_name.as_deref(), Some("block_huge"));

    let decision = engine.evaluate(&ctx(dec!(50000)));
    assert_eq!(decision.action, GateAction::RequireApproval);

    let decision = engine.evaluate(&ctx(dec!(5000)));
    assert_eq!(decision.action, GateAction::Flag);
}

#[test]
fn test_priority_order_beats_insertion_order() {
    let engine = engine_with_gates(vec![
        amount_gate("later_but_weaker", 50, dec!(100), GateAction::Flag),
        amount_gate("earlier", 5, dec!(100), GateAction::Block),
    ]);
    let decision = engine.evaluate(&ctx(dec!(500)));
    assert_eq!(decision.gate_name.as_deref(), Some("earlier"));
}

#[test]
fn test_default_is_allow() {
    let engine = engine_with_gates(vec![amount_gate(
        "approve_large",
        10,
        dec!(10000),
        GateAction::RequireApproval,
    )]);
    let decision = engine.evaluate(&ctx(dec!(100)));
    assert_eq!(decision.action, GateAction::Allow);
    assert!(decision.gate_name.is_none());
}

#[test]
fn test_evaluation_is_deterministic() {
    let engine = engine_with_gates(vec![
        amount_gate("a", 1, dec!(1000), GateAction::RequireApproval),
        amount_gate("b", 2, dec!(100), GateAction::Flag),
    ]);
    let context = ctx(dec!(5000));
    let first = engine.evaluate(&context);
    for _ in 0..10 {
        let again = engine.evaluate(&context);
        assert_eq!(again.action, first.action);
        assert_eq!(again.gate_name, first.gate_name);
    }
}

#[test]
fn test_condition_serde_round_trip() {
    let condition = Condition::All {
        conditions: vec![
            Condition::Amount {
                op: CmpOp::Gt,
                value: dec!(10000),
            },
            Condition::FieldMatches {
                name: "vendor_name".into(),
                pattern: "(?i)consulting".into(),
            },
        ],
    };
    let encoded = serde_json::to_string(&condition).unwrap();
    let decoded: Condition = serde_json::from_str(&encoded).unwrap();
    let context = GateContext {
        total_amount: Some(dec!(20000)),
        header: [("vendor_name".to_string(), "Acme Consulting".to_string())]
            .into_iter()
            .collect(),
        ..Default::default()
    };
    assert!(decoded.matches(&context));
}
