// Policy gates decide whether an action proceeds, requires approval, is
// blocked, or is flagged. Gates are evaluated in priority order (lower value
// first); the first matching gate decides, default allow.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::ids;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateAction {
    Allow,
    RequireApproval,
    Block,
    Flag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    pub fn holds<T: PartialOrd>(&self, left: &T, right: &T) -> bool {
        match self {
            CmpOp::Eq => left == right,
            CmpOp::Ne => left != right,
            CmpOp::Lt => left < right,
            CmpOp::Le => left <= right,
            CmpOp::Gt => left > right,
            CmpOp::Ge => left >= right,
        }
    }
}

/// Named predicates computed by the caller into the gate context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamedPredicate {
    IsDuplicate,
    NewVendor,
    UnusualVariance,
}

/// Boolean expression over invoice attributes.
///
/// Evaluation is total and deterministic: a missing or unparsable field
/// makes the comparison false, never an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Condition {
    /// Compare the invoice total amount
    Amount { op: CmpOp, value: Decimal },
    /// Named-predicate shorthand for Amount Gt
    AmountExceeds { value: Decimal },
    /// Compare a header field as a string
    Field {
        name: String,
        op: CmpOp,
        value: String,
    },
    /// Set membership on a header field
    FieldIn { name: String, values: BTreeSet<String> },
    /// Regex match on a header field
    FieldMatches { name: String, pattern: String },
    /// Compare the number of line items
    LineCount { op: CmpOp, value: usize },
    Predicate { predicate: NamedPredicate },
    All { conditions: Vec<Condition> },
    Any { conditions: Vec<Condition> },
    Not { condition: Box<Condition> },
}

/// Snapshot of invoice attributes a gate can see
#[derive(Debug, Clone, Default)]
pub struct GateContext {
    pub total_amount: Option<Decimal>,
    pub header: BTreeMap<String, String>,
    pub line_count: usize,
    pub is_duplicate: bool,
    pub new_vendor: bool,
    pub unusual_variance: bool,
}

impl Condition {
    pub fn matches(&self, ctx: &GateContext) -> bool {
        match self {
            Condition::Amount { op, value } => ctx
                .total_amount
                .map(|total| op.holds(&total, value))
                .unwrap_or(false),
            Condition::AmountExceeds { value } => ctx
                .total_amount
                .map(|total| total > *value)
                .unwrap_or(false),
            Condition::Field { name, op, value } => ctx
                .header
                .get(name)
                .map(|field| op.holds(&field.as_str(), &value.as_str()))
                .unwrap_or(false),
            Condition::FieldIn { name, values } => ctx
                .header
                .get(name)
                .map(|field| values.contains(field))
                .unwrap_or(false),
            Condition::FieldMatches { name, pattern } => {
                match (ctx.header.get(name), regex::Regex::new(pattern)) {
                    (Some(field), Ok(re)) => re.is_match(field),
                    _ => false,
                }
            }
            Condition::LineCount { op, value } => op.holds(&ctx.line_count, value),
            Condition::Predicate { predicate } => match predicate {
                NamedPredicate::IsDuplicate => ctx.is_duplicate,
                NamedPredicate::NewVendor => ctx.new_vendor,
                NamedPredicate::UnusualVariance => ctx.unusual_variance,
            },
            Condition::All { conditions } => conditions.iter().all(|c| c.matches(ctx)),
            Condition::Any { conditions } => conditions.iter().any(|c| c.matches(ctx)),
            Condition::Not { condition } => !condition.matches(ctx),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyGate {
    pub id: Uuid,
    pub name: String,
    /// Lower value = higher precedence
    pub priority: i32,
    pub condition: Condition,
    pub action: GateAction,
    /// Role levels of the approval chain this gate demands, in step order
    pub approval_levels: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl PolicyGate {
    pub fn new(
        name: impl Into<String>,
        priority: i32,
        condition: Condition,
        action: GateAction,
        approval_levels: Vec<u8>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ids::new_id(),
            name: name.into(),
            priority,
            condition,
            action,
            approval_levels,
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }
}

/// The decision the ordered gate list produced
#[derive(Debug, Clone)]
pub struct GateDecision {
    pub action: GateAction,
    /// None when no gate matched (default allow)
    pub gate_name: Option<String>,
    pub approval_levels: Vec<u8>,
}

impl GateDecision {
    pub fn default_allow() -> Self {
        Self {
            action: GateAction::Allow,
            gate_name: None,
            approval_levels: Vec::new(),
        }
    }
}
