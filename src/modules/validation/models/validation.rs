use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::taxonomy::{Outcome, ReasonCode, RuleCategory, Severity};
use crate::core::ids;

/// One rule's recorded outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleCheck {
    pub rule_name: String,
    pub category: RuleCategory,
    pub severity: Severity,
    pub passed: bool,
    /// Lookup failure: outcome excluded from the verdict
    pub indeterminate: bool,
    pub reason_code: Option<ReasonCode>,
    pub details: String,
}

impl RuleCheck {
    pub fn from_outcome(
        rule_name: &str,
        category: RuleCategory,
        severity: Severity,
        outcome: Outcome,
    ) -> Self {
        match outcome {
            Outcome::Pass => Self {
                rule_name: rule_name.to_string(),
                category,
                severity,
                passed: true,
                indeterminate: false,
                reason_code: None,
                details: String::new(),
            },
            Outcome::Fail { reason, details } => Self {
                rule_name: rule_name.to_string(),
                category,
                severity,
                passed: false,
                indeterminate: false,
                reason_code: Some(reason),
                details,
            },
            Outcome::Indeterminate { details } => Self {
                rule_name: rule_name.to_string(),
                category,
                // degraded checks are recorded as warnings regardless of the
                // rule's configured severity
                severity: Severity::Warning,
                passed: false,
                indeterminate: true,
                reason_code: None,
                details,
            },
        }
    }

    /// A hard failure that counts against the verdict
    pub fn is_blocking(&self) -> bool {
        !self.passed && !self.indeterminate && self.severity == Severity::Error
    }
}

/// The rule engine's verdict on an extraction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Validation {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub passed: bool,
    pub checks: Vec<RuleCheck>,
    pub rules_version: String,
    /// Minimum field confidence of the validated extraction, for the
    /// auto-approval gate
    pub min_confidence: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub version: u64,
}

impl Validation {
    pub fn new(
        invoice_id: Uuid,
        checks: Vec<RuleCheck>,
        rules_version: String,
        min_confidence: Option<f64>,
        now: DateTime<Utc>,
    ) -> Self {
        let passed = !checks.iter().any(|c| c.is_blocking());
        Self {
            id: ids::new_id(),
            invoice_id,
            passed,
            checks,
            rules_version,
            min_confidence,
            created_at: now,
            version: 1,
        }
    }

    pub fn blocking_checks(&self) -> impl Iterator<Item = &RuleCheck> {
        self.checks.iter().filter(|c| c.is_blocking())
    }
}
