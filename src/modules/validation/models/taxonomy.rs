// Closed reason-code taxonomy. Every rule failure maps into this set;
// unknown conditions map to ValidationError.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    MissingRequiredField,
    InvalidFieldFormat,
    InvalidDataStructure,
    NoLineItems,
    LineMathMismatch,
    SubtotalMismatch,
    TotalMismatch,
    InvalidAmount,
    DuplicateInvoice,
    PoNotFound,
    PoMismatch,
    PoAmountMismatch,
    PoQuantityMismatch,
    GrnNotFound,
    GrnMismatch,
    InactiveVendor,
    InvalidCurrency,
    InvalidTaxId,
    SpendLimitExceeded,
    PaymentTermsViolation,
    ValidationError,
    DatabaseError,
    ExtractionError,
    StorageError,
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // serde rename gives the canonical SCREAMING_SNAKE_CASE spelling
        let s = serde_json::to_string(self).map_err(|_| std::fmt::Error)?;
        write!(f, "{}", s.trim_matches('"'))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCategory {
    Structural,
    Mathematical,
    Business,
    DataQuality,
    DuplicateDetection,
    System,
}

/// Result of applying one rule to one extraction.
///
/// `Indeterminate` is the degradation outcome: an external lookup failed, so
/// the rule can neither pass nor fail. It is recorded as a warning and
/// excluded from the pass/fail verdict.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Pass,
    Fail {
        reason: ReasonCode,
        details: String,
    },
    Indeterminate {
        details: String,
    },
}

impl Outcome {
    pub fn fail(reason: ReasonCode, details: impl Into<String>) -> Self {
        Outcome::Fail {
            reason,
            details: details.into(),
        }
    }

    pub fn indeterminate(details: impl Into<String>) -> Self {
        Outcome::Indeterminate {
            details: details.into(),
        }
    }
}
