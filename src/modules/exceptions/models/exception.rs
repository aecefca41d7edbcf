// A failed validation check elevated to a resolvable work item. Related
// failures sharing a category are coalesced into one exception with a
// multi-issue payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::{ids, AppError, Result};
use crate::modules::validation::models::{ReasonCode, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionCategory {
    Math,
    Duplicate,
    Matching,
    VendorPolicy,
    DataQuality,
    System,
}

impl ExceptionCategory {
    /// Category an error reason elevates into
    pub fn for_reason(reason: ReasonCode) -> Self {
        use ReasonCode::*;
        match reason {
            LineMathMismatch | SubtotalMismatch | TotalMismatch | InvalidAmount => {
                ExceptionCategory::Math
            }
            DuplicateInvoice => ExceptionCategory::Duplicate,
            PoNotFound | PoMismatch | PoAmountMismatch | PoQuantityMismatch | GrnNotFound
            | GrnMismatch => ExceptionCategory::Matching,
            InactiveVendor | InvalidCurrency | InvalidTaxId | SpendLimitExceeded
            | PaymentTermsViolation => ExceptionCategory::VendorPolicy,
            MissingRequiredField | InvalidFieldFormat | InvalidDataStructure | NoLineItems => {
                ExceptionCategory::DataQuality
            }
            ValidationError | DatabaseError | ExtractionError | StorageError => {
                ExceptionCategory::System
            }
        }
    }

    /// Resolution actions offered for this category
    pub fn suggested_actions(&self) -> Vec<ResolutionAction> {
        use ResolutionAction::*;
        match self {
            ExceptionCategory::Math => vec![Recalculate, ManualAdjust, AcceptAsIs],
            ExceptionCategory::Duplicate => vec![MarkDuplicate, AcceptNotDuplicate],
            ExceptionCategory::Matching => vec![LinkPurchaseOrder, ManualAdjust, AcceptAsIs],
            ExceptionCategory::VendorPolicy => vec![UpdateVendor, AcceptAsIs, Escalate],
            ExceptionCategory::DataQuality => vec![ManualAdjust, AcceptAsIs],
            ExceptionCategory::System => vec![Retry, Escalate],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionStatus {
    Open,
    InReview,
    Resolved,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolutionAction {
    Recalculate,
    ManualAdjust,
    AcceptAsIs,
    MarkDuplicate,
    AcceptNotDuplicate,
    LinkPurchaseOrder,
    UpdateVendor,
    Retry,
    Escalate,
    /// Explicit out-of-suggestion resolution, always permitted but recorded
    Override,
}

/// One coalesced failure inside an exception
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExceptionIssue {
    pub reason_code: ReasonCode,
    pub details: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exception {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub category: ExceptionCategory,
    /// Primary reason; additional coalesced reasons live in `issues`
    pub reason_code: ReasonCode,
    pub severity: Severity,
    pub status: ExceptionStatus,
    pub issues: Vec<ExceptionIssue>,
    pub details: String,
    pub suggested_actions: Vec<ResolutionAction>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub resolution_action: Option<ResolutionAction>,
    pub resolution_notes: Option<String>,
    pub version: u64,
}

impl Exception {
    pub fn new(
        invoice_id: Uuid,
        category: ExceptionCategory,
        issues: Vec<ExceptionIssue>,
        now: DateTime<Utc>,
    ) -> Self {
        let reason_code = issues
            .first()
            .map(|i| i.reason_code)
            .unwrap_or(ReasonCode::ValidationError);
        let details = issues
            .iter()
            .map(|i| format!("{}: {}", i.reason_code, i.details))
            .collect::<Vec<_>>()
            .join("; ");
        Self {
            id: ids::new_id(),
            invoice_id,
            category,
            reason_code,
            severity: Severity::Error,
            status: ExceptionStatus::Open,
            issues,
            details,
            suggested_actions: category.suggested_actions(),
            created_at: now,
            updated_at: now,
            resolved_at: None,
            resolved_by: None,
            resolution_action: None,
            resolution_notes: None,
            version: 1,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(
            self.status,
            ExceptionStatus::Open | ExceptionStatus::InReview
        )
    }

    /// Mark resolved. `resolved_at` is set iff status becomes resolved.
    pub fn resolve(
        &mut self,
        by: &str,
        action: ResolutionAction,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if !self.is_open() {
            return Err(AppError::conflict(format!(
                "exception {} is already {:?}",
                self.id, self.status
            )));
        }
        if action != ResolutionAction::Override && !self.suggested_actions.contains(&action) {
            return Err(AppError::validation(format!(
                "action {:?} is not suggested for a {:?} exception; use an explicit override",
                action, self.category
            )));
        }
        self.status = ExceptionStatus::Resolved;
        self.resolved_at = Some(now);
        self.resolved_by = Some(by.to_string());
        self.resolution_action = Some(action);
        self.resolution_notes = notes;
        self.updated_at = now;
        Ok(())
    }
}
