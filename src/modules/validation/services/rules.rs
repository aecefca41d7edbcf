// Rule trait plus the deterministic structural and mathematical rules.
//
// All money comparisons use decimal arithmetic with the configured
// tolerance applied as a closed interval.

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::core::money;
use crate::modules::invoices::models::{Extraction, Invoice};
use crate::modules::validation::models::{Outcome, ReasonCode, RuleCategory, Severity};

use super::lookups::Lookups;

/// Header fields that must be present and non-empty
pub const DEFAULT_REQUIRED_FIELDS: [&str; 4] = [
    "vendor_name",
    "invoice_number",
    "invoice_date",
    "total_amount",
];

/// Tunable validation behavior, frozen at engine construction
#[derive(Debug, Clone)]
pub struct ValidationSettings {
    pub tolerance: Decimal,
    pub required_fields: Vec<String>,
    /// Per-field regular-expression constraints
    pub field_patterns: Vec<(String, String)>,
    pub duplicate_amount_variance: Decimal,
    pub duplicate_date_window_days: i64,
}

impl ValidationSettings {
    pub fn with_tolerance(tolerance: Decimal) -> Self {
        Self {
            tolerance,
            required_fields: DEFAULT_REQUIRED_FIELDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            field_patterns: Vec::new(),
            duplicate_amount_variance: Decimal::ONE,
            duplicate_date_window_days: 7,
        }
    }
}

pub struct RuleContext<'a> {
    pub invoice: &'a Invoice,
    pub settings: &'a ValidationSettings,
    pub lookups: &'a Lookups,
}

#[async_trait]
pub trait Rule: Send + Sync {
    fn name(&self) -> &'static str;
    fn category(&self) -> RuleCategory;
    fn severity(&self) -> Severity;

    async fn apply(&self, extraction: &Extraction, ctx: &RuleContext<'_>) -> Outcome;
}

/// Date formats the upstream parsers emit
pub fn parse_invoice_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    for format in ["%Y-%m-%d", "%m/%d/%Y", "%d.%m.%Y", "%d/%m/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Some(date);
        }
    }
    None
}

// ---- structural rules ----

pub struct RequiredFieldsRule;

#[async_trait]
impl Rule for RequiredFieldsRule {
    fn name(&self) -> &'static str {
        "required_fields"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::Structural
    }

    fn severity(&self) -> Severity {
        Severity::Error
    }

    async fn apply(&self, extraction: &Extraction, ctx: &RuleContext<'_>) -> Outcome {
        let missing: Vec<&str> = ctx
            .settings
            .required_fields
            .iter()
            .filter(|field| {
                extraction
                    .header_value(field)
                    .map(|v| v.trim().is_empty())
                    .unwrap_or(true)
            })
            .map(|f| f.as_str())
            .collect();
        if missing.is_empty() {
            Outcome::Pass
        } else {
            Outcome::fail(
                ReasonCode::MissingRequiredField,
                format!("missing required fields: {}", missing.join(", ")),
            )
        }
    }
}

pub struct FieldFormatRule;

#[async_trait]
impl Rule for FieldFormatRule {
    fn name(&self) -> &'static str {
        "field_format"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::Structural
    }

    fn severity(&self) -> Severity {
        Severity::Error
    }

    async fn apply(&self, extraction: &Extraction, ctx: &RuleContext<'_>) -> Outcome {
        let mut problems = Vec::new();

        if let Some(raw) = extraction.header_value("invoice_date") {
            if !raw.trim().is_empty() && parse_invoice_date(raw).is_none() {
                problems.push(format!("invoice_date '{raw}' is not a calendar date"));
            }
        }

        for (name, field) in &extraction.header {
            if name.ends_with("_amount") || name == "subtotal" {
                if !field.value.trim().is_empty() && field.as_decimal().is_none() {
                    problems.push(format!("{name} '{}' is not a decimal", field.value));
                }
            }
        }

        for (name, pattern) in &ctx.settings.field_patterns {
            let Ok(re) = regex::Regex::new(pattern) else {
                continue;
            };
            if let Some(value) = extraction.header_value(name) {
                if !re.is_match(value) {
                    problems.push(format!("{name} '{value}' does not match expected format"));
                }
            }
        }

        if problems.is_empty() {
            Outcome::Pass
        } else {
            Outcome::fail(ReasonCode::InvalidFieldFormat, problems.join("; "))
        }
    }
}

pub struct NoLineItemsRule;

#[async_trait]
impl Rule for NoLineItemsRule {
    fn name(&self) -> &'static str {
        "line_items_present"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::Structural
    }

    fn severity(&self) -> Severity {
        Severity::Error
    }

    async fn apply(&self, extraction: &Extraction, _ctx: &RuleContext<'_>) -> Outcome {
        if extraction.lines.is_empty() {
            Outcome::fail(ReasonCode::NoLineItems, "invoice has no line items")
        } else {
            Outcome::Pass
        }
    }
}

// ---- mathematical rules ----

pub struct LineMathRule;

#[async_trait]
impl Rule for LineMathRule {
    fn name(&self) -> &'static str {
        "line_math"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::Mathematical
    }

    fn severity(&self) -> Severity {
        Severity::Error
    }

    async fn apply(&self, extraction: &Extraction, ctx: &RuleContext<'_>) -> Outcome {
        let eps = ctx.settings.tolerance;
        let mut mismatches = Vec::new();
        for (index, line) in extraction.lines.iter().enumerate() {
            let (Some(quantity), Some(unit_price), Some(amount)) = (
                line.decimal("quantity"),
                line.decimal("unit_price"),
                line.decimal("amount"),
            ) else {
                continue;
            };
            let expected = money::round_money(quantity * unit_price);
            if !money::within_tolerance(amount, expected, eps) {
                mismatches.push(format!(
                    "line {}: amount {} != quantity {} x unit_price {} (expected {})",
                    index + 1,
                    amount,
                    quantity,
                    unit_price,
                    expected
                ));
            }
        }
        if mismatches.is_empty() {
            Outcome::Pass
        } else {
            Outcome::fail(ReasonCode::LineMathMismatch, mismatches.join("; "))
        }
    }
}

pub struct SubtotalRule;

#[async_trait]
impl Rule for SubtotalRule {
    fn name(&self) -> &'static str {
        "subtotal_consistency"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::Mathematical
    }

    fn severity(&self) -> Severity {
        Severity::Error
    }

    async fn apply(&self, extraction: &Extraction, ctx: &RuleContext<'_>) -> Outcome {
        let Some(subtotal) = extraction.header_decimal("subtotal") else {
            return Outcome::Pass;
        };
        let line_sum: Decimal = extraction
            .lines
            .iter()
            .filter_map(|l| l.decimal("amount"))
            .sum();
        if money::within_tolerance(subtotal, line_sum, ctx.settings.tolerance) {
            Outcome::Pass
        } else {
            Outcome::fail(
                ReasonCode::SubtotalMismatch,
                format!("subtotal {subtotal} differs from line sum {line_sum}"),
            )
        }
    }
}

pub struct TotalRule;

#[async_trait]
impl Rule for TotalRule {
    fn name(&self) -> &'static str {
        "total_consistency"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::Mathematical
    }

    fn severity(&self) -> Severity {
        Severity::Error
    }

    async fn apply(&self, extraction: &Extraction, ctx: &RuleContext<'_>) -> Outcome {
        let (Some(total), Some(subtotal)) = (
            extraction.header_decimal("total_amount"),
            extraction.header_decimal("subtotal"),
        ) else {
            return Outcome::Pass;
        };
        let tax = extraction
            .header_decimal("tax_amount")
            .unwrap_or(Decimal::ZERO);
        let expected = subtotal + tax;
        if money::within_tolerance(total, expected, ctx.settings.tolerance) {
            Outcome::Pass
        } else {
            Outcome::fail(
                ReasonCode::TotalMismatch,
                format!("total {total} differs from subtotal {subtotal} + tax {tax} = {expected}"),
            )
        }
    }
}

pub struct AmountSignRule;

#[async_trait]
impl Rule for AmountSignRule {
    fn name(&self) -> &'static str {
        "amount_validity"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::Mathematical
    }

    fn severity(&self) -> Severity {
        Severity::Error
    }

    async fn apply(&self, extraction: &Extraction, _ctx: &RuleContext<'_>) -> Outcome {
        let mut problems = Vec::new();

        match extraction.header.get("total_amount") {
            None => {}
            Some(field) => match field.as_decimal() {
                None => problems.push(format!("total_amount '{}' is not numeric", field.value)),
                Some(v) if v < Decimal::ZERO => {
                    problems.push(format!("total_amount {v} is negative"))
                }
                Some(_) => {}
            },
        }
        for name in ["subtotal", "tax_amount"] {
            if let Some(value) = extraction.header_decimal(name) {
                if value < Decimal::ZERO {
                    problems.push(format!("{name} {value} is negative"));
                }
            }
        }
        for (index, line) in extraction.lines.iter().enumerate() {
            if let Some(amount) = line.decimal("amount") {
                if amount < Decimal::ZERO {
                    problems.push(format!("line {} amount {amount} is negative", index + 1));
                }
            }
        }

        if problems.is_empty() {
            Outcome::Pass
        } else {
            Outcome::fail(ReasonCode::InvalidAmount, problems.join("; "))
        }
    }
}
