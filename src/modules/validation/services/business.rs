// Business rules requiring external lookups. A failed lookup degrades to an
// indeterminate outcome instead of a spurious rejection.

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::modules::invoices::models::Extraction;
use crate::modules::validation::models::{Outcome, ReasonCode, RuleCategory, Severity};

use super::lookups::{DuplicateKind, LookupError, VendorRecord};
use super::rules::{parse_invoice_date, Rule, RuleContext};

fn degraded(what: &str, e: &LookupError) -> Outcome {
    Outcome::indeterminate(format!("{what} lookup unavailable: {e}"))
}

/// Resolve the vendor for the extraction, or explain why we cannot
async fn vendor_for<'a>(
    extraction: &Extraction,
    ctx: &RuleContext<'a>,
) -> Result<Option<VendorRecord>, LookupError> {
    let Some(name) = extraction.header_value("vendor_name") else {
        return Ok(None);
    };
    ctx.lookups.vendors.find_by_name(name).await
}

pub struct DuplicateInvoiceRule;

#[async_trait]
impl Rule for DuplicateInvoiceRule {
    fn name(&self) -> &'static str {
        "duplicate_detection"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::DuplicateDetection
    }

    fn severity(&self) -> Severity {
        Severity::Error
    }

    async fn apply(&self, extraction: &Extraction, ctx: &RuleContext<'_>) -> Outcome {
        let matches = match ctx
            .lookups
            .invoice_index
            .find_duplicates(
                ctx.invoice,
                extraction,
                ctx.settings.duplicate_amount_variance,
                ctx.settings.duplicate_date_window_days,
            )
            .await
        {
            Ok(matches) => matches,
            Err(e) => return degraded("duplicate index", &e),
        };
        if matches.is_empty() {
            return Outcome::Pass;
        }
        let detail = matches
            .iter()
            .map(|m| {
                let kind = match m.kind {
                    DuplicateKind::Exact => "exact content match",
                    DuplicateKind::Structural => "same vendor/number/date",
                    DuplicateKind::Near => "near match",
                };
                format!("{} with invoice {}", kind, m.invoice_id)
            })
            .collect::<Vec<_>>()
            .join("; ");
        Outcome::fail(ReasonCode::DuplicateInvoice, detail)
    }
}

pub struct VendorActiveRule;

#[async_trait]
impl Rule for VendorActiveRule {
    fn name(&self) -> &'static str {
        "vendor_active"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::Business
    }

    fn severity(&self) -> Severity {
        Severity::Error
    }

    async fn apply(&self, extraction: &Extraction, ctx: &RuleContext<'_>) -> Outcome {
        match vendor_for(extraction, ctx).await {
            Err(e) => degraded("vendor directory", &e),
            Ok(None) => Outcome::Pass,
            Ok(Some(vendor)) if vendor.active => Outcome::Pass,
            Ok(Some(vendor)) => Outcome::fail(
                ReasonCode::InactiveVendor,
                format!("vendor '{}' is inactive", vendor.name),
            ),
        }
    }
}

pub struct CurrencyRule;

#[async_trait]
impl Rule for CurrencyRule {
    fn name(&self) -> &'static str {
        "vendor_currency"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::Business
    }

    fn severity(&self) -> Severity {
        Severity::Error
    }

    async fn apply(&self, extraction: &Extraction, ctx: &RuleContext<'_>) -> Outcome {
        let Some(currency) = extraction.header_value("currency") else {
            return Outcome::Pass;
        };
        match vendor_for(extraction, ctx).await {
            Err(e) => degraded("vendor directory", &e),
            Ok(Some(vendor)) if !vendor.currencies.is_empty() => {
                if vendor.currencies.contains(&currency.to_uppercase()) {
                    Outcome::Pass
                } else {
                    Outcome::fail(
                        ReasonCode::InvalidCurrency,
                        format!(
                            "currency {} not accepted for vendor '{}'",
                            currency, vendor.name
                        ),
                    )
                }
            }
            Ok(_) => Outcome::Pass,
        }
    }
}

pub struct TaxIdRule;

#[async_trait]
impl Rule for TaxIdRule {
    fn name(&self) -> &'static str {
        "vendor_tax_id"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::Business
    }

    fn severity(&self) -> Severity {
        Severity::Error
    }

    async fn apply(&self, extraction: &Extraction, ctx: &RuleContext<'_>) -> Outcome {
        let Some(claimed) = extraction.header_value("vendor_tax_id") else {
            return Outcome::Pass;
        };
        match vendor_for(extraction, ctx).await {
            Err(e) => degraded("vendor directory", &e),
            Ok(Some(vendor)) => match &vendor.tax_id {
                Some(expected) if expected != claimed => Outcome::fail(
                    ReasonCode::InvalidTaxId,
                    format!("tax id '{claimed}' does not match vendor record"),
                ),
                _ => Outcome::Pass,
            },
            Ok(None) => Outcome::Pass,
        }
    }
}

pub struct SpendLimitRule;

#[async_trait]
impl Rule for SpendLimitRule {
    fn name(&self) -> &'static str {
        "vendor_spend_limit"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::Business
    }

    fn severity(&self) -> Severity {
        Severity::Error
    }

    async fn apply(&self, extraction: &Extraction, ctx: &RuleContext<'_>) -> Outcome {
        let Some(total) = extraction.header_decimal("total_amount") else {
            return Outcome::Pass;
        };
        match vendor_for(extraction, ctx).await {
            Err(e) => degraded("vendor directory", &e),
            Ok(Some(vendor)) => match vendor.spend_limit {
                Some(limit) if total > limit => Outcome::fail(
                    ReasonCode::SpendLimitExceeded,
                    format!(
                        "total {total} exceeds spend limit {limit} for vendor '{}'",
                        vendor.name
                    ),
                ),
                _ => Outcome::Pass,
            },
            Ok(None) => Outcome::Pass,
        }
    }
}

pub struct PaymentTermsRule;

#[async_trait]
impl Rule for PaymentTermsRule {
    fn name(&self) -> &'static str {
        "payment_terms"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::Business
    }

    fn severity(&self) -> Severity {
        Severity::Error
    }

    async fn apply(&self, extraction: &Extraction, ctx: &RuleContext<'_>) -> Outcome {
        let (Some(invoice_date), Some(due_date)) = (
            extraction
                .header_value("invoice_date")
                .and_then(parse_invoice_date),
            extraction
                .header_value("due_date")
                .and_then(parse_invoice_date),
        ) else {
            return Outcome::Pass;
        };
        match vendor_for(extraction, ctx).await {
            Err(e) => degraded("vendor directory", &e),
            Ok(Some(vendor)) => match vendor.payment_terms_days {
                Some(terms) => {
                    let granted = (due_date - invoice_date).num_days();
                    if granted < terms {
                        Outcome::fail(
                            ReasonCode::PaymentTermsViolation,
                            format!(
                                "due date grants {granted} days but vendor terms require {terms}"
                            ),
                        )
                    } else {
                        Outcome::Pass
                    }
                }
                None => Outcome::Pass,
            },
            Ok(None) => Outcome::Pass,
        }
    }
}

pub struct PoMatchRule;

#[async_trait]
impl Rule for PoMatchRule {
    fn name(&self) -> &'static str {
        "po_match"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::Business
    }

    fn severity(&self) -> Severity {
        Severity::Error
    }

    async fn apply(&self, extraction: &Extraction, ctx: &RuleContext<'_>) -> Outcome {
        let Some(po_number) = extraction.header_value("po_number") else {
            return Outcome::Pass;
        };
        let po = match ctx.lookups.purchase_orders.find(po_number).await {
            Err(e) => return degraded("purchase order system", &e),
            Ok(None) => {
                return Outcome::fail(
                    ReasonCode::PoNotFound,
                    format!("purchase order '{po_number}' not found"),
                )
            }
            Ok(Some(po)) => po,
        };

        if let Ok(Some(vendor)) = vendor_for(extraction, ctx).await {
            if po.vendor_id != vendor.id {
                return Outcome::fail(
                    ReasonCode::PoMismatch,
                    format!(
                        "purchase order '{}' belongs to a different vendor",
                        po.number
                    ),
                );
            }
        }

        if let Some(total) = extraction.header_decimal("total_amount") {
            if (total - po.total).abs() > po.amount_tolerance {
                return Outcome::fail(
                    ReasonCode::PoAmountMismatch,
                    format!(
                        "invoice total {total} outside tolerance {} of PO total {}",
                        po.amount_tolerance, po.total
                    ),
                );
            }
        }

        let invoice_quantity: Decimal = extraction
            .lines
            .iter()
            .filter_map(|l| l.decimal("quantity"))
            .sum();
        if invoice_quantity > Decimal::ZERO
            && (invoice_quantity - po.quantity).abs() > po.quantity_tolerance
        {
            return Outcome::fail(
                ReasonCode::PoQuantityMismatch,
                format!(
                    "invoice quantity {invoice_quantity} outside tolerance {} of PO quantity {}",
                    po.quantity_tolerance, po.quantity
                ),
            );
        }

        Outcome::Pass
    }
}

pub struct GrnMatchRule;

#[async_trait]
impl Rule for GrnMatchRule {
    fn name(&self) -> &'static str {
        "grn_match"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::Business
    }

    fn severity(&self) -> Severity {
        Severity::Error
    }

    async fn apply(&self, extraction: &Extraction, ctx: &RuleContext<'_>) -> Outcome {
        let Some(grn_number) = extraction.header_value("grn_number") else {
            return Outcome::Pass;
        };
        let grn = match ctx.lookups.goods_receipts.find(grn_number).await {
            Err(e) => return degraded("goods receipt system", &e),
            Ok(None) => {
                return Outcome::fail(
                    ReasonCode::GrnNotFound,
                    format!("goods receipt '{grn_number}' not found"),
                )
            }
            Ok(Some(grn)) => grn,
        };

        if let Some(po_number) = extraction.header_value("po_number") {
            if grn.po_number != po_number {
                return Outcome::fail(
                    ReasonCode::GrnMismatch,
                    format!(
                        "goods receipt '{}' references PO '{}', invoice references '{}'",
                        grn.number, grn.po_number, po_number
                    ),
                );
            }
        }

        let invoice_quantity: Decimal = extraction
            .lines
            .iter()
            .filter_map(|l| l.decimal("quantity"))
            .sum();
        if invoice_quantity > grn.quantity {
            return Outcome::fail(
                ReasonCode::GrnMismatch,
                format!(
                    "invoice quantity {invoice_quantity} exceeds received quantity {}",
                    grn.quantity
                ),
            );
        }

        Outcome::Pass
    }
}
