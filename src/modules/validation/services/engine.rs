// Runs the configured rule set in declared order and aggregates the
// outcomes into a Validation verdict.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::modules::invoices::models::{Extraction, Invoice};
use crate::modules::validation::models::{RuleCheck, Validation};

use super::business::{
    CurrencyRule, DuplicateInvoiceRule, GrnMatchRule, PaymentTermsRule, PoMatchRule,
    SpendLimitRule, TaxIdRule, VendorActiveRule,
};
use super::lookups::Lookups;
use super::rules::{
    AmountSignRule, FieldFormatRule, LineMathRule, NoLineItemsRule, RequiredFieldsRule, Rule,
    RuleContext, SubtotalRule, TotalRule, ValidationSettings,
};

pub const RULES_VERSION: &str = "rules-v1";

pub struct RuleEngine {
    rules: Vec<Arc<dyn Rule>>,
    settings: ValidationSettings,
    lookups: Lookups,
}

impl RuleEngine {
    /// The standard rule set: structural, mathematical, duplicate, then
    /// vendor/PO/GRN business rules.
    pub fn standard(settings: ValidationSettings, lookups: Lookups) -> Self {
        let rules: Vec<Arc<dyn Rule>> = vec![
            Arc::new(RequiredFieldsRule),
            Arc::new(FieldFormatRule),
            Arc::new(NoLineItemsRule),
            Arc::new(LineMathRule),
            Arc::new(SubtotalRule),
            Arc::new(TotalRule),
            Arc::new(AmountSignRule),
            Arc::new(DuplicateInvoiceRule),
            Arc::new(VendorActiveRule),
            Arc::new(CurrencyRule),
            Arc::new(TaxIdRule),
            Arc::new(SpendLimitRule),
            Arc::new(PaymentTermsRule),
            Arc::new(PoMatchRule),
            Arc::new(GrnMatchRule),
        ];
        Self {
            rules,
            settings,
            lookups,
        }
    }

    /// Custom ordered rule set (tests and specialized deployments)
    pub fn with_rules(
        rules: Vec<Arc<dyn Rule>>,
        settings: ValidationSettings,
        lookups: Lookups,
    ) -> Self {
        Self {
            rules,
            settings,
            lookups,
        }
    }

    pub async fn validate(
        &self,
        invoice: &Invoice,
        extraction: &Extraction,
        now: DateTime<Utc>,
    ) -> Validation {
        let ctx = RuleContext {
            invoice,
            settings: &self.settings,
            lookups: &self.lookups,
        };

        let mut checks = Vec::with_capacity(self.rules.len());
        for rule in &self.rules {
            let outcome = rule.apply(extraction, &ctx).await;
            let check =
                RuleCheck::from_outcome(rule.name(), rule.category(), rule.severity(), outcome);
            debug!(
                invoice_id = %invoice.id,
                rule = rule.name(),
                passed = check.passed,
                indeterminate = check.indeterminate,
                "Rule evaluated"
            );
            checks.push(check);
        }

        let validation = Validation::new(
            invoice.id,
            checks,
            RULES_VERSION.to_string(),
            extraction.min_confidence(),
            now,
        );
        info!(
            invoice_id = %invoice.id,
            passed = validation.passed,
            checks = validation.checks.len(),
            failures = validation.blocking_checks().count(),
            "Validation completed"
        );
        validation
    }
}
