// Deterministic policy gate evaluation: for a given (invoice, context) pair
// the ordered gate list always yields the same decision.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::debug;

use crate::modules::approvals::models::{GateContext, GateDecision, PolicyGate};
use crate::modules::invoices::models::{Extraction, Invoice, InvoiceState};
use crate::modules::validation::models::{ReasonCode, Validation};
use crate::modules::validation::services::VendorDirectory;
use crate::store::MemoryStore;

/// History depth required before variance is considered meaningful
const VARIANCE_MIN_HISTORY: usize = 3;

/// Multiple of the historical average treated as unusual
const VARIANCE_MULTIPLE: Decimal = Decimal::TWO;

pub struct PolicyEngine {
    store: Arc<MemoryStore>,
    vendors: Arc<dyn VendorDirectory>,
}

impl PolicyEngine {
    pub fn new(store: Arc<MemoryStore>, vendors: Arc<dyn VendorDirectory>) -> Self {
        Self { store, vendors }
    }

    /// Build the gate context from the invoice's extraction, validation and
    /// vendor history. Lookup failures leave predicates false rather than
    /// guessing.
    pub async fn context_for(
        &self,
        invoice: &Invoice,
        extraction: &Extraction,
        validation: Option<&Validation>,
    ) -> GateContext {
        let header = extraction
            .header
            .iter()
            .map(|(k, v)| (k.clone(), v.value.clone()))
            .collect();
        let total_amount = extraction.header_decimal("total_amount");

        let is_duplicate = validation
            .map(|v| {
                v.checks
                    .iter()
                    .any(|c| !c.passed && c.reason_code == Some(ReasonCode::DuplicateInvoice))
            })
            .unwrap_or(false);

        let vendor_name = extraction.header_value("vendor_name");
        let new_vendor = match vendor_name {
            Some(name) => matches!(self.vendors.find_by_name(name).await, Ok(None)),
            None => false,
        };

        let unusual_variance = match (vendor_name, total_amount) {
            (Some(name), Some(total)) => self.variance_unusual(invoice, name, total),
            _ => false,
        };

        GateContext {
            total_amount,
            header,
            line_count: extraction.lines.len(),
            is_duplicate,
            new_vendor,
            unusual_variance,
        }
    }

    /// Total deviates far from this vendor's settled history
    fn variance_unusual(&self, invoice: &Invoice, vendor_name: &str, total: Decimal) -> bool {
        let vendor_lc = vendor_name.to_lowercase();
        let history: Vec<Decimal> = self.store.read(|t| {
            t.invoices()
                .iter()
                .filter(|other| {
                    other.id != invoice.id
                        && matches!(other.state, InvoiceState::Posted | InvoiceState::Done)
                })
                .filter_map(|other| {
                    let ex = t.extraction_for(other.id)?;
                    if ex.header_value("vendor_name")?.to_lowercase() != vendor_lc {
                        return None;
                    }
                    ex.header_decimal("total_amount")
                })
                .collect()
        });
        if history.len() < VARIANCE_MIN_HISTORY {
            return false;
        }
        let average: Decimal = history.iter().sum::<Decimal>() / Decimal::from(history.len());
        average > Decimal::ZERO && total > average * VARIANCE_MULTIPLE
    }

    /// First matching gate decides; default allow
    pub fn evaluate(&self, ctx: &GateContext) -> GateDecision {
        let gates: Vec<PolicyGate> = self.store.read(|t| t.policy_gates());
        for gate in &gates {
            if gate.condition.matches(ctx) {
                debug!(gate = %gate.name, action = ?gate.action, "Policy gate matched");
                return GateDecision {
                    action: gate.action,
                    gate_name: Some(gate.name.clone()),
                    approval_levels: gate.approval_levels.clone(),
                };
            }
        }
        GateDecision::default_allow()
    }
}
