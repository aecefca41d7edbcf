// Field-level diff between export payload revisions, with per-field
// significance classification.

use serde_json::Value;

use crate::modules::exports::models::{ChangeSignificance, FieldChange};

/// Which fields carry which significance when changed
#[derive(Debug, Clone)]
pub struct SignificanceRules {
    critical: Vec<String>,
    high: Vec<String>,
    medium: Vec<String>,
}

impl SignificanceRules {
    pub fn standard() -> Self {
        Self {
            critical: ["total_amount", "subtotal", "tax_amount"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            high: ["vendor_name", "invoice_number", "currency"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            medium: ["invoice_date", "due_date", "po_number", "lines"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    fn classify(&self, field: &str) -> ChangeSignificance {
        // nested paths classify by their root segment
        let root = field.split('.').next().unwrap_or(field);
        if self.critical.iter().any(|f| f == root) {
            ChangeSignificance::Critical
        } else if self.high.iter().any(|f| f == root) {
            ChangeSignificance::High
        } else if self.medium.iter().any(|f| f == root) {
            ChangeSignificance::Medium
        } else {
            ChangeSignificance::Low
        }
    }
}

/// Compute the field-level change list between two payload revisions.
///
/// Objects are walked by key; arrays and scalars compare as whole values.
pub fn compute_diff(before: &Value, after: &Value, rules: &SignificanceRules) -> Vec<FieldChange> {
    let mut changes = Vec::new();
    walk("", before, after, rules, &mut changes);
    changes.sort_by(|a, b| a.field.cmp(&b.field));
    changes
}

fn walk(
    path: &str,
    before: &Value,
    after: &Value,
    rules: &SignificanceRules,
    out: &mut Vec<FieldChange>,
) {
    match (before, after) {
        (Value::Object(b), Value::Object(a)) => {
            let keys: std::collections::BTreeSet<&String> = b.keys().chain(a.keys()).collect();
            for key in keys {
                let sub_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                walk(
                    &sub_path,
                    b.get(key).unwrap_or(&Value::Null),
                    a.get(key).unwrap_or(&Value::Null),
                    rules,
                    out,
                );
            }
        }
        (b, a) => {
            if b != a {
                out.push(FieldChange {
                    field: path.to_string(),
                    before: b.clone(),
                    after: a.clone(),
                    significance: rules.classify(path),
                });
            }
        }
    }
}
