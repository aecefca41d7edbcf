// Parser output bound to an invoice. At most one current extraction per
// invoice; a re-parse supersedes the previous one.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::{ids, money};

/// One extracted semantic field with its confidence and optional page bbox
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValue {
    pub value: String,
    /// In [0, 1]; clamped on construction
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<[f64; 4]>,
}

impl FieldValue {
    pub fn new(value: impl Into<String>, confidence: f64) -> Self {
        Self {
            value: value.into(),
            confidence: confidence.clamp(0.0, 1.0),
            bbox: None,
        }
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        money::parse_amount(&self.value)
    }
}

/// One extracted line item; fields share the header field shape
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedLine {
    pub fields: BTreeMap<String, FieldValue>,
}

impl ExtractedLine {
    pub fn value(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(|f| f.value.as_str())
    }

    pub fn decimal(&self, name: &str) -> Option<Decimal> {
        self.fields.get(name).and_then(|f| f.as_decimal())
    }
}

/// Structured fields extracted from a stored document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Extraction {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub header: BTreeMap<String, FieldValue>,
    pub lines: Vec<ExtractedLine>,
    pub parser_version: String,
    pub created_at: DateTime<Utc>,
    pub version: u64,
}

/// Extractor output before it is bound to an invoice
#[derive(Debug, Clone, Default)]
pub struct ExtractionDraft {
    pub header: BTreeMap<String, FieldValue>,
    pub lines: Vec<ExtractedLine>,
    pub parser_version: String,
}

impl Extraction {
    pub fn from_draft(invoice_id: Uuid, draft: ExtractionDraft, now: DateTime<Utc>) -> Self {
        Self {
            id: ids::new_id(),
            invoice_id,
            header: draft.header,
            lines: draft.lines,
            parser_version: draft.parser_version,
            created_at: now,
            version: 1,
        }
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.header.get(name).map(|f| f.value.as_str())
    }

    pub fn header_decimal(&self, name: &str) -> Option<Decimal> {
        self.header.get(name).and_then(|f| f.as_decimal())
    }

    /// Overwrite a header field with a reviewed value at full confidence
    pub fn patch_header(&mut self, name: &str, value: impl Into<String>) {
        self.header
            .insert(name.to_string(), FieldValue::new(value, 1.0));
    }

    /// Minimum confidence across header and line fields.
    ///
    /// None when the extraction carries no fields at all.
    pub fn min_confidence(&self) -> Option<f64> {
        self.header
            .values()
            .map(|f| f.confidence)
            .chain(
                self.lines
                    .iter()
                    .flat_map(|l| l.fields.values().map(|f| f.confidence)),
            )
            .fold(None, |acc, c| {
                Some(match acc {
                    None => c,
                    Some(prev) if c < prev => c,
                    Some(prev) => prev,
                })
            })
    }

    /// Mean confidence across all fields, for the extraction-accuracy SLI
    pub fn mean_confidence(&self) -> Option<f64> {
        let all: Vec<f64> = self
            .header
            .values()
            .map(|f| f.confidence)
            .chain(
                self.lines
                    .iter()
                    .flat_map(|l| l.fields.values().map(|f| f.confidence)),
            )
            .collect();
        if all.is_empty() {
            None
        } else {
            Some(all.iter().sum::<f64>() / all.len() as f64)
        }
    }
}
