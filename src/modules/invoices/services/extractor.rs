// Extraction seam. The OCR/parser pipeline is an external collaborator; the
// engine only sees structured fields with confidences. The bundled JSON
// extractor parses documents that are already structured (API submissions
// and test fixtures) and is deterministic within its parser version.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::{AppError, Result};
use crate::modules::invoices::models::{ExtractedLine, ExtractionDraft, FieldValue};
use crate::store::MemoryStore;

#[async_trait]
pub trait Extractor: Send + Sync {
    fn parser_version(&self) -> &str;

    async fn extract(&self, storage_ref: &str) -> Result<ExtractionDraft>;
}

/// Parses stored JSON documents into extraction drafts.
///
/// Scalar top-level fields become header fields; `lines` becomes the line
/// items; `field_confidence` overrides the default confidence per field.
/// Unknown non-scalar fields are dropped at this boundary.
pub struct JsonExtractor {
    store: Arc<MemoryStore>,
}

impl JsonExtractor {
    pub const PARSER_VERSION: &'static str = "json-extractor/1";

    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Extractor for JsonExtractor {
    fn parser_version(&self) -> &str {
        Self::PARSER_VERSION
    }

    async fn extract(&self, storage_ref: &str) -> Result<ExtractionDraft> {
        let bytes = self
            .store
            .read(|t| t.document(storage_ref))
            .ok_or_else(|| {
                AppError::unavailable(format!("document {storage_ref} is not readable"))
            })?;
        let doc: Value = serde_json::from_slice(&bytes).map_err(|e| {
            AppError::invalid("extraction_failed", format!("document is not parseable: {e}"))
        })?;
        let Value::Object(root) = doc else {
            return Err(AppError::invalid(
                "extraction_failed",
                "document root is not an object",
            ));
        };

        let default_confidence = root
            .get("confidence")
            .and_then(|v| v.as_f64())
            .unwrap_or(1.0);
        let overrides: BTreeMap<String, f64> = root
            .get("field_confidence")
            .and_then(|v| v.as_object())
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| v.as_f64().map(|c| (k.clone(), c)))
                    .collect()
            })
            .unwrap_or_default();
        let confidence_for =
            |name: &str| overrides.get(name).copied().unwrap_or(default_confidence);

        let mut draft = ExtractionDraft {
            parser_version: Self::PARSER_VERSION.to_string(),
            ..Default::default()
        };

        for (name, value) in &root {
            if matches!(name.as_str(), "lines" | "confidence" | "field_confidence") {
                continue;
            }
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => continue,
            };
            draft
                .header
                .insert(name.clone(), FieldValue::new(text, confidence_for(name)));
        }

        if let Some(Value::Array(lines)) = root.get("lines") {
            for line in lines {
                let Value::Object(fields) = line else {
                    continue;
                };
                let mut extracted = ExtractedLine::default();
                for (name, value) in fields {
                    let text = match value {
                        Value::String(s) => s.clone(),
                        Value::Number(n) => n.to_string(),
                        _ => continue,
                    };
                    extracted
                        .fields
                        .insert(name.clone(), FieldValue::new(text, confidence_for(name)));
                }
                draft.lines.push(extracted);
            }
        }

        Ok(draft)
    }
}
