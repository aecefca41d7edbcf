// Pluggable low-confidence field patching (an LLM behind the seam in
// production). Pure-function contract: any failure returns the input
// extraction unchanged.

use async_trait::async_trait;

use crate::modules::invoices::models::ExtractionDraft;

#[async_trait]
pub trait FieldEnhancer: Send + Sync {
    async fn patch_low_confidence(&self, draft: ExtractionDraft, threshold: f64)
        -> ExtractionDraft;
}

/// Default enhancer: no enhancement
pub struct NoopEnhancer;

#[async_trait]
impl FieldEnhancer for NoopEnhancer {
    async fn patch_low_confidence(
        &self,
        draft: ExtractionDraft,
        _threshold: f64,
    ) -> ExtractionDraft {
        draft
    }
}
