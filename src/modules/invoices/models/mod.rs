pub mod extraction;
pub mod invoice;

pub use extraction::{ExtractedLine, Extraction, ExtractionDraft, FieldValue};
pub use invoice::{Invoice, InvoiceSource, InvoiceState, RunStatus};
