pub mod extractor;
pub mod ingest_service;

pub use extractor::{Extractor, JsonExtractor};
pub use ingest_service::{
    BatchItemStatus, DocumentSubmission, IngestService, SubmitOutcome, MAX_BATCH_ITEMS,
    MAX_DOCUMENT_BYTES,
};
