pub mod record;

pub use record::{fingerprint, IdempotencyRecord, IdempotencyState};
