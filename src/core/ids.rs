use sha2::{Digest, Sha256};
use uuid::Uuid;

/// New opaque 128-bit entity id
pub fn new_id() -> Uuid {
    Uuid::new_v4()
}

/// SHA-256 digest of document bytes, lowercase hex
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
