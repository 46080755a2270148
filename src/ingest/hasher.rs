use sha2::{Digest, Sha256};

/// SHA-256 hex digest of an attachment body. Used as the dedup key for
/// re-delivered messages.
pub fn content_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
