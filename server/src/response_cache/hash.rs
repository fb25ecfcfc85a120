//! Body digests for stored responses

use crate::response_cache::StoreError;
use sha2::{Digest, Sha256};

/// Compute the SHA-256 hex digest of a response body
pub fn sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Check a body read back from storage against the digest recorded when it was written
pub fn verify(key: &str, data: &[u8], expected: &str) -> Result<(), StoreError> {
    let actual = sha256(data);
    if actual != expected {
        return Err(StoreError::DigestMismatch {
            key: key.to_string(),
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}
