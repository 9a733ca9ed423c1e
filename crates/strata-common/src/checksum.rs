//! SHA-256 digests for raw source payloads

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of arbitrary bytes
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Digest of a JSON payload in its compact serialized form
pub fn payload_sha256(payload: &serde_json::Value) -> String {
    sha256_hex(payload.to_string().as_bytes())
}
