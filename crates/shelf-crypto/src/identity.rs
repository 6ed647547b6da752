use sha2::{Digest, Sha256};

/// Derive the pseudonymous identity key for a provider subject identifier.
/// Deterministic and one-way: the same subject always maps to the same
/// 64-character lowercase hex string.
pub fn pseudonymous_key(subject: &str) -> String {
    let digest = Sha256::digest(subject.as_bytes());
    hex::encode(digest)
}
