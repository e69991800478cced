//! Checksums for downloaded archives and spec fingerprints.

use sha2::{Digest, Sha256};

/// Compute SHA256 hash of a byte slice.
pub fn sha256_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Compare two hex digests, ignoring case and an optional `sha256:` prefix.
pub fn digest_matches(expected: &str, actual: &str) -> bool {
    let normalize = |s: &str| s.trim().trim_start_matches("sha256:").to_ascii_lowercase();
    normalize(expected) == normalize(actual)
}
