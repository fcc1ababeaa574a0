//! Secondary index keys.
//!
//! A lookup entry maps a normalized attribute (e.g. an email address) to the
//! identity owning it: `lookup/<namespace>/<sha256-hex>`.

use crate::constants::LOOKUP_KEY_PREFIX;
use sha2::{Digest, Sha256};

/// Lower-hex SHA-256 of the trimmed, lower-cased value (64 characters)
pub fn lookup_digest(value: &str) -> String {
    let normalized = value.trim().to_lowercase();
    format!("{:x}", Sha256::digest(normalized.as_bytes()))
}

/// Build the store key of a lookup entry
pub fn build_lookup_key(namespace: &str, digest: &str) -> String {
    format!("{LOOKUP_KEY_PREFIX}{namespace}/{digest}")
}

/// Whether a store key belongs to the secondary index
pub fn is_lookup_key(key: &str) -> bool {
    key.starts_with(LOOKUP_KEY_PREFIX)
}
