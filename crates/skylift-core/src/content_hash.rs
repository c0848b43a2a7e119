//! Content hashing for work ids.
//!
//! Work items derived from asset manifest entries are identified by a digest
//! of their content description, so identical work (two stacks referencing
//! the same asset source) collapses onto one id. The hash input is the
//! canonical JSON of the value; struct fields serialize in declaration order,
//! which makes the digest stable across runs. This is an ordinary
//! collision-resistant hash, not a security boundary.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Length of the truncated digest used in human-visible work ids.
const SHORT_HASH_LEN: usize = 10;

/// Hex SHA-256 digest of the canonical JSON form of `value`.
pub fn content_hash<T: Serialize>(value: &T) -> String {
    let mut hasher = Sha256::new();
    // Serialization of the in-memory model types cannot fail.
    serde_json::to_writer(HashWriter(&mut hasher), value)
        .expect("hash input serializes to JSON");
    hex::encode(hasher.finalize())
}

/// [`content_hash`] truncated for readable ids.
pub fn short_content_hash<T: Serialize>(value: &T) -> String {
    let mut digest = content_hash(value);
    digest.truncate(SHORT_HASH_LEN);
    digest
}

struct HashWriter<'a>(&'a mut Sha256);

impl std::io::Write for HashWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
