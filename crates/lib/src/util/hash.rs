//! Hashing utilities for the in-memory object store.
//!
//! Blobs loaded from a cloned repository are keyed by a truncated SHA-256 of
//! their content, so identical files across a tree share one stored copy.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::consts::OBJ_HASH_PREFIX_LEN;

/// A content-addressed id identifying one blob in an object store.
///
/// The id is a 20-character truncated SHA-256 of the blob bytes, as a
/// lowercase hexadecimal string, e.g. `"a1b2c3d4e5f6789012ab"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectHash(pub String);

impl std::fmt::Display for ObjectHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl ObjectHash {
  /// Compute the object id of a byte slice.
  pub fn of_bytes(data: &[u8]) -> Self {
    let full = hash_bytes(data);
    ObjectHash(full[..OBJ_HASH_PREFIX_LEN].to_string())
  }
}

/// Full 64-character SHA-256 of arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> String {
  let mut hasher = Sha256::new();
  hasher.update(data);
  hex::encode(hasher.finalize())
}
