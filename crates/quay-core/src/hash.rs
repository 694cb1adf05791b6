//! Content hashing for cached and installed files.
//!
//! Every artifact is addressed by the SHA-256 of its bytes. A cache entry or
//! tracked file is only trusted while its current hash matches the recorded
//! one.

use std::fmt;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A content hash (SHA-256 lowercase hex digest).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Compute the SHA-256 hash of the given data.
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentHash(hex::encode(hasher.finalize()))
    }

    /// Stream a file through SHA-256.
    pub fn of_file(path: &Path) -> std::io::Result<Self> {
        let mut file = std::fs::File::open(path)?;
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 8192];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(ContentHash(hex::encode(hasher.finalize())))
    }

    /// Wrap an already computed hex digest.
    ///
    /// Returns `None` unless the input is 64 hex digits.
    pub fn from_hex(hex_digest: &str) -> Option<Self> {
        if hex_digest.len() == 64 && hex_digest.bytes().all(|b| b.is_ascii_hexdigit()) {
            Some(ContentHash(hex_digest.to_ascii_lowercase()))
        } else {
            None
        }
    }

    /// Get the hex string representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Verify that the given data matches this hash.
    pub fn verify(&self, data: &[u8]) -> bool {
        ContentHash::compute(data) == *self
    }

    /// Verify that a file on disk still matches this hash.
    ///
    /// Unreadable files never match.
    pub fn matches_file(&self, path: &Path) -> bool {
        ContentHash::of_file(path).map(|h| h == *self).unwrap_or(false)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
