//! Content hashing for comparing file versions.
//!
//! Two versions of a file are the same version iff their content hashes are
//! equal. Timestamps and sizes never decide that on their own.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

/// Length of a hex-encoded SHA-256 digest.
pub const HASH_HEX_LEN: usize = 64;

#[derive(Debug, Error)]
#[error("Invalid content hash: expected {HASH_HEX_LEN} lowercase hex chars")]
pub struct InvalidHash;

/// Hex-encoded SHA-256 digest of a file's bytes.
///
/// Ordering is the lexicographic order of the hex string, which matches the
/// byte order of the underlying digest. Conflict tie-breaks rely on this.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    /// Compute the hash of `content`.
    pub fn of(content: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content);
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ContentHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ContentHash {
    type Err = InvalidHash;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = s.len() == HASH_HEX_LEN
            && s
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
        if valid {
            Ok(Self(s.to_string()))
        } else {
            Err(InvalidHash)
        }
    }
}

impl TryFrom<String> for ContentHash {
    type Error = InvalidHash;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> String {
        hash.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_deterministic() {
        assert_eq!(ContentHash::of(b"hello world"), ContentHash::of(b"hello world"));
    }

    #[test]
    fn test_different_content_different_hash() {
        assert_ne!(ContentHash::of(b"hello"), ContentHash::of(b"world"));
    }

    #[test]
    fn test_known_digest() {
        let hash = ContentHash::of(b"");
        assert_eq!(
            hash.as_str(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(hash.as_str().len(), HASH_HEX_LEN);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!("abc".parse::<ContentHash>().is_err());
        assert!("E3B0C44298FC1C149AFBF4C8996FB92427AE41E4649B934CA495991B7852B855"
            .parse::<ContentHash>()
            .is_err());
        assert!("z".repeat(64).parse::<ContentHash>().is_err());
    }

    #[test]
    fn test_ordering_matches_string_order() {
        let a: ContentHash = "0".repeat(64).parse().unwrap();
        let b: ContentHash = "f".repeat(64).parse().unwrap();
        assert!(a < b);
    }

    #[test]
    fn test_serde_rejects_invalid() {
        let result: Result<ContentHash, _> = serde_json::from_str("\"nothex\"");
        assert!(result.is_err());
    }
}
