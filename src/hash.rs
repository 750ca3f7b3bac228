//! Content hashing and canonical serialization of ledger payloads
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};

use crate::error::Result;

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    minicbor::Encode,
    minicbor::Decode,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HashAlgorithm {
    #[default]
    #[n(0)]
    Sha256,
    #[n(1)]
    Sha512,
}

impl HashAlgorithm {
    /// Length of a digest in hex characters.
    pub fn hex_len(&self) -> usize {
        match self {
            HashAlgorithm::Sha256 => 64,
            HashAlgorithm::Sha512 => 128,
        }
    }

    /// All-zero previous hash used by genesis blocks.
    pub fn genesis_sentinel(&self) -> String {
        "0".repeat(self.hex_len())
    }

    pub fn name(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "SHA-256",
            HashAlgorithm::Sha512 => "SHA-512",
        }
    }
}

/// Lowercase hex digest of `bytes`.
pub fn hash(bytes: &[u8], algorithm: HashAlgorithm) -> String {
    match algorithm {
        HashAlgorithm::Sha256 => sha256::digest(bytes),
        HashAlgorithm::Sha512 => hex::encode(Sha512::digest(bytes)),
    }
}

/// Stable byte form of a payload. Fields are written in index order and
/// maps are `BTreeMap`s, so the output does not depend on insertion order.
pub fn canonicalize<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>> {
    Ok(minicbor::to_vec(value)?)
}

/// Primary hash plus the two secondary checksums kept for older consumers.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct ContentHashes {
    #[n(0)]
    pub content_hash: String,
    #[n(1)]
    pub sha512: String,
    #[n(2)]
    pub blake3: String,
}

impl ContentHashes {
    pub fn compute(content: &[u8], algorithm: HashAlgorithm) -> Self {
        Self {
            content_hash: hash(content, algorithm),
            sha512: hash(content, HashAlgorithm::Sha512),
            blake3: blake3::hash(content).to_hex().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn known_sha256_vector() {
        assert_eq!(
            hash(b"abc", HashAlgorithm::Sha256),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn sentinel_matches_digest_width() {
        for algorithm in [HashAlgorithm::Sha256, HashAlgorithm::Sha512] {
            let digest = hash(b"payload", algorithm);
            let sentinel = algorithm.genesis_sentinel();

            assert_eq!(digest.len(), sentinel.len());
            assert!(sentinel.chars().all(|c| c == '0'));
        }
    }

    #[test]
    fn canonical_form_ignores_insertion_order() {
        let mut a = BTreeMap::new();
        a.insert("zeta".to_string(), "1".to_string());
        a.insert("alpha".to_string(), "2".to_string());

        let mut b = BTreeMap::new();
        b.insert("alpha".to_string(), "2".to_string());
        b.insert("zeta".to_string(), "1".to_string());

        assert_eq!(canonicalize(&a).unwrap(), canonicalize(&b).unwrap());
    }

    #[test]
    fn checksums_differ_per_algorithm() {
        let hashes = ContentHashes::compute(b"quarterly filing", HashAlgorithm::Sha256);

        assert_eq!(hashes.content_hash.len(), 64);
        assert_eq!(hashes.sha512.len(), 128);
        assert_eq!(hashes.blake3.len(), 64);
        assert_ne!(hashes.content_hash, hashes.blake3);
    }
}
