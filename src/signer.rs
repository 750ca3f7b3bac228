//! Detached signatures over ledger payloads.
//!
//! The ledger never talks to key material directly. A deployment plugs in a
//! local key, an HSM or a KMS behind [`Signer`]; the bundled backends are
//! [`UnsignedSigner`] for deployments with signing disabled and
//! [`Ed25519Signer`] for a locally held key.

use ed25519_dalek::{Signature, SigningKey, VerifyingKey};

use crate::error::SignerError;

/// Marker stored in place of a signature when signing is disabled.
pub const UNSIGNED: &str = "unsigned";

pub trait Signer: Send + Sync {
    /// Signature over `payload`, hex encoded, or [`UNSIGNED`].
    fn sign(&self, payload: &[u8]) -> Result<String, SignerError>;

    fn verify(&self, payload: &[u8], signature: &str) -> bool;

    /// Whether this signer produces real signatures.
    fn is_signing(&self) -> bool {
        true
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct UnsignedSigner;

impl Signer for UnsignedSigner {
    fn sign(&self, _payload: &[u8]) -> Result<String, SignerError> {
        Ok(UNSIGNED.to_string())
    }

    fn verify(&self, _payload: &[u8], signature: &str) -> bool {
        signature == UNSIGNED
    }

    fn is_signing(&self) -> bool {
        false
    }
}

pub struct Ed25519Signer {
    key: SigningKey,
}

impl Ed25519Signer {
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            key: SigningKey::from_bytes(&seed),
        }
    }

    /// Seed given as 64 hex characters.
    pub fn from_hex_seed(seed: &str) -> Result<Self, SignerError> {
        let bytes = hex::decode(seed.trim())
            .map_err(|e| SignerError::KeyUnavailable(format!("seed is not hex: {e}")))?;
        let seed: [u8; 32] = bytes.try_into().map_err(|_| {
            SignerError::KeyUnavailable("ed25519 seed must be 32 bytes".to_string())
        })?;

        Ok(Self::from_seed(seed))
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }
}

impl Signer for Ed25519Signer {
    fn sign(&self, payload: &[u8]) -> Result<String, SignerError> {
        use ed25519_dalek::Signer as _;

        let signature = self
            .key
            .try_sign(payload)
            .map_err(|e| SignerError::Backend(e.to_string()))?;
        Ok(hex::encode(signature.to_bytes()))
    }

    fn verify(&self, payload: &[u8], signature: &str) -> bool {
        let Ok(bytes) = hex::decode(signature) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(&bytes) else {
            return false;
        };
        self.key
            .verifying_key()
            .verify_strict(payload, &signature)
            .is_ok()
    }
}

impl std::fmt::Debug for Ed25519Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ed25519Signer")
            .field("verifying_key", &hex::encode(self.verifying_key().as_bytes()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ed25519_roundtrip_and_tamper() {
        let signer = Ed25519Signer::from_seed([7u8; 32]);
        let signature = signer.sign(b"block payload").unwrap();

        assert_eq!(signature.len(), 128);
        assert!(signer.verify(b"block payload", &signature));
        assert!(!signer.verify(b"block payloaD", &signature));
        assert!(!signer.verify(b"block payload", UNSIGNED));
    }

    #[test]
    fn hex_seed_must_be_32_bytes() {
        assert!(Ed25519Signer::from_hex_seed("abcd").is_err());
        assert!(Ed25519Signer::from_hex_seed(&"11".repeat(32)).is_ok());
    }

    #[test]
    fn unsigned_marker() {
        let signer = UnsignedSigner;

        assert_eq!(signer.sign(b"anything").unwrap(), UNSIGNED);
        assert!(signer.verify(b"anything", UNSIGNED));
        assert!(!signer.is_signing());
    }
}
