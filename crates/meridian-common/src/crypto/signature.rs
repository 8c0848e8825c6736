//! Signature schemes
//!
//! Node-response verification is written against the [`SignatureScheme`]
//! capability so the consensus engine does not depend on a concrete curve.
//! [`Ed25519Scheme`] treats an [`Address`] as the signer's verifying key.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

use crate::types::ids::Address;

/// A signature scheme able to check that `signer` signed `message`
pub trait SignatureScheme: Send + Sync {
    /// Scheme name, for logging
    fn name(&self) -> &'static str;

    /// Returns true only for a valid signature by `signer`
    fn verify(&self, signer: &Address, message: &[u8], signature: &[u8; 64]) -> bool;
}

/// Ed25519 signatures keyed by 32-byte verifying keys
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Scheme;

impl SignatureScheme for Ed25519Scheme {
    fn name(&self) -> &'static str {
        "ed25519"
    }

    fn verify(&self, signer: &Address, message: &[u8], signature: &[u8; 64]) -> bool {
        let Ok(key) = VerifyingKey::from_bytes(signer.as_bytes()) else {
            return false;
        };
        let sig = Signature::from_bytes(signature);
        key.verify_strict(message, &sig).is_ok()
    }
}

/// Address of an Ed25519 signing key
pub fn address_of(signing_key: &SigningKey) -> Address {
    Address::new(signing_key.verifying_key().to_bytes())
}

/// Sign a payload, returning signature bytes
pub fn sign_payload(signing_key: &SigningKey, payload: &[u8]) -> [u8; 64] {
    signing_key.sign(payload).to_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn test_sign_and_verify() {
        let key = SigningKey::generate(&mut OsRng);
        let signer = address_of(&key);
        let signature = sign_payload(&key, b"payload");

        let scheme = Ed25519Scheme;
        assert!(scheme.verify(&signer, b"payload", &signature));
        assert!(!scheme.verify(&signer, b"other payload", &signature));
    }

    #[test]
    fn test_wrong_signer_rejected() {
        let key = SigningKey::generate(&mut OsRng);
        let impostor = address_of(&SigningKey::generate(&mut OsRng));
        let signature = sign_payload(&key, b"payload");
        assert!(!Ed25519Scheme.verify(&impostor, b"payload", &signature));
    }
}
