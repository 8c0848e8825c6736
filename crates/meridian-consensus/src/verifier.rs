//! Node-response verification
//!
//! Checks that a response:
//! 1. Answers the request it is presented with
//! 2. Arrives before the request expires
//! 3. Comes from an authorized risk node
//! 4. Carries a valid signature over the canonical payload
//!
//! Duplicate-signer bookkeeping lives in [`crate::ConsensusState`].

use std::collections::BTreeSet;

use meridian_common::{
    crypto::{Ed25519Scheme, SignatureScheme},
    error::{AuthError, TemporalError},
    Address, Height, LoanRequest, NodeResponse, Result,
};
use tracing::warn;

/// Authenticates node responses against a signature scheme
pub struct SignatureVerifier {
    scheme: Box<dyn SignatureScheme>,
    authorized: BTreeSet<Address>,
}

impl SignatureVerifier {
    pub fn new(scheme: Box<dyn SignatureScheme>, authorized: BTreeSet<Address>) -> Self {
        Self { scheme, authorized }
    }

    /// Verifier for Ed25519-signed responses
    pub fn ed25519(authorized: BTreeSet<Address>) -> Self {
        Self::new(Box::new(Ed25519Scheme), authorized)
    }

    pub fn is_authorized(&self, signer: &Address) -> bool {
        self.authorized.contains(signer)
    }

    pub fn scheme_name(&self) -> &'static str {
        self.scheme.name()
    }

    /// Verify one response for `request` at `height`
    pub fn verify(
        &self,
        request: &LoanRequest,
        response: &NodeResponse,
        height: Height,
    ) -> Result<()> {
        if request.is_expired_at(height) {
            return Err(TemporalError::RequestExpired {
                expiration: request.expiration_height,
                current: height,
            }
            .into());
        }

        if !self.is_authorized(&response.signer) {
            warn!(signer = %response.signer, "Response from unauthorized signer");
            return Err(AuthError::UnauthorizedSigner {
                signer: response.signer.to_string(),
            }
            .into());
        }

        // Response must be bound to this exact request
        if response.request_hash != request.hash() {
            warn!(signer = %response.signer, "Response bound to a different request");
            return Err(AuthError::InvalidSignature {
                signer: response.signer.to_string(),
            }
            .into());
        }

        let payload = NodeResponse::signing_payload(request, &response.terms);
        if !self
            .scheme
            .verify(&response.signer, &payload, &response.signature)
        {
            warn!(
                signer = %response.signer,
                scheme = self.scheme.name(),
                "Signature verification failed"
            );
            return Err(AuthError::InvalidSignature {
                signer: response.signer.to_string(),
            }
            .into());
        }

        Ok(())
    }
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("scheme", &self.scheme.name())
            .field("authorized", &self.authorized.len())
            .finish()
    }
}
