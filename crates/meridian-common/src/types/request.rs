//! LoanRequest and NodeResponse - the inputs to term consensus
//!
//! A borrower publishes a [`LoanRequest`]; each risk node answers with a
//! signed [`NodeResponse`] bound to the request's canonical hash. Both
//! hashes are BLAKE3 digests over a domain tag and a fixed little-endian
//! field encoding.

use serde::{Deserialize, Serialize};

use super::ids::{Address, Height, MarketId, RequestHash};

const REQUEST_DOMAIN: &[u8] = b"meridian.loan-request.v1";
const RESPONSE_DOMAIN: &[u8] = b"meridian.node-response.v1";

/// Loan terms requested by a borrower
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanRequest {
    /// Borrower address
    pub borrower: Address,
    /// Market (lending/collateral asset pair) the loan is drawn from
    pub market: MarketId,
    /// Requested principal in lending-token base units
    pub amount: u128,
    /// Loan duration in heights
    pub duration: u64,
    /// Height at which the request was issued
    pub request_height: Height,
    /// Last height at which responses may be accepted
    pub expiration_height: Height,
    /// Borrower nonce for replay protection
    pub nonce: u64,
}

impl LoanRequest {
    /// Canonical hash of the request
    pub fn hash(&self) -> RequestHash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(REQUEST_DOMAIN);
        hasher.update(self.borrower.as_bytes());
        hasher.update(&(self.market.as_str().len() as u64).to_le_bytes());
        hasher.update(self.market.as_str().as_bytes());
        hasher.update(&self.amount.to_le_bytes());
        hasher.update(&self.duration.to_le_bytes());
        hasher.update(&self.request_height.to_le_bytes());
        hasher.update(&self.expiration_height.to_le_bytes());
        hasher.update(&self.nonce.to_le_bytes());
        RequestHash(*hasher.finalize().as_bytes())
    }

    /// Whether responses are still accepted at `height`
    pub fn is_expired_at(&self, height: Height) -> bool {
        height > self.expiration_height
    }
}

/// Numeric terms proposed by one risk node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedTerms {
    /// Annual interest rate in basis points
    pub interest_rate: u128,
    /// Required collateral ratio in basis points
    pub collateral_ratio: u128,
    /// Maximum principal in lending-token base units
    pub max_loan_amount: u128,
}

/// Signed proposal from a risk-assessment node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeResponse {
    /// Claimed signer address
    pub signer: Address,
    /// Proposed terms
    pub terms: ProposedTerms,
    /// Hash of the request this response answers
    pub request_hash: RequestHash,
    /// Signature over [`NodeResponse::signing_payload`]
    #[serde(with = "signature_bytes")]
    pub signature: [u8; 64],
}

impl NodeResponse {
    /// Digest a node signs: request hash, proposed values and request nonce
    pub fn signing_payload(request: &LoanRequest, terms: &ProposedTerms) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(RESPONSE_DOMAIN);
        hasher.update(request.hash().as_bytes());
        hasher.update(&terms.interest_rate.to_le_bytes());
        hasher.update(&terms.collateral_ratio.to_le_bytes());
        hasher.update(&terms.max_loan_amount.to_le_bytes());
        hasher.update(&request.nonce.to_le_bytes());
        *hasher.finalize().as_bytes()
    }
}

/// Serde helper for [u8; 64] arrays
mod signature_bytes {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &[u8; 64], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        bytes.as_slice().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 64], D::Error>
    where
        D: Deserializer<'de>,
    {
        let vec: Vec<u8> = Vec::deserialize(deserializer)?;
        vec.try_into().map_err(|v: Vec<u8>| {
            serde::de::Error::custom(format!("expected 64 bytes, got {}", v.len()))
        })
    }
}
