//! # Meridian Consensus
//!
//! Turns independently signed risk-node proposals into one agreed set of
//! loan terms.
//!
//! ## Components
//!
//! - **Verification**: signature, expiry and signer-authorization checks
//! - **Aggregation**: tolerance-bounded floor averaging, all-or-nothing
//!
//! ```text
//! LoanRequest + NodeResponse[] ──► SignatureVerifier ──► ConsensusAggregator ──► LoanTerms
//! ```

pub mod aggregator;
pub mod verifier;

pub use aggregator::{Agreement, ConsensusAggregator, ConsensusState};
pub use verifier::SignatureVerifier;
