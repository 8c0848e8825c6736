//! Cryptographic primitives for Meridian
//!
//! - [`signature`]: Signature-scheme capability used to authenticate risk-node responses

pub mod signature;

pub use signature::{address_of, sign_payload, Ed25519Scheme, SignatureScheme};
