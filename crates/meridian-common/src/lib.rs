//! # Meridian Common
//!
//! Shared types, errors, fixed-point math and signature schemes for the
//! Meridian lending core.
//!
//! ## Core Types
//!
//! - [`LoanRequest`]/[`NodeResponse`]: Borrower request and signed risk-node proposals
//! - [`LoanTerms`]: Immutable terms agreed by consensus
//! - [`Loan`]: Per-loan balances and lifecycle status
//! - [`MarketState`]: Supply and debt totals for a market
//! - [`LenderAccount`]: Share balance with interest checkpoint
//! - [`AssetPairConfig`]/[`PriceReading`]: Precision and price-feed data
//!
//! ## Crypto
//!
//! - [`crypto::signature`]: Signature-scheme capability (Ed25519)

pub mod config;
pub mod crypto;
pub mod error;
pub mod math;
pub mod types;

// Re-export commonly used types at crate root
pub use config::ProtocolConfig;
pub use error::{ProtocolError, Result};
pub use types::{
    ids::{Address, AssetId, Height, LoanId, MarketId, RequestHash},
    lender::LenderAccount,
    loan::{Loan, LoanStatus, LoanTerms},
    market::{AssetPairConfig, MarketState, PriceReading},
    request::{LoanRequest, NodeResponse, ProposedTerms},
};

/// Meridian version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default minimum number of distinct risk-node signers
pub const DEFAULT_MIN_RESPONSES: usize = 3;

/// Default consensus tolerance (20% of the field average)
pub const DEFAULT_TOLERANCE_BPS: u32 = 2_000;

/// Default market debt-ratio ceiling (90%)
pub const DEFAULT_MAX_DEBT_RATIO_BPS: u128 = 9_000;

/// Default heights per year (5-second heights)
pub const DEFAULT_HEIGHTS_PER_YEAR: u64 = 6_307_200;
