//! # Meridian Engine
//!
//! Valuation, admission control and accounting for the Meridian lending core.
//!
//! ## Components
//!
//! - [`pricing`]: Price-feed reads and decimal normalization between assets
//! - [`collateral`]: Collateral sufficiency and liquidation eligibility
//! - [`risk`]: Debt-ratio and supply-to-debt ceilings
//! - [`ledger`]: Token balances and checkpointed lender interest
//! - [`store`]: Explicit protocol state
//! - [`lifecycle`]: Loan state machine and lending pool operations
//!
//! ## Execution Model
//!
//! Operations run one at a time against a [`ProtocolStore`] passed by
//! reference. Each one either commits all of its changes or none.

pub mod collateral;
pub mod ledger;
pub mod lifecycle;
pub mod pricing;
pub mod risk;
pub mod store;

pub use collateral::{CollateralEngine, CollateralInfo};
pub use ledger::{InterestLedger, LedgerUpdate, MemoryTokenLedger, TokenLedger};
pub use lifecycle::{Environment, Liquidation, LoanLifecycle};
pub use pricing::{fetch_price, PriceFeed, PriceNormalizer, StaticPriceFeed};
pub use risk::{CeilingKey, RiskGate, RiskGovernance, RiskGroup, StaticRiskGovernance};
pub use store::{MarketRecord, ProtocolStore};
