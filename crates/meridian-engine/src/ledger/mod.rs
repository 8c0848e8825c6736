//! Balances and lender interest
//!
//! - [`balances`]: Fungible balance primitive used to move tokens
//! - [`interest`]: Per-market share balances with checkpointed interest

pub mod balances;
pub mod interest;

pub use balances::{ensure_balance, MemoryTokenLedger, TokenLedger};
pub use interest::{InterestLedger, LedgerUpdate, ACC_PRECISION};
