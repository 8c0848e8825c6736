//! Protocol store
//!
//! All mutable protocol state lives in one explicit value: markets with their
//! lending pools, loans, and consensus bookkeeping. Operations receive it by
//! reference; there is no global state.

use std::collections::{BTreeMap, HashMap};

use meridian_common::{
    error::LoanStateError, AssetPairConfig, Loan, LoanId, MarketId, MarketState, ProtocolError,
    Result,
};
use meridian_consensus::ConsensusState;
use tracing::info;

use crate::ledger::InterestLedger;

/// One market: its asset pair, supply and debt totals, and lending pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketRecord {
    pub pair: AssetPairConfig,
    pub state: MarketState,
    pub ledger: InterestLedger,
    /// Market debt-ratio ceiling in basis points
    pub max_debt_ratio_bps: u128,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtocolStore {
    markets: HashMap<MarketId, MarketRecord>,
    loans: BTreeMap<LoanId, Loan>,
    next_loan_id: LoanId,
    consensus: ConsensusState,
}

impl ProtocolStore {
    pub fn new() -> Self {
        Self {
            next_loan_id: 1,
            ..Self::default()
        }
    }

    /// Register a market with an empty pool
    pub fn register_market(&mut self, pair: AssetPairConfig, max_debt_ratio_bps: u128) -> Result<()> {
        if self.markets.contains_key(&pair.market) {
            return Err(ProtocolError::Config(format!(
                "market {} already registered",
                pair.market
            )));
        }
        info!(market = %pair.market, max_debt_ratio_bps, "Market registered");
        self.markets.insert(
            pair.market.clone(),
            MarketRecord {
                pair,
                state: MarketState::default(),
                ledger: InterestLedger::new(),
                max_debt_ratio_bps,
            },
        );
        Ok(())
    }

    pub fn market(&self, id: &MarketId) -> Result<&MarketRecord> {
        self.markets
            .get(id)
            .ok_or_else(|| ProtocolError::NotFound(format!("market {}", id)))
    }

    pub fn market_mut(&mut self, id: &MarketId) -> Result<&mut MarketRecord> {
        self.markets
            .get_mut(id)
            .ok_or_else(|| ProtocolError::NotFound(format!("market {}", id)))
    }

    pub fn markets(&self) -> impl Iterator<Item = &MarketRecord> {
        self.markets.values()
    }

    pub fn loan(&self, id: LoanId) -> Result<&Loan> {
        self.loans
            .get(&id)
            .ok_or_else(|| LoanStateError::NotFound { loan_id: id }.into())
    }

    pub fn loans(&self) -> impl Iterator<Item = &Loan> {
        self.loans.values()
    }

    /// Identifier the next inserted loan will receive
    pub fn next_loan_id(&self) -> LoanId {
        self.next_loan_id
    }

    /// Insert a new loan under [`Self::next_loan_id`]
    pub(crate) fn insert_loan(&mut self, loan: Loan) -> LoanId {
        let id = loan.id;
        self.loans.insert(id, loan);
        self.next_loan_id = id + 1;
        id
    }

    /// Replace a loan with its updated value
    pub(crate) fn put_loan(&mut self, loan: Loan) {
        self.loans.insert(loan.id, loan);
    }

    pub fn consensus(&self) -> &ConsensusState {
        &self.consensus
    }

    pub(crate) fn consensus_mut(&mut self) -> &mut ConsensusState {
        &mut self.consensus
    }
}
