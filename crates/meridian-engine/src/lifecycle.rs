//! Loan lifecycle
//!
//! `TermsSet -> Active -> {Closed | Liquidated}`. Every operation reads its
//! collaborators and validates everything against the current store before
//! the first write, then moves tokens and commits new values. A failing
//! operation leaves the store and balances exactly as they were.
//!
//! Token flows:
//! - lending tokens move between lenders, borrowers, liquidators and the pool
//!   address
//! - collateral is held by the collateral escrow address

use meridian_common::{
    error::{ArithmeticError, BalanceError, CollateralError, LoanStateError, TemporalError},
    math::{self, BPS_SCALE},
    Address, AssetPairConfig, Height, Loan, LoanId, LoanRequest, LoanStatus, MarketId,
    NodeResponse, ProtocolConfig, Result,
};
use meridian_consensus::{Agreement, ConsensusAggregator};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::{
    collateral::{CollateralEngine, CollateralInfo},
    ledger::{ensure_balance, TokenLedger},
    pricing::{fetch_price, PriceFeed, PriceNormalizer},
    risk::{RiskGate, RiskGovernance},
    store::{MarketRecord, ProtocolStore},
};

/// Read-only collaborators and the current height for one operation
#[derive(Clone, Copy)]
pub struct Environment<'a> {
    pub height: Height,
    pub prices: &'a dyn PriceFeed,
    pub governance: &'a dyn RiskGovernance,
}

impl<'a> Environment<'a> {
    pub fn new(height: Height, prices: &'a dyn PriceFeed, governance: &'a dyn RiskGovernance) -> Self {
        Self {
            height,
            prices,
            governance,
        }
    }

    /// Same collaborators at another height
    pub fn at(&self, height: Height) -> Self {
        Self { height, ..*self }
    }
}

/// Settlement of a liquidated loan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Liquidation {
    pub loan_id: LoanId,
    pub principal_repaid: u128,
    pub interest_repaid: u128,
    /// Collateral handed to the liquidator
    pub collateral_seized: u128,
}

/// Drives loans through their lifecycle against a [`ProtocolStore`]
#[derive(Debug)]
pub struct LoanLifecycle {
    config: ProtocolConfig,
    consensus: ConsensusAggregator,
}

impl LoanLifecycle {
    /// Lifecycle verifying node responses with Ed25519
    pub fn new(config: ProtocolConfig) -> Result<Self> {
        config.validate()?;
        let consensus = ConsensusAggregator::ed25519(config.consensus.clone());
        Ok(Self { config, consensus })
    }

    pub fn with_aggregator(config: ProtocolConfig, consensus: ConsensusAggregator) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, consensus })
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// Register a market under the configured debt-ratio ceiling
    pub fn register_market(&self, store: &mut ProtocolStore, pair: AssetPairConfig) -> Result<()> {
        store.register_market(pair, self.config.risk.max_debt_ratio_bps)
    }

    // ------------------------------------------------------------------
    // Consensus
    // ------------------------------------------------------------------

    /// Verify and hold one risk-node response
    pub fn submit_response(
        &self,
        store: &mut ProtocolStore,
        env: &Environment<'_>,
        request: &LoanRequest,
        response: NodeResponse,
    ) -> Result<usize> {
        self.consensus
            .submit_response(store.consensus_mut(), request, response, env.height)
    }

    /// Aggregate `responses` into terms and create a `TermsSet` loan
    #[instrument(skip(self, store, env, request, responses), fields(market = %request.market, height = env.height))]
    pub fn create_loan_with_terms(
        &self,
        store: &mut ProtocolStore,
        env: &Environment<'_>,
        request: &LoanRequest,
        responses: &[NodeResponse],
    ) -> Result<LoanId> {
        let agreement = self
            .consensus
            .evaluate(store.consensus(), request, responses, env.height)?;
        self.open_loan(store, env, request, agreement)
    }

    /// Create a loan from the responses submitted one by one
    #[instrument(skip(self, store, env, request), fields(market = %request.market, height = env.height))]
    pub fn create_loan_from_pending(
        &self,
        store: &mut ProtocolStore,
        env: &Environment<'_>,
        request: &LoanRequest,
    ) -> Result<LoanId> {
        let hash = request.hash();
        let agreement = self.consensus.evaluate(
            store.consensus(),
            request,
            store.consensus().pending_responses(&hash),
            env.height,
        )?;
        self.open_loan(store, env, request, agreement)
    }

    fn open_loan(
        &self,
        store: &mut ProtocolStore,
        env: &Environment<'_>,
        request: &LoanRequest,
        agreement: Agreement,
    ) -> Result<LoanId> {
        if request.amount == 0 {
            return Err(BalanceError::InvalidAmount.into());
        }
        RiskGate::admit(store, env.governance, &request.market, request.amount)?;

        let terms_expiry = env
            .height
            .checked_add(self.config.loans.terms_validity)
            .ok_or(ArithmeticError::Overflow)?;
        let id = store.next_loan_id();
        let loan = Loan {
            id,
            borrower: request.borrower,
            market: request.market.clone(),
            request_hash: agreement.request_hash,
            terms: agreement.terms,
            duration: request.duration,
            collateral: 0,
            principal_owed: 0,
            interest_owed: 0,
            borrowed_amount: 0,
            status: LoanStatus::TermsSet,
            terms_expiry,
            loan_start_height: None,
            last_collateral_in_height: None,
        };

        self.consensus.commit(store.consensus_mut(), &agreement);
        store.insert_loan(loan);
        info!(loan_id = id, borrower = %request.borrower, terms_expiry, "Loan created");
        Ok(id)
    }

    // ------------------------------------------------------------------
    // Borrower operations
    // ------------------------------------------------------------------

    /// Move collateral from the borrower into escrow
    #[instrument(skip(self, store, env, tokens), fields(height = env.height))]
    pub fn deposit_collateral(
        &self,
        store: &mut ProtocolStore,
        env: &Environment<'_>,
        tokens: &mut dyn TokenLedger,
        loan_id: LoanId,
        amount: u128,
    ) -> Result<()> {
        if amount == 0 {
            return Err(BalanceError::InvalidAmount.into());
        }
        let loan = store.loan(loan_id)?;
        loan.ensure_not_terminal()?;
        let asset = store.market(&loan.market)?.pair.collateral_asset.clone();

        let mut next = loan.clone();
        next.collateral = math::add(next.collateral, amount)?;
        next.last_collateral_in_height = Some(env.height);

        tokens.transfer(&asset, &next.borrower, &self.config.escrow_address, amount)?;
        info!(loan_id, amount, collateral = next.collateral, "Collateral deposited");
        store.put_loan(next);
        Ok(())
    }

    /// Draw `amount` of lending tokens against the agreed terms
    #[instrument(skip(self, store, env, tokens), fields(height = env.height))]
    pub fn take_out_loan(
        &self,
        store: &mut ProtocolStore,
        env: &Environment<'_>,
        tokens: &mut dyn TokenLedger,
        loan_id: LoanId,
        amount: u128,
    ) -> Result<()> {
        if amount == 0 {
            return Err(BalanceError::InvalidAmount.into());
        }
        let loan = store.loan(loan_id)?;
        loan.ensure_not_terminal()?;
        match loan.status {
            LoanStatus::TermsSet if env.height > loan.terms_expiry => {
                return Err(TemporalError::TermsExpired {
                    expiry: loan.terms_expiry,
                    current: env.height,
                }
                .into());
            }
            LoanStatus::Active if loan.is_overdue_at(env.height) => {
                return Err(TemporalError::TermsExpired {
                    expiry: loan.end_height().unwrap_or(loan.terms_expiry),
                    current: env.height,
                }
                .into());
            }
            _ => {}
        }

        let remaining = loan.remaining_capacity();
        if amount > remaining {
            return Err(LoanStateError::MaxLoanExceeded {
                requested: amount,
                remaining,
            }
            .into());
        }

        if let Some(deposited_at) = loan.last_collateral_in_height {
            let allowed_from = deposited_at.saturating_add(self.config.loans.collateral_safety_interval);
            if env.height < allowed_from {
                warn!(loan_id, deposited_at, allowed_from, "Collateral too recent");
                return Err(TemporalError::CollateralTooRecent {
                    deposited_at,
                    allowed_from,
                }
                .into());
            }
        }

        RiskGate::admit(store, env.governance, &loan.market, amount)?;

        let record = store.market(&loan.market)?;
        let mut next = loan.clone();
        let interest = self.interest_for(amount, next.terms.interest_rate(), next.duration)?;
        next.principal_owed = math::add(next.principal_owed, amount)?;
        next.interest_owed = math::add(next.interest_owed, interest)?;
        next.borrowed_amount = math::add(next.borrowed_amount, amount)?;
        next.status = LoanStatus::Active;
        next.loan_start_height.get_or_insert(env.height);

        let info = self.collateral_info_at(record, &next, env)?;
        if info.require_collateral {
            warn!(loan_id, shortfall = info.needed_in_collateral_tokens, "Insufficient collateral");
            return Err(CollateralError::InsufficientCollateral {
                shortfall: info.needed_in_collateral_tokens,
            }
            .into());
        }

        let idle = record.state.idle_liquidity()?;
        if amount > idle {
            return Err(BalanceError::InsufficientLiquidity {
                required: amount,
                available: idle,
            }
            .into());
        }
        let asset = record.pair.lending_asset.clone();
        ensure_balance(&*tokens, &asset, &self.config.pool_address, amount)?;
        let state = record.state.with_borrowed(amount)?;

        tokens.transfer(&asset, &self.config.pool_address, &next.borrower, amount)?;
        info!(loan_id, amount, interest, principal_owed = next.principal_owed, "Loan drawn");
        store.market_mut(&next.market)?.state = state;
        store.put_loan(next);
        Ok(())
    }

    /// Repay principal and interest; a fully repaid loan closes and its
    /// collateral returns to the borrower
    #[instrument(skip(self, store, env, tokens), fields(height = env.height))]
    pub fn repay(
        &self,
        store: &mut ProtocolStore,
        env: &Environment<'_>,
        tokens: &mut dyn TokenLedger,
        loan_id: LoanId,
        principal: u128,
        interest: u128,
    ) -> Result<LoanStatus> {
        let total = math::add(principal, interest)?;
        if total == 0 {
            return Err(BalanceError::InvalidAmount.into());
        }
        let loan = store.loan(loan_id)?;
        loan.ensure_active()?;
        if principal > loan.principal_owed {
            return Err(LoanStateError::RepayExceedsOwed {
                requested: principal,
                owed: loan.principal_owed,
            }
            .into());
        }
        if interest > loan.interest_owed {
            return Err(LoanStateError::RepayExceedsOwed {
                requested: interest,
                owed: loan.interest_owed,
            }
            .into());
        }

        let record = store.market(&loan.market)?;
        let lending = record.pair.lending_asset.clone();
        let collateral_asset = record.pair.collateral_asset.clone();
        ensure_balance(&*tokens, &lending, &loan.borrower, total)?;

        let mut next = loan.clone();
        next.principal_owed -= principal;
        next.interest_owed -= interest;
        let released = if next.principal_owed == 0 && next.interest_owed == 0 {
            next.status = LoanStatus::Closed;
            std::mem::take(&mut next.collateral)
        } else {
            0
        };
        if released > 0 {
            ensure_balance(&*tokens, &collateral_asset, &self.config.escrow_address, released)?;
        }

        let state = record.state.with_repaid(principal)?;
        let recognition = record.ledger.plan_recognition(interest)?;

        tokens.transfer(&lending, &next.borrower, &self.config.pool_address, total)?;
        if released > 0 {
            tokens.transfer(&collateral_asset, &self.config.escrow_address, &next.borrower, released)?;
        }

        let status = next.status;
        info!(loan_id, principal, interest, %status, released, "Loan repaid");
        let market = store.market_mut(&next.market)?;
        market.state = state;
        market.ledger.apply(recognition);
        store.put_loan(next);
        Ok(status)
    }

    /// Return collateral to the borrower while the rest still covers the debt
    #[instrument(skip(self, store, env, tokens), fields(height = env.height))]
    pub fn withdraw_collateral(
        &self,
        store: &mut ProtocolStore,
        env: &Environment<'_>,
        tokens: &mut dyn TokenLedger,
        loan_id: LoanId,
        amount: u128,
    ) -> Result<()> {
        if amount == 0 {
            return Err(BalanceError::InvalidAmount.into());
        }
        let loan = store.loan(loan_id)?;
        loan.ensure_not_terminal()?;
        if amount > loan.collateral {
            return Err(BalanceError::InsufficientBalance {
                required: amount,
                available: loan.collateral,
            }
            .into());
        }

        let record = store.market(&loan.market)?;
        let mut next = loan.clone();
        next.collateral -= amount;
        if next.total_owed()? > 0 {
            let info = self.collateral_info_at(record, &next, env)?;
            if info.require_collateral {
                warn!(loan_id, amount, "Withdrawal would leave loan undercollateralized");
                return Err(CollateralError::InsufficientCollateral {
                    shortfall: info.needed_in_collateral_tokens,
                }
                .into());
            }
        }

        let asset = record.pair.collateral_asset.clone();
        tokens.transfer(&asset, &self.config.escrow_address, &next.borrower, amount)?;
        info!(loan_id, amount, collateral = next.collateral, "Collateral withdrawn");
        store.put_loan(next);
        Ok(())
    }

    /// Settle an undercollateralized or overdue loan
    ///
    /// The liquidator pays everything owed into the pool and receives all
    /// escrowed collateral.
    #[instrument(skip(self, store, env, tokens, liquidator), fields(height = env.height, liquidator = %liquidator))]
    pub fn liquidate_loan(
        &self,
        store: &mut ProtocolStore,
        env: &Environment<'_>,
        tokens: &mut dyn TokenLedger,
        loan_id: LoanId,
        liquidator: Address,
    ) -> Result<Liquidation> {
        let loan = store.loan(loan_id)?;
        loan.ensure_active()?;
        let record = store.market(&loan.market)?;

        let liquidatable = if CollateralEngine::is_overdue(loan, env.height)? {
            true
        } else {
            let normalizer = self.normalizer_for(record, env)?;
            CollateralEngine::is_undercollateralized(loan, &normalizer)?
        };
        if !liquidatable {
            warn!(loan_id, "Loan is not liquidatable");
            return Err(CollateralError::NotLiquidatable { loan_id }.into());
        }

        let owed = loan.total_owed()?;
        let lending = record.pair.lending_asset.clone();
        let collateral_asset = record.pair.collateral_asset.clone();
        ensure_balance(&*tokens, &lending, &liquidator, owed)?;
        ensure_balance(&*tokens, &collateral_asset, &self.config.escrow_address, loan.collateral)?;

        let outcome = Liquidation {
            loan_id,
            principal_repaid: loan.principal_owed,
            interest_repaid: loan.interest_owed,
            collateral_seized: loan.collateral,
        };
        let state = record.state.with_repaid(outcome.principal_repaid)?;
        let recognition = record.ledger.plan_recognition(outcome.interest_repaid)?;

        let mut next = loan.clone();
        next.principal_owed = 0;
        next.interest_owed = 0;
        next.collateral = 0;
        next.status = LoanStatus::Liquidated;

        tokens.transfer(&lending, &liquidator, &self.config.pool_address, owed)?;
        if outcome.collateral_seized > 0 {
            tokens.transfer(
                &collateral_asset,
                &self.config.escrow_address,
                &liquidator,
                outcome.collateral_seized,
            )?;
        }

        info!(
            loan_id,
            principal = outcome.principal_repaid,
            interest = outcome.interest_repaid,
            collateral = outcome.collateral_seized,
            "Loan liquidated"
        );
        let market = store.market_mut(&next.market)?;
        market.state = state;
        market.ledger.apply(recognition);
        store.put_loan(next);
        Ok(outcome)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn get_collateral_info(
        &self,
        store: &ProtocolStore,
        env: &Environment<'_>,
        loan_id: LoanId,
    ) -> Result<CollateralInfo> {
        let loan = store.loan(loan_id)?;
        let record = store.market(&loan.market)?;
        self.collateral_info_at(record, loan, env)
    }

    /// Market debt ratio after drawing `new_amount`, in basis points
    pub fn get_debt_ratio_for(
        &self,
        store: &ProtocolStore,
        market: &MarketId,
        new_amount: u128,
    ) -> Result<u128> {
        Ok(RiskGate::debt_ratio_for(&store.market(market)?.state, new_amount)?)
    }

    // ------------------------------------------------------------------
    // Lending pool
    // ------------------------------------------------------------------

    /// Supply lending tokens and receive pool shares 1:1
    #[instrument(skip(self, store, env, tokens, lender), fields(height = env.height, lender = %lender))]
    pub fn deposit_liquidity(
        &self,
        store: &mut ProtocolStore,
        env: &Environment<'_>,
        tokens: &mut dyn TokenLedger,
        market: &MarketId,
        lender: Address,
        amount: u128,
    ) -> Result<()> {
        if amount == 0 {
            return Err(BalanceError::InvalidAmount.into());
        }
        let record = store.market(market)?;
        let asset = record.pair.lending_asset.clone();
        ensure_balance(&*tokens, &asset, &lender, amount)?;
        let mint = record.ledger.plan_mint(&lender, amount, env.height)?;
        let state = record.state.with_supplied(amount)?;

        tokens.transfer(&asset, &lender, &self.config.pool_address, amount)?;
        info!(%market, amount, total_supplied = state.total_supplied, "Liquidity deposited");
        let record = store.market_mut(market)?;
        record.state = state;
        record.ledger.apply(mint);
        Ok(())
    }

    /// Burn pool shares and take back idle liquidity
    #[instrument(skip(self, store, env, tokens, lender), fields(height = env.height, lender = %lender))]
    pub fn withdraw_liquidity(
        &self,
        store: &mut ProtocolStore,
        env: &Environment<'_>,
        tokens: &mut dyn TokenLedger,
        market: &MarketId,
        lender: Address,
        amount: u128,
    ) -> Result<()> {
        if amount == 0 {
            return Err(BalanceError::InvalidAmount.into());
        }
        let record = store.market(market)?;
        let burn = record.ledger.plan_burn(&lender, amount, env.height)?;
        let idle = record.state.idle_liquidity()?;
        if amount > idle {
            warn!(%market, amount, idle, "Withdrawal exceeds idle liquidity");
            return Err(BalanceError::InsufficientLiquidity {
                required: amount,
                available: idle,
            }
            .into());
        }
        let asset = record.pair.lending_asset.clone();
        ensure_balance(&*tokens, &asset, &self.config.pool_address, amount)?;
        let state = record.state.with_withdrawn(amount)?;

        tokens.transfer(&asset, &self.config.pool_address, &lender, amount)?;
        info!(%market, amount, total_supplied = state.total_supplied, "Liquidity withdrawn");
        let record = store.market_mut(market)?;
        record.state = state;
        record.ledger.apply(burn);
        Ok(())
    }

    /// Move pool shares between lenders
    #[instrument(skip(self, store, env, from, to), fields(height = env.height, from = %from, to = %to))]
    pub fn transfer_shares(
        &self,
        store: &mut ProtocolStore,
        env: &Environment<'_>,
        market: &MarketId,
        from: Address,
        to: Address,
        amount: u128,
    ) -> Result<()> {
        if amount == 0 {
            return Err(BalanceError::InvalidAmount.into());
        }
        let record = store.market_mut(market)?;
        let transfer = record.ledger.plan_transfer(&from, &to, amount, env.height)?;
        record.ledger.apply(transfer);
        info!(%market, amount, "Shares transferred");
        Ok(())
    }

    /// Pay out a lender's settled, unclaimed interest
    #[instrument(skip(self, store, env, tokens, lender), fields(height = env.height, lender = %lender))]
    pub fn claim_interest(
        &self,
        store: &mut ProtocolStore,
        env: &Environment<'_>,
        tokens: &mut dyn TokenLedger,
        market: &MarketId,
        lender: Address,
    ) -> Result<u128> {
        let record = store.market(market)?;
        let (claim, amount) = record.ledger.plan_claim(&lender, env.height)?;
        let asset = record.pair.lending_asset.clone();
        if amount > 0 {
            ensure_balance(&*tokens, &asset, &self.config.pool_address, amount)?;
            tokens.transfer(&asset, &self.config.pool_address, &lender, amount)?;
        }
        info!(%market, amount, "Interest claimed");
        store.market_mut(market)?.ledger.apply(claim);
        Ok(amount)
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    /// `amount * rate * duration / (10_000 * heights_per_year)`, floored
    fn interest_for(
        &self,
        amount: u128,
        rate: u128,
        duration: u64,
    ) -> std::result::Result<u128, ArithmeticError> {
        let per_year = math::mul(BPS_SCALE, u128::from(self.config.loans.heights_per_year))?;
        math::mul_div_floor(math::mul(amount, rate)?, u128::from(duration), per_year)
    }

    fn normalizer_for(&self, record: &MarketRecord, env: &Environment<'_>) -> Result<PriceNormalizer> {
        let reading = fetch_price(env.prices, &record.pair, env.height, self.config.loans.max_price_age)?;
        PriceNormalizer::new(&record.pair, &reading)
    }

    fn collateral_info_at(
        &self,
        record: &MarketRecord,
        loan: &Loan,
        env: &Environment<'_>,
    ) -> Result<CollateralInfo> {
        let normalizer = self.normalizer_for(record, env)?;
        Ok(CollateralEngine::collateral_info(loan, &normalizer)?)
    }
}
