//! Integration Tests for the Meridian lending core
//!
//! Full loan lifecycles against in-memory collaborators:
//! - Consensus -> loan creation -> collateral -> draw -> repay -> close
//! - Atomicity of rejected operations
//! - Liquidation on price drop and on expiry
//! - Lending pool interest distribution

use ed25519_dalek::SigningKey;
use meridian_common::{
    config::{ConsensusSettings, LoanSettings},
    crypto::{address_of, sign_payload},
    Address, AssetId, AssetPairConfig, Height, LoanId, LoanRequest, LoanStatus, MarketId,
    NodeResponse, PriceReading, ProposedTerms, ProtocolConfig, Result,
};
use meridian_engine::{
    Environment, Liquidation, LoanLifecycle, MemoryTokenLedger, ProtocolStore, StaticPriceFeed,
    StaticRiskGovernance, TokenLedger,
};
use rand::rngs::OsRng;
use tracing_subscriber::EnvFilter;

const USDC: u128 = 1_000_000;
const ETH: u128 = 1_000_000_000_000_000_000;
const FEED: &str = "ETH-USDC";

const BORROWER: Address = Address::new([0xb0; 32]);
const ALICE: Address = Address::new([0x11; 32]);
const BOB: Address = Address::new([0x22; 32]);
const CAROL: Address = Address::new([0x33; 32]);
const LIQUIDATOR: Address = Address::new([0x77; 32]);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn usdc() -> AssetId {
    AssetId::new("USDC")
}

fn eth() -> AssetId {
    AssetId::new("ETH")
}

fn market() -> MarketId {
    MarketId::new("USDC/ETH")
}

/// Test harness: a lifecycle, its store and in-memory collaborators
struct TestHarness {
    keys: Vec<SigningKey>,
    lifecycle: LoanLifecycle,
    store: ProtocolStore,
    tokens: MemoryTokenLedger,
    prices: StaticPriceFeed,
    governance: StaticRiskGovernance,
}

impl TestHarness {
    fn new() -> Self {
        init_tracing();
        let keys: Vec<SigningKey> = (0..3).map(|_| SigningKey::generate(&mut OsRng)).collect();
        let config = ProtocolConfig {
            consensus: ConsensusSettings {
                min_responses: 3,
                tolerance_bps: 2_000,
                authorized_signers: keys.iter().map(address_of).collect(),
            },
            loans: LoanSettings {
                heights_per_year: 1_000,
                terms_validity: 100,
                collateral_safety_interval: 5,
                max_price_age: 50,
            },
            ..ProtocolConfig::default()
        };
        let lifecycle = LoanLifecycle::new(config).unwrap();

        let mut store = ProtocolStore::new();
        lifecycle
            .register_market(
                &mut store,
                AssetPairConfig {
                    market: market(),
                    lending_asset: usdc(),
                    collateral_asset: eth(),
                    feed: FEED.to_string(),
                    feed_decimals: 8,
                    lending_decimals: 6,
                    collateral_decimals: 18,
                    inverted: true,
                },
            )
            .unwrap();

        let mut tokens = MemoryTokenLedger::new();
        tokens.mint(&usdc(), &ALICE, 10_000 * USDC).unwrap();
        tokens.mint(&usdc(), &BOB, 10_000 * USDC).unwrap();
        tokens.mint(&usdc(), &BORROWER, 100 * USDC).unwrap();
        tokens.mint(&usdc(), &LIQUIDATOR, 2_000 * USDC).unwrap();
        tokens.mint(&eth(), &BORROWER, 10 * ETH).unwrap();

        let mut harness = Self {
            keys,
            lifecycle,
            store,
            tokens,
            prices: StaticPriceFeed::new(),
            governance: StaticRiskGovernance::new().with_group("majors", vec![market()], 9_000),
        };
        harness.set_price(2_000, 0);
        harness
    }

    fn set_price(&mut self, usdc_per_eth: u128, height: Height) {
        self.prices.set(
            FEED,
            PriceReading {
                value: usdc_per_eth * 100_000_000,
                decimals: 8,
                updated_at_height: height,
            },
        );
    }

    fn pool(&self) -> Address {
        self.lifecycle.config().pool_address
    }

    fn escrow(&self) -> Address {
        self.lifecycle.config().escrow_address
    }

    fn balance(&self, asset: &AssetId, holder: &Address) -> u128 {
        self.tokens.balance_of(asset, holder)
    }

    fn snapshot(&self) -> (ProtocolStore, MemoryTokenLedger) {
        (self.store.clone(), self.tokens.clone())
    }

    fn request(&self, amount: u128, nonce: u64) -> LoanRequest {
        LoanRequest {
            borrower: BORROWER,
            market: market(),
            amount,
            duration: 500,
            request_height: 1,
            expiration_height: 100,
            nonce,
        }
    }

    fn respond(&self, node: usize, request: &LoanRequest, rate: u128) -> NodeResponse {
        let terms = ProposedTerms {
            interest_rate: rate,
            collateral_ratio: 15_000,
            max_loan_amount: 2_000 * USDC,
        };
        let key = &self.keys[node];
        NodeResponse {
            signer: address_of(key),
            terms,
            request_hash: request.hash(),
            signature: sign_payload(key, &NodeResponse::signing_payload(request, &terms)),
        }
    }

    fn responses(&self, request: &LoanRequest, rates: [u128; 3]) -> Vec<NodeResponse> {
        rates
            .iter()
            .enumerate()
            .map(|(node, rate)| self.respond(node, request, *rate))
            .collect()
    }

    fn create(&mut self, height: Height, request: &LoanRequest, responses: &[NodeResponse]) -> Result<LoanId> {
        let env = Environment::new(height, &self.prices, &self.governance);
        self.lifecycle
            .create_loan_with_terms(&mut self.store, &env, request, responses)
    }

    fn submit(&mut self, height: Height, request: &LoanRequest, response: NodeResponse) -> Result<usize> {
        let env = Environment::new(height, &self.prices, &self.governance);
        self.lifecycle
            .submit_response(&mut self.store, &env, request, response)
    }

    fn create_from_pending(&mut self, height: Height, request: &LoanRequest) -> Result<LoanId> {
        let env = Environment::new(height, &self.prices, &self.governance);
        self.lifecycle
            .create_loan_from_pending(&mut self.store, &env, request)
    }

    fn supply(&mut self, height: Height, lender: Address, amount: u128) -> Result<()> {
        let env = Environment::new(height, &self.prices, &self.governance);
        self.lifecycle
            .deposit_liquidity(&mut self.store, &env, &mut self.tokens, &market(), lender, amount)
    }

    fn withdraw_supply(&mut self, height: Height, lender: Address, amount: u128) -> Result<()> {
        let env = Environment::new(height, &self.prices, &self.governance);
        self.lifecycle
            .withdraw_liquidity(&mut self.store, &env, &mut self.tokens, &market(), lender, amount)
    }

    fn transfer_shares(&mut self, height: Height, from: Address, to: Address, amount: u128) -> Result<()> {
        let env = Environment::new(height, &self.prices, &self.governance);
        self.lifecycle
            .transfer_shares(&mut self.store, &env, &market(), from, to, amount)
    }

    fn claim(&mut self, height: Height, lender: Address) -> Result<u128> {
        let env = Environment::new(height, &self.prices, &self.governance);
        self.lifecycle
            .claim_interest(&mut self.store, &env, &mut self.tokens, &market(), lender)
    }

    fn deposit(&mut self, height: Height, loan: LoanId, amount: u128) -> Result<()> {
        let env = Environment::new(height, &self.prices, &self.governance);
        self.lifecycle
            .deposit_collateral(&mut self.store, &env, &mut self.tokens, loan, amount)
    }

    fn draw(&mut self, height: Height, loan: LoanId, amount: u128) -> Result<()> {
        let env = Environment::new(height, &self.prices, &self.governance);
        self.lifecycle
            .take_out_loan(&mut self.store, &env, &mut self.tokens, loan, amount)
    }

    fn repay(&mut self, height: Height, loan: LoanId, principal: u128, interest: u128) -> Result<LoanStatus> {
        let env = Environment::new(height, &self.prices, &self.governance);
        self.lifecycle
            .repay(&mut self.store, &env, &mut self.tokens, loan, principal, interest)
    }

    fn withdraw(&mut self, height: Height, loan: LoanId, amount: u128) -> Result<()> {
        let env = Environment::new(height, &self.prices, &self.governance);
        self.lifecycle
            .withdraw_collateral(&mut self.store, &env, &mut self.tokens, loan, amount)
    }

    fn liquidate(&mut self, height: Height, loan: LoanId) -> Result<Liquidation> {
        let env = Environment::new(height, &self.prices, &self.governance);
        self.lifecycle
            .liquidate_loan(&mut self.store, &env, &mut self.tokens, loan, LIQUIDATOR)
    }

    /// Both lenders supply, a loan is agreed at height 10, collateralized
    /// with 1 ETH at height 11 and 1000 USDC is drawn at height 16
    fn funded_loan(&mut self) -> LoanId {
        self.supply(1, ALICE, 10_000 * USDC).unwrap();
        self.supply(1, BOB, 10_000 * USDC).unwrap();
        let request = self.request(1_000 * USDC, 1);
        let responses = self.responses(&request, [1_000, 1_000, 1_000]);
        let loan = self.create(10, &request, &responses).unwrap();
        self.deposit(11, loan, ETH).unwrap();
        self.draw(16, loan, 1_000 * USDC).unwrap();
        loan
    }
}

#[cfg(test)]
mod lifecycle_tests {
    use super::*;

    #[test]
    fn test_full_lifecycle_closes_loan() {
        let mut h = TestHarness::new();
        let loan = h.funded_loan();

        let drawn = h.store.loan(loan).unwrap().clone();
        assert_eq!(drawn.status, LoanStatus::Active);
        assert_eq!(drawn.terms.interest_rate(), 1_000);
        assert_eq!(drawn.terms_expiry, 110);
        assert_eq!(drawn.principal_owed, 1_000 * USDC);
        // 10% a year for 500 of 1000 heights
        assert_eq!(drawn.interest_owed, 50 * USDC);
        assert_eq!(drawn.loan_start_height, Some(16));
        assert_eq!(h.balance(&usdc(), &BORROWER), 1_100 * USDC);
        assert_eq!(h.balance(&eth(), &h.escrow()), ETH);

        assert_eq!(h.repay(20, loan, 400 * USDC, 50 * USDC).unwrap(), LoanStatus::Active);
        assert_eq!(h.repay(25, loan, 600 * USDC, 0).unwrap(), LoanStatus::Closed);

        let closed = h.store.loan(loan).unwrap();
        assert_eq!(closed.collateral, 0);
        assert_eq!(closed.total_owed().unwrap(), 0);
        assert_eq!(h.balance(&eth(), &BORROWER), 10 * ETH);
        assert_eq!(h.balance(&eth(), &h.escrow()), 0);

        let state = &h.store.market(&market()).unwrap().state;
        assert_eq!(state.total_supplied, 20_000 * USDC);
        assert_eq!(state.outstanding().unwrap(), 0);
        assert_eq!(h.balance(&usdc(), &h.pool()), 20_050 * USDC);

        // Each lender holds half the shares
        assert_eq!(h.claim(30, ALICE).unwrap(), 25 * USDC);
        assert_eq!(h.claim(30, BOB).unwrap(), 25 * USDC);
        assert_eq!(h.balance(&usdc(), &h.pool()), 20_000 * USDC);

        let err = h.repay(31, loan, 1, 0).unwrap_err();
        assert_eq!(err.code(), "ALREADY_TERMINAL");
    }

    #[test]
    fn test_loan_from_submitted_responses() {
        let mut h = TestHarness::new();
        h.supply(1, ALICE, 10_000 * USDC).unwrap();
        let request = h.request(1_000 * USDC, 1);

        for node in 0..3 {
            let response = h.respond(node, &request, 1_000 + node as u128 * 100);
            assert_eq!(h.submit(5, &request, response).unwrap(), node + 1);
        }
        let again = h.respond(0, &request, 1_000);
        assert_eq!(h.submit(6, &request, again).unwrap_err().code(), "DUPLICATE_SIGNER");

        let loan = h.create_from_pending(10, &request).unwrap();
        assert_eq!(h.store.loan(loan).unwrap().terms.interest_rate(), 1_100);
        assert_eq!(h.store.loan(loan).unwrap().status, LoanStatus::TermsSet);
        assert_eq!(h.store.consensus().pending_count(&request.hash()), 0);
        assert!(h.store.consensus().is_processed(&request.hash()));

        let err = h.create_from_pending(11, &request).unwrap_err();
        assert_eq!(err.code(), "REQUEST_REPLAYED");
    }

    #[test]
    fn test_expired_request_rejected() {
        let mut h = TestHarness::new();
        h.supply(1, ALICE, 10_000 * USDC).unwrap();
        let request = h.request(1_000 * USDC, 1);
        let responses = h.responses(&request, [1_000, 1_000, 1_000]);
        assert_eq!(h.create(101, &request, &responses).unwrap_err().code(), "REQUEST_EXPIRED");
    }

    #[test]
    fn test_draw_limits() {
        let mut h = TestHarness::new();
        let loan = h.funded_loan();

        let err = h.draw(20, loan, 1_001 * USDC).unwrap_err();
        assert_eq!(err.code(), "MAX_LOAN_EXCEEDED");

        h.deposit(30, loan, ETH).unwrap();
        let err = h.draw(32, loan, 100 * USDC).unwrap_err();
        assert_eq!(err.code(), "COLLATERAL_TOO_RECENT");
        h.draw(35, loan, 100 * USDC).unwrap();
        assert_eq!(h.store.loan(loan).unwrap().borrowed_amount, 1_100 * USDC);
    }

    #[test]
    fn test_terms_expire_before_first_draw() {
        let mut h = TestHarness::new();
        h.supply(1, ALICE, 10_000 * USDC).unwrap();
        let request = h.request(1_000 * USDC, 1);
        let responses = h.responses(&request, [1_000, 1_000, 1_000]);
        let loan = h.create(10, &request, &responses).unwrap();
        h.deposit(11, loan, ETH).unwrap();
        h.set_price(2_000, 100);

        let err = h.draw(111, loan, 100 * USDC).unwrap_err();
        assert_eq!(err.code(), "TERMS_EXPIRED");
        h.draw(110, loan, 100 * USDC).unwrap();
    }

    #[test]
    fn test_stale_price_blocks_draw() {
        let mut h = TestHarness::new();
        h.supply(1, ALICE, 10_000 * USDC).unwrap();
        let request = h.request(1_000 * USDC, 1);
        let responses = h.responses(&request, [1_000, 1_000, 1_000]);
        let loan = h.create(10, &request, &responses).unwrap();
        h.deposit(11, loan, ETH).unwrap();

        let before = h.snapshot();
        assert_eq!(h.draw(60, loan, 100 * USDC).unwrap_err().code(), "ORACLE_UNAVAILABLE");
        assert_eq!(h.snapshot(), before);
    }

    #[test]
    fn test_collateral_withdrawal_keeps_ratio() {
        let mut h = TestHarness::new();
        let loan = h.funded_loan();

        // 0.75 ETH = 1500 USDC against 1575 required
        let err = h.withdraw(20, loan, ETH / 4).unwrap_err();
        assert_eq!(err.code(), "INSUFFICIENT_COLLATERAL");

        h.withdraw(20, loan, ETH / 5).unwrap();
        assert_eq!(h.store.loan(loan).unwrap().collateral, 4 * ETH / 5);
        assert_eq!(h.balance(&eth(), &BORROWER), 9 * ETH + ETH / 5);
    }
}

#[cfg(test)]
mod atomicity_tests {
    use super::*;

    #[test]
    fn test_risk_gate_rejection_changes_nothing() {
        let mut h = TestHarness::new();
        h.supply(1, ALICE, 1_000 * USDC).unwrap();
        let request = h.request(950 * USDC, 1);
        let responses = h.responses(&request, [1_000, 1_000, 1_000]);

        let before = h.snapshot();
        let err = h.create(10, &request, &responses).unwrap_err();
        assert_eq!(err.code(), "DEBT_RATIO_EXCEEDED");
        assert_eq!(h.snapshot(), before);
        assert!(!h.store.consensus().is_processed(&request.hash()));

        // Nothing was consumed, so the same responses still agree
        h.supply(2, BOB, 10_000 * USDC).unwrap();
        assert!(h.create(10, &request, &responses).is_ok());
    }

    #[test]
    fn test_missing_risk_group_rejects() {
        let mut h = TestHarness::new();
        h.governance = StaticRiskGovernance::new();
        h.supply(1, ALICE, 1_000 * USDC).unwrap();
        let request = h.request(100 * USDC, 1);
        let responses = h.responses(&request, [1_000, 1_000, 1_000]);
        assert_eq!(h.create(10, &request, &responses).unwrap_err().code(), "RISK_GROUP_NOT_FOUND");
    }

    #[test]
    fn test_divergent_consensus_changes_nothing() {
        let mut h = TestHarness::new();
        h.supply(1, ALICE, 10_000 * USDC).unwrap();
        let request = h.request(1_000 * USDC, 1);
        let responses = h.responses(&request, [1_000, 1_000, 2_000]);

        let before = h.snapshot();
        let err = h.create(10, &request, &responses).unwrap_err();
        assert_eq!(err.code(), "RESPONSES_DIVERGED");
        assert_eq!(h.snapshot(), before);
        assert_eq!(h.store.loans().count(), 0);
    }

    #[test]
    fn test_insufficient_collateral_changes_nothing() {
        let mut h = TestHarness::new();
        h.supply(1, ALICE, 10_000 * USDC).unwrap();
        let request = h.request(1_000 * USDC, 1);
        let responses = h.responses(&request, [1_000, 1_000, 1_000]);
        let loan = h.create(10, &request, &responses).unwrap();
        h.deposit(11, loan, ETH / 2).unwrap();

        let before = h.snapshot();
        let err = h.draw(16, loan, 1_000 * USDC).unwrap_err();
        assert_eq!(err.code(), "INSUFFICIENT_COLLATERAL");
        assert_eq!(h.snapshot(), before);
        assert_eq!(h.store.loan(loan).unwrap().status, LoanStatus::TermsSet);
    }

    #[test]
    fn test_liquidity_withdrawal_bounded_by_idle_supply() {
        let mut h = TestHarness::new();
        h.funded_loan();

        h.withdraw_supply(20, ALICE, 10_000 * USDC).unwrap();
        let before = h.snapshot();
        let err = h.withdraw_supply(21, BOB, 10_000 * USDC).unwrap_err();
        assert_eq!(err.code(), "INSUFFICIENT_LIQUIDITY");
        assert_eq!(h.snapshot(), before);

        h.withdraw_supply(21, BOB, 9_000 * USDC).unwrap();
        assert_eq!(h.balance(&usdc(), &BOB), 9_000 * USDC);
    }
}

#[cfg(test)]
mod liquidation_tests {
    use super::*;

    #[test]
    fn test_liquidation_after_price_drop() {
        let mut h = TestHarness::new();
        let loan = h.funded_loan();

        assert_eq!(h.liquidate(20, loan).unwrap_err().code(), "NOT_LIQUIDATABLE");

        // 1 ETH now covers 1000 USDC against 1050 owed
        h.set_price(1_000, 21);
        let outcome = h.liquidate(22, loan).unwrap();
        assert_eq!(outcome.principal_repaid, 1_000 * USDC);
        assert_eq!(outcome.interest_repaid, 50 * USDC);
        assert_eq!(outcome.collateral_seized, ETH);

        let liquidated = h.store.loan(loan).unwrap();
        assert_eq!(liquidated.status, LoanStatus::Liquidated);
        assert_eq!(liquidated.total_owed().unwrap(), 0);
        assert_eq!(h.balance(&usdc(), &LIQUIDATOR), 950 * USDC);
        assert_eq!(h.balance(&eth(), &LIQUIDATOR), ETH);

        let record = h.store.market(&market()).unwrap();
        assert_eq!(record.state.outstanding().unwrap(), 0);
        assert_eq!(record.ledger.total_recognized(), 50 * USDC);

        assert_eq!(h.liquidate(23, loan).unwrap_err().code(), "ALREADY_TERMINAL");
    }

    #[test]
    fn test_overdue_loan_is_liquidatable() {
        let mut h = TestHarness::new();
        let loan = h.funded_loan();

        // Started at 16 with a duration of 500
        h.set_price(2_000, 516);
        assert_eq!(h.liquidate(516, loan).unwrap_err().code(), "NOT_LIQUIDATABLE");
        assert_eq!(h.draw(517, loan, USDC).unwrap_err().code(), "TERMS_EXPIRED");
        assert!(h.liquidate(517, loan).is_ok());
    }

    #[test]
    fn test_overdue_loan_liquidates_without_fresh_price() {
        let mut h = TestHarness::new();
        let loan = h.funded_loan();

        // The only reading is from height 0, far past max_price_age at 600
        assert_eq!(h.withdraw(600, loan, 1).unwrap_err().code(), "ORACLE_UNAVAILABLE");
        let outcome = h.liquidate(600, loan).unwrap();
        assert_eq!(outcome.principal_repaid, 1_000 * USDC);
        assert_eq!(outcome.collateral_seized, ETH);
        assert_eq!(h.store.loan(loan).unwrap().status, LoanStatus::Liquidated);

        // A loan that is neither overdue nor priceable still cannot be liquidated
        let mut fresh = TestHarness::new();
        let other = fresh.funded_loan();
        let before = fresh.snapshot();
        assert_eq!(fresh.liquidate(100, other).unwrap_err().code(), "ORACLE_UNAVAILABLE");
        assert_eq!(fresh.snapshot(), before);
    }

    #[test]
    fn test_terms_set_loan_cannot_be_liquidated() {
        let mut h = TestHarness::new();
        h.supply(1, ALICE, 10_000 * USDC).unwrap();
        let request = h.request(1_000 * USDC, 1);
        let responses = h.responses(&request, [1_000, 1_000, 1_000]);
        let loan = h.create(10, &request, &responses).unwrap();
        assert_eq!(h.liquidate(11, loan).unwrap_err().code(), "LOAN_NOT_ACTIVE");
    }
}

#[cfg(test)]
mod pool_tests {
    use super::*;

    #[test]
    fn test_interest_follows_share_transfers() {
        let mut h = TestHarness::new();
        let loan = h.funded_loan();

        h.transfer_shares(18, ALICE, CAROL, 5_000 * USDC).unwrap();
        h.repay(20, loan, 0, 50 * USDC).unwrap();

        let alice = h.claim(21, ALICE).unwrap();
        let bob = h.claim(21, BOB).unwrap();
        let carol = h.claim(21, CAROL).unwrap();
        assert_eq!((alice, bob, carol), (25 * USDC / 2, 25 * USDC, 25 * USDC / 2));
        assert_eq!(alice + bob + carol, 50 * USDC);

        let ledger = &h.store.market(&market()).unwrap().ledger;
        let claimed: u128 = ledger.accounts().map(|(_, a)| a.claimed_interest).sum();
        assert_eq!(claimed, ledger.total_recognized());
    }

    #[test]
    fn test_stranger_claim_leaves_store_unchanged() {
        let mut h = TestHarness::new();
        let loan = h.funded_loan();
        h.repay(20, loan, 0, 50 * USDC).unwrap();

        let before = h.snapshot();
        assert_eq!(h.claim(21, CAROL).unwrap(), 0);
        assert_eq!(h.snapshot(), before);
        assert!(h.store.market(&market()).unwrap().ledger.account(&CAROL).is_none());
    }

    #[test]
    fn test_full_exit_after_income() {
        let mut h = TestHarness::new();
        let loan = h.funded_loan();
        h.transfer_shares(17, BOB, ALICE, 10_000 * USDC).unwrap();
        h.repay(20, loan, 1_000 * USDC, 50 * USDC).unwrap();

        // Alice exits completely before any further income
        h.withdraw_supply(21, ALICE, 20_000 * USDC).unwrap();
        assert_eq!(h.claim(22, ALICE).unwrap(), 50 * USDC);

        let record = h.store.market(&market()).unwrap();
        assert_eq!(record.ledger.total_shares(), 0);
        assert_eq!(record.state.total_supplied, 0);
        assert_eq!(h.claim(22, BOB).unwrap(), 0);
    }
}
