//! Leverage ceilings
//!
//! Two independent checks run before any new or larger draw:
//! - **Debt ratio**: a market's outstanding principal plus the new amount,
//!   over its supplied liquidity, against the market ceiling
//! - **Supply-to-debt**: the same ratio summed across every market of the
//!   market's risk group, against a ceiling from risk governance
//!
//! Both are pure reads over the store.

use std::collections::HashMap;

use meridian_common::{
    error::{ArithmeticError, RiskError},
    math::{self, BPS_SCALE},
    MarketId, MarketState, Result,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::store::ProtocolStore;

/// Ceiling keys understood by risk governance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CeilingKey {
    /// Maximum group-wide debt over supply, in basis points
    MaxSupplyToDebt,
}

/// Markets sharing one governance ceiling configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskGroup {
    pub id: String,
    pub markets: Vec<MarketId>,
}

/// External risk-governance collaborator
pub trait RiskGovernance {
    /// Risk group covering `market`, if any
    fn risk_group_for(&self, market: &MarketId) -> Option<RiskGroup>;

    /// Ceiling configured for a group
    fn ceiling(&self, group_id: &str, key: CeilingKey) -> Option<u128>;
}

/// In-memory risk governance
#[derive(Debug, Clone, Default)]
pub struct StaticRiskGovernance {
    groups: Vec<RiskGroup>,
    ceilings: HashMap<(String, CeilingKey), u128>,
}

impl StaticRiskGovernance {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a group with its supply-to-debt ceiling
    pub fn with_group(mut self, id: impl Into<String>, markets: Vec<MarketId>, max_supply_to_debt: u128) -> Self {
        let id = id.into();
        self.ceilings
            .insert((id.clone(), CeilingKey::MaxSupplyToDebt), max_supply_to_debt);
        self.groups.push(RiskGroup { id, markets });
        self
    }
}

impl RiskGovernance for StaticRiskGovernance {
    fn risk_group_for(&self, market: &MarketId) -> Option<RiskGroup> {
        self.groups
            .iter()
            .find(|g| g.markets.contains(market))
            .cloned()
    }

    fn ceiling(&self, group_id: &str, key: CeilingKey) -> Option<u128> {
        self.ceilings.get(&(group_id.to_string(), key)).copied()
    }
}

/// Outcome of an admitted draw
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiskAssessment {
    pub debt_ratio: u128,
    pub supply_to_debt: u128,
}

/// Leverage admission control
pub struct RiskGate;

impl RiskGate {
    /// `((borrowed - repaid) + new) * 10_000 / supplied`, or 0 with no supply
    pub fn debt_ratio_for(state: &MarketState, new_amount: u128) -> std::result::Result<u128, ArithmeticError> {
        Self::ratio(state.total_supplied, state.outstanding()?, new_amount)
    }

    /// Debt ratio summed over several markets
    pub fn supply_to_debt_for<'a>(
        states: impl IntoIterator<Item = &'a MarketState>,
        new_amount: u128,
    ) -> std::result::Result<u128, ArithmeticError> {
        let mut supplied = 0u128;
        let mut outstanding = 0u128;
        for state in states {
            supplied = math::add(supplied, state.total_supplied)?;
            outstanding = math::add(outstanding, state.outstanding()?)?;
        }
        Self::ratio(supplied, outstanding, new_amount)
    }

    fn ratio(supplied: u128, outstanding: u128, new_amount: u128) -> std::result::Result<u128, ArithmeticError> {
        if supplied == 0 {
            return Ok(0);
        }
        math::mul_div_floor(math::add(outstanding, new_amount)?, BPS_SCALE, supplied)
    }

    /// Run both checks for drawing `new_amount` from `market`
    pub fn admit(
        store: &ProtocolStore,
        governance: &dyn RiskGovernance,
        market: &MarketId,
        new_amount: u128,
    ) -> Result<RiskAssessment> {
        let record = store.market(market)?;

        let debt_ratio = Self::debt_ratio_for(&record.state, new_amount)?;
        if debt_ratio > record.max_debt_ratio_bps {
            warn!(%market, debt_ratio, ceiling = record.max_debt_ratio_bps, "Debt ratio exceeded");
            return Err(RiskError::DebtRatioExceeded {
                ratio: debt_ratio,
                ceiling: record.max_debt_ratio_bps,
            }
            .into());
        }

        let group = governance
            .risk_group_for(market)
            .ok_or_else(|| RiskError::RiskGroupNotFound {
                market: market.to_string(),
            })?;
        let ceiling = governance
            .ceiling(&group.id, CeilingKey::MaxSupplyToDebt)
            .ok_or_else(|| RiskError::RiskGroupNotFound {
                market: market.to_string(),
            })?;

        let states = group
            .markets
            .iter()
            .filter_map(|id| store.market(id).ok())
            .map(|r| &r.state);
        let supply_to_debt = Self::supply_to_debt_for(states, new_amount)?;
        if supply_to_debt > ceiling {
            warn!(%market, group = %group.id, supply_to_debt, ceiling, "Supply-to-debt exceeded");
            return Err(RiskError::SupplyToDebtExceeded {
                ratio: supply_to_debt,
                ceiling,
            }
            .into());
        }

        debug!(%market, debt_ratio, supply_to_debt, "Risk gate passed");
        Ok(RiskAssessment {
            debt_ratio,
            supply_to_debt,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_common::{AssetId, AssetPairConfig};

    fn state(supplied: u128, borrowed: u128, repaid: u128) -> MarketState {
        MarketState {
            total_supplied: supplied,
            total_borrowed: borrowed,
            total_repaid: repaid,
        }
    }

    fn pair(market: &str) -> AssetPairConfig {
        AssetPairConfig {
            market: MarketId::new(market),
            lending_asset: AssetId::new("USDC"),
            collateral_asset: AssetId::new(market),
            feed: market.to_string(),
            feed_decimals: 8,
            lending_decimals: 6,
            collateral_decimals: 18,
            inverted: true,
        }
    }

    #[test]
    fn test_debt_ratio() {
        assert_eq!(RiskGate::debt_ratio_for(&state(2_000, 500, 100), 500).unwrap(), 4_500);
        assert_eq!(RiskGate::debt_ratio_for(&state(0, 500, 100), 500).unwrap(), 0);
        assert_eq!(RiskGate::debt_ratio_for(&state(0, 0, 0), u128::MAX).unwrap(), 0);
    }

    #[test]
    fn test_supply_to_debt_sums_markets() {
        let a = state(1_000, 500, 0);
        let b = state(3_000, 500, 0);
        assert_eq!(RiskGate::supply_to_debt_for([&a, &b], 1_000).unwrap(), 5_000);
    }

    #[test]
    fn test_admit_checks_both_ceilings() {
        let eth = MarketId::new("USDC/ETH");
        let btc = MarketId::new("USDC/BTC");
        let mut store = ProtocolStore::new();
        store.register_market(pair("USDC/ETH"), 5_000).unwrap();
        store.register_market(pair("USDC/BTC"), 9_000).unwrap();
        store.market_mut(&eth).unwrap().state = state(2_000, 500, 100);
        store.market_mut(&btc).unwrap().state = state(6_000, 1_700, 0);

        let governance = StaticRiskGovernance::new().with_group("blue-chip", vec![eth.clone(), btc.clone()], 3_000);

        let ok = RiskGate::admit(&store, &governance, &eth, 100).unwrap();
        assert_eq!(ok.debt_ratio, 2_500);
        assert_eq!(ok.supply_to_debt, 2_750);

        let err = RiskGate::admit(&store, &governance, &eth, 700).unwrap_err();
        assert_eq!(err.code(), "DEBT_RATIO_EXCEEDED");

        let err = RiskGate::admit(&store, &governance, &btc, 500).unwrap_err();
        assert_eq!(err.code(), "SUPPLY_TO_DEBT_EXCEEDED");

        let err = RiskGate::admit(&store, &StaticRiskGovernance::new(), &eth, 1).unwrap_err();
        assert_eq!(err.code(), "RISK_GROUP_NOT_FOUND");
    }
}
