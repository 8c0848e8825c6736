//! Market accounting, asset-pair configuration and price readings

use serde::{Deserialize, Serialize};

use super::ids::{AssetId, Height, MarketId};
use crate::error::ArithmeticError;
use crate::math;

/// Aggregate supply and debt for one market
///
/// `total_borrowed - total_repaid` is never negative.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketState {
    pub total_supplied: u128,
    pub total_borrowed: u128,
    pub total_repaid: u128,
}

impl MarketState {
    /// Principal currently lent out
    pub fn outstanding(&self) -> Result<u128, ArithmeticError> {
        math::sub(self.total_borrowed, self.total_repaid)
    }

    /// Supplied liquidity not currently lent out
    pub fn idle_liquidity(&self) -> Result<u128, ArithmeticError> {
        math::sub(self.total_supplied, self.outstanding()?)
    }

    /// State after supplying `amount`
    pub fn with_supplied(&self, amount: u128) -> Result<Self, ArithmeticError> {
        Ok(Self {
            total_supplied: math::add(self.total_supplied, amount)?,
            ..self.clone()
        })
    }

    /// State after withdrawing `amount` of supply
    pub fn with_withdrawn(&self, amount: u128) -> Result<Self, ArithmeticError> {
        Ok(Self {
            total_supplied: math::sub(self.total_supplied, amount)?,
            ..self.clone()
        })
    }

    /// State after lending out `amount`
    pub fn with_borrowed(&self, amount: u128) -> Result<Self, ArithmeticError> {
        Ok(Self {
            total_borrowed: math::add(self.total_borrowed, amount)?,
            ..self.clone()
        })
    }

    /// State after `amount` of principal is repaid
    pub fn with_repaid(&self, amount: u128) -> Result<Self, ArithmeticError> {
        let next = Self {
            total_repaid: math::add(self.total_repaid, amount)?,
            ..self.clone()
        };
        next.outstanding()?;
        Ok(next)
    }
}

/// Price-feed and precision configuration for a market's asset pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetPairConfig {
    pub market: MarketId,
    /// Asset lent out by the pool
    pub lending_asset: AssetId,
    /// Asset posted as collateral
    pub collateral_asset: AssetId,
    /// Price-feed reference passed to the feed collaborator
    pub feed: String,
    /// Decimals the feed is expected to report
    pub feed_decimals: u8,
    pub lending_decimals: u8,
    pub collateral_decimals: u8,
    /// `false`: feed quotes collateral per lending token.
    /// `true`: feed quotes lending per collateral token.
    pub inverted: bool,
}

/// Raw reading returned by the price-feed collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceReading {
    /// Fixed-point value with `decimals` fractional digits
    pub value: u128,
    pub decimals: u8,
    pub updated_at_height: Height,
}
