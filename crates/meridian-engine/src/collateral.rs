//! Collateral sufficiency
//!
//! Pure computations over a loan's owed amounts, its collateral and a
//! normalized price. Nothing here mutates state.

use meridian_common::{
    error::ArithmeticError,
    math, Height, Loan, LoanStatus,
};
use serde::{Deserialize, Serialize};

use crate::pricing::PriceNormalizer;

/// Collateral position of a loan at the current price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollateralInfo {
    /// Collateral held, in collateral-token units
    pub collateral: u128,
    /// Collateral held, valued in lending-token units (floored)
    pub collateral_value_in_lending_tokens: u128,
    /// `(principal + interest) * ratio / 10_000`
    pub required_in_lending_tokens: u128,
    /// Shortfall not covered by the collateral held, in lending-token units
    pub needed_in_lending_tokens: u128,
    /// Shortfall in collateral-token units (rounded up)
    pub needed_in_collateral_tokens: u128,
    pub require_collateral: bool,
}

/// Computes collateral requirements
pub struct CollateralEngine;

impl CollateralEngine {
    /// Collateral position of `loan`
    pub fn collateral_info(
        loan: &Loan,
        normalizer: &PriceNormalizer,
    ) -> Result<CollateralInfo, ArithmeticError> {
        Self::assess(
            loan.total_owed()?,
            loan.terms.collateral_ratio(),
            loan.collateral,
            normalizer,
        )
    }

    /// Collateral position for arbitrary owed/collateral amounts
    pub fn assess(
        owed: u128,
        collateral_ratio: u128,
        collateral: u128,
        normalizer: &PriceNormalizer,
    ) -> Result<CollateralInfo, ArithmeticError> {
        let required = math::apply_bps(owed, collateral_ratio)?;
        let covered = normalizer.collateral_to_lending(collateral)?;
        let shortfall = required.saturating_sub(covered);
        let shortfall_in_collateral = if shortfall == 0 {
            0
        } else {
            normalizer.lending_to_collateral_ceil(shortfall)?
        };

        Ok(CollateralInfo {
            collateral,
            collateral_value_in_lending_tokens: covered,
            required_in_lending_tokens: required,
            needed_in_lending_tokens: shortfall,
            needed_in_collateral_tokens: shortfall_in_collateral,
            require_collateral: shortfall > 0,
        })
    }

    /// Whether an Active loan with debt ran past its duration at `height`
    ///
    /// Needs no price, so an overdue loan stays liquidatable while the feed
    /// is unavailable.
    pub fn is_overdue(loan: &Loan, height: Height) -> Result<bool, ArithmeticError> {
        Ok(Self::has_open_debt(loan)? && loan.is_overdue_at(height))
    }

    /// Whether an Active loan's collateral value fell below what it owes
    pub fn is_undercollateralized(
        loan: &Loan,
        normalizer: &PriceNormalizer,
    ) -> Result<bool, ArithmeticError> {
        if !Self::has_open_debt(loan)? {
            return Ok(false);
        }
        let value = normalizer.collateral_to_lending(loan.collateral)?;
        Ok(value < loan.total_owed()?)
    }

    /// Whether an Active loan may be liquidated at `height`
    pub fn is_liquidatable(
        loan: &Loan,
        normalizer: &PriceNormalizer,
        height: Height,
    ) -> Result<bool, ArithmeticError> {
        Ok(Self::is_overdue(loan, height)? || Self::is_undercollateralized(loan, normalizer)?)
    }

    fn has_open_debt(loan: &Loan) -> Result<bool, ArithmeticError> {
        Ok(loan.status == LoanStatus::Active && loan.total_owed()? > 0)
    }
}
