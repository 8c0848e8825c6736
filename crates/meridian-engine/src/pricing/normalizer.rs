//! Price normalization across mismatched decimal scales
//!
//! A reading `p` with `r` decimals quotes collateral per lending token, or
//! lending per collateral token when the pair is inverted. Converting an
//! amount multiplies or divides by `p` and rescales by a single net power of
//! ten, so each conversion performs exactly one flooring (or ceiling)
//! division:
//!
//! ```text
//! lending -> collateral   direct:   l * p * 10^(db - da - r)
//!                         inverted: l * 10^(r + db - da) / p
//! collateral -> lending   direct:   c * 10^(r + da - db) / p
//!                         inverted: c * p * 10^(da - db - r)
//! ```

use meridian_common::{
    error::{ArithmeticError, OracleError},
    math, AssetPairConfig, PriceReading, Result,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rounding {
    Floor,
    Ceil,
}

/// Converts amounts between a market's lending and collateral assets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceNormalizer {
    price: u128,
    price_decimals: u8,
    lending_decimals: u8,
    collateral_decimals: u8,
    inverted: bool,
}

impl PriceNormalizer {
    /// Build a normalizer from a pair configuration and a reading
    pub fn new(pair: &AssetPairConfig, reading: &PriceReading) -> Result<Self> {
        if reading.value == 0 {
            return Err(OracleError::Unavailable {
                pair: pair.market.to_string(),
                reason: "zero price".to_string(),
            }
            .into());
        }
        Ok(Self {
            price: reading.value,
            price_decimals: reading.decimals,
            lending_decimals: pair.lending_decimals,
            collateral_decimals: pair.collateral_decimals,
            inverted: pair.inverted,
        })
    }

    /// Lending-token amount to collateral-token amount, floored
    pub fn lending_to_collateral(&self, amount: u128) -> std::result::Result<u128, ArithmeticError> {
        self.lending_to_collateral_rounded(amount, Rounding::Floor)
    }

    /// Lending-token amount to collateral-token amount, rounded up
    pub fn lending_to_collateral_ceil(
        &self,
        amount: u128,
    ) -> std::result::Result<u128, ArithmeticError> {
        self.lending_to_collateral_rounded(amount, Rounding::Ceil)
    }

    /// Collateral-token amount to lending-token amount, floored
    pub fn collateral_to_lending(&self, amount: u128) -> std::result::Result<u128, ArithmeticError> {
        let (r, da, db) = self.exponents();
        if self.inverted {
            self.convert(amount, true, da - db - r, Rounding::Floor)
        } else {
            self.convert(amount, false, r + da - db, Rounding::Floor)
        }
    }

    fn lending_to_collateral_rounded(
        &self,
        amount: u128,
        rounding: Rounding,
    ) -> std::result::Result<u128, ArithmeticError> {
        let (r, da, db) = self.exponents();
        if self.inverted {
            self.convert(amount, false, r + db - da, rounding)
        } else {
            self.convert(amount, true, db - da - r, rounding)
        }
    }

    fn exponents(&self) -> (i32, i32, i32) {
        (
            i32::from(self.price_decimals),
            i32::from(self.lending_decimals),
            i32::from(self.collateral_decimals),
        )
    }

    /// `amount * (p or 1/p) * 10^shift` with one final division
    fn convert(
        &self,
        amount: u128,
        multiply_by_price: bool,
        shift: i32,
        rounding: Rounding,
    ) -> std::result::Result<u128, ArithmeticError> {
        let mut numerator = amount;
        let mut denominator = 1u128;

        if multiply_by_price {
            numerator = math::mul(numerator, self.price)?;
        } else {
            denominator = self.price;
        }

        let scale = math::pow10(shift.unsigned_abs())?;
        if shift >= 0 {
            numerator = math::mul(numerator, scale)?;
        } else {
            denominator = math::mul(denominator, scale)?;
        }

        match rounding {
            Rounding::Floor => math::mul_div_floor(numerator, 1, denominator),
            Rounding::Ceil => math::mul_div_ceil(numerator, 1, denominator),
        }
    }
}
