//! Checked fixed-point arithmetic
//!
//! All amounts are unsigned base units (`u128`). Every helper fails with an
//! [`ArithmeticError`] instead of wrapping.

use crate::error::ArithmeticError;

/// Basis-point scale (100% = 10_000)
pub const BPS_SCALE: u128 = 10_000;

/// Largest decimal exponent representable in `u128`
pub const MAX_POW10: u32 = 38;

/// `10^exp`
pub fn pow10(exp: u32) -> Result<u128, ArithmeticError> {
    if exp > MAX_POW10 {
        return Err(ArithmeticError::Overflow);
    }
    10u128.checked_pow(exp).ok_or(ArithmeticError::Overflow)
}

#[inline]
pub fn add(a: u128, b: u128) -> Result<u128, ArithmeticError> {
    a.checked_add(b).ok_or(ArithmeticError::Overflow)
}

#[inline]
pub fn sub(a: u128, b: u128) -> Result<u128, ArithmeticError> {
    a.checked_sub(b).ok_or(ArithmeticError::Underflow)
}

#[inline]
pub fn mul(a: u128, b: u128) -> Result<u128, ArithmeticError> {
    a.checked_mul(b).ok_or(ArithmeticError::Overflow)
}

/// `floor(a * b / c)`
pub fn mul_div_floor(a: u128, b: u128, c: u128) -> Result<u128, ArithmeticError> {
    if c == 0 {
        return Err(ArithmeticError::DivisionByZero);
    }
    Ok(mul(a, b)? / c)
}

/// `ceil(a * b / c)`
pub fn mul_div_ceil(a: u128, b: u128, c: u128) -> Result<u128, ArithmeticError> {
    if c == 0 {
        return Err(ArithmeticError::DivisionByZero);
    }
    let product = mul(a, b)?;
    let quotient = product / c;
    if product % c == 0 {
        Ok(quotient)
    } else {
        add(quotient, 1)
    }
}

/// `floor(amount * bps / 10_000)`
pub fn apply_bps(amount: u128, bps: u128) -> Result<u128, ArithmeticError> {
    mul_div_floor(amount, bps, BPS_SCALE)
}
