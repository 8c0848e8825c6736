//! Lender account - share balance and interest checkpoint

use serde::{Deserialize, Serialize};

use super::ids::Height;
use crate::error::ArithmeticError;
use crate::math;

/// A liquidity provider's share balance and checkpointed interest
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LenderAccount {
    /// Pool share-token balance
    pub balance: u128,
    /// Height of the last checkpoint
    pub last_checkpoint_height: Height,
    /// Pool accumulator value at the last checkpoint
    pub last_checkpoint_acc_per_share: u128,
    /// Sub-unit interest carried between checkpoints, scaled by the
    /// accumulator precision
    pub checkpoint_remainder: u128,
    /// Interest settled so far; never decreases
    pub accrued_interest: u128,
    /// Interest already paid out
    pub claimed_interest: u128,
}

impl LenderAccount {
    /// Settled interest not yet paid out
    pub fn claimable(&self) -> Result<u128, ArithmeticError> {
        math::sub(self.accrued_interest, self.claimed_interest)
    }
}
