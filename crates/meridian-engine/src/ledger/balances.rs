//! Fungible balance primitive
//!
//! The real balance primitive is external. The lending core only calls it
//! after every check of an operation has passed, so a failing transfer here
//! means the collaborator disagrees with a balance the core just read.

use std::collections::HashMap;

use meridian_common::{error::BalanceError, math, Address, AssetId, Result};

/// Conventional fungible-token operations, keyed by asset
pub trait TokenLedger {
    fn balance_of(&self, asset: &AssetId, holder: &Address) -> u128;

    fn transfer(&mut self, asset: &AssetId, from: &Address, to: &Address, amount: u128) -> Result<()>;

    fn mint(&mut self, asset: &AssetId, to: &Address, amount: u128) -> Result<()>;

    fn burn(&mut self, asset: &AssetId, from: &Address, amount: u128) -> Result<()>;
}

/// Fail unless `holder` has at least `amount` of `asset`
pub fn ensure_balance(
    tokens: &dyn TokenLedger,
    asset: &AssetId,
    holder: &Address,
    amount: u128,
) -> Result<()> {
    let available = tokens.balance_of(asset, holder);
    if available < amount {
        return Err(BalanceError::InsufficientBalance {
            required: amount,
            available,
        }
        .into());
    }
    Ok(())
}

/// In-memory balance primitive
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryTokenLedger {
    balances: HashMap<(AssetId, Address), u128>,
}

impl MemoryTokenLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(asset: &AssetId, holder: &Address) -> (AssetId, Address) {
        (asset.clone(), *holder)
    }
}

impl TokenLedger for MemoryTokenLedger {
    fn balance_of(&self, asset: &AssetId, holder: &Address) -> u128 {
        self.balances
            .get(&Self::key(asset, holder))
            .copied()
            .unwrap_or(0)
    }

    fn transfer(&mut self, asset: &AssetId, from: &Address, to: &Address, amount: u128) -> Result<()> {
        if from == to {
            return ensure_balance(&*self, asset, from, amount);
        }
        let from_balance = self.balance_of(asset, from);
        let new_from = from_balance
            .checked_sub(amount)
            .ok_or(BalanceError::InsufficientBalance {
                required: amount,
                available: from_balance,
            })?;
        let new_to = math::add(self.balance_of(asset, to), amount)?;

        self.balances.insert(Self::key(asset, from), new_from);
        self.balances.insert(Self::key(asset, to), new_to);
        Ok(())
    }

    fn mint(&mut self, asset: &AssetId, to: &Address, amount: u128) -> Result<()> {
        let new_to = math::add(self.balance_of(asset, to), amount)?;
        self.balances.insert(Self::key(asset, to), new_to);
        Ok(())
    }

    fn burn(&mut self, asset: &AssetId, from: &Address, amount: u128) -> Result<()> {
        let balance = self.balance_of(asset, from);
        let remaining = balance
            .checked_sub(amount)
            .ok_or(BalanceError::InsufficientBalance {
                required: amount,
                available: balance,
            })?;
        self.balances.insert(Self::key(asset, from), remaining);
        Ok(())
    }
}
