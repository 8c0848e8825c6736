//! Checkpointed interest accrual for pool-share holders
//!
//! The pool keeps one cumulative per-share accumulator, scaled by
//! [`ACC_PRECISION`]. Recognizing income `I` over `S` shares advances it by
//! `(I * P + r) / S` and carries `r = (I * P + r) % S` to the next
//! recognition. A lender is only touched when their share balance changes:
//!
//! ```text
//! x                = balance * (acc - last_acc) + dust
//! accrued_interest += x / P
//! dust              = x % P
//! last_acc          = acc
//! ```
//!
//! so no holder is ever iterated on recognition. After every holder has been
//! checkpointed,
//! `sum(accrued) * P + sum(dust) + r + unallocated * P == recognized * P`.
//!
//! Every mutation is split into a `plan_*` read that returns a
//! [`LedgerUpdate`] and an infallible [`InterestLedger::apply`], so callers
//! can validate a whole operation before touching the ledger.

use std::collections::HashMap;

use meridian_common::{
    error::{ArithmeticError, BalanceError},
    math, Address, Height, LenderAccount, Result,
};
use tracing::debug;

/// Fixed-point precision of the per-share accumulator
pub const ACC_PRECISION: u128 = 1_000_000_000_000;

/// Per-market share balances and interest checkpoints
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterestLedger {
    accounts: HashMap<Address, LenderAccount>,
    total_shares: u128,
    acc_per_share: u128,
    /// Division remainder of the accumulator, scaled by `ACC_PRECISION`
    remainder: u128,
    /// Income recognized while no shares existed
    unallocated: u128,
    total_recognized: u128,
}

/// Validated ledger changes, produced by a `plan_*` call
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerUpdate {
    accounts: Vec<(Address, LenderAccount)>,
    total_shares: u128,
    acc_per_share: u128,
    remainder: u128,
    unallocated: u128,
    total_recognized: u128,
}

impl LedgerUpdate {
    /// Account values this update writes
    pub fn account(&self, lender: &Address) -> Option<&LenderAccount> {
        self.accounts
            .iter()
            .find(|(address, _)| address == lender)
            .map(|(_, account)| account)
    }

    pub fn total_shares(&self) -> u128 {
        self.total_shares
    }
}

/// Settle the interest a balance earned since its last checkpoint
fn settle(
    account: &mut LenderAccount,
    acc_per_share: u128,
    height: Height,
) -> std::result::Result<(), ArithmeticError> {
    let delta = math::sub(acc_per_share, account.last_checkpoint_acc_per_share)?;
    let earned = math::add(math::mul(account.balance, delta)?, account.checkpoint_remainder)?;

    account.accrued_interest = math::add(account.accrued_interest, earned / ACC_PRECISION)?;
    account.checkpoint_remainder = earned % ACC_PRECISION;
    account.last_checkpoint_acc_per_share = acc_per_share;
    account.last_checkpoint_height = height;
    Ok(())
}

/// Working copy of the touched parts of a ledger
struct Draft<'a> {
    ledger: &'a InterestLedger,
    update: LedgerUpdate,
}

impl<'a> Draft<'a> {
    fn new(ledger: &'a InterestLedger) -> Self {
        Self {
            ledger,
            update: LedgerUpdate {
                accounts: Vec::with_capacity(2),
                total_shares: ledger.total_shares,
                acc_per_share: ledger.acc_per_share,
                remainder: ledger.remainder,
                unallocated: ledger.unallocated,
                total_recognized: ledger.total_recognized,
            },
        }
    }

    fn account(&mut self, lender: &Address) -> &mut LenderAccount {
        let index = match self.update.accounts.iter().position(|(a, _)| a == lender) {
            Some(index) => index,
            None => {
                let current = self.ledger.accounts.get(lender).cloned().unwrap_or_default();
                self.update.accounts.push((*lender, current));
                self.update.accounts.len() - 1
            }
        };
        &mut self.update.accounts[index].1
    }

    fn checkpoint(&mut self, lender: &Address, height: Height) -> Result<()> {
        let acc = self.update.acc_per_share;
        settle(self.account(lender), acc, height)?;
        Ok(())
    }

    fn debit(&mut self, lender: &Address, amount: u128) -> Result<()> {
        let account = self.account(lender);
        if account.balance < amount {
            return Err(BalanceError::InsufficientBalance {
                required: amount,
                available: account.balance,
            }
            .into());
        }
        account.balance -= amount;
        Ok(())
    }

    fn credit(&mut self, lender: &Address, amount: u128) -> Result<()> {
        let account = self.account(lender);
        account.balance = math::add(account.balance, amount)?;
        Ok(())
    }

    fn finish(self) -> LedgerUpdate {
        self.update
    }
}

impl InterestLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn account(&self, lender: &Address) -> Option<&LenderAccount> {
        self.accounts.get(lender)
    }

    pub fn accounts(&self) -> impl Iterator<Item = (&Address, &LenderAccount)> {
        self.accounts.iter()
    }

    pub fn balance_of(&self, lender: &Address) -> u128 {
        self.accounts.get(lender).map_or(0, |a| a.balance)
    }

    pub fn total_shares(&self) -> u128 {
        self.total_shares
    }

    pub fn acc_per_share(&self) -> u128 {
        self.acc_per_share
    }

    /// Accumulator remainder, scaled by [`ACC_PRECISION`]
    pub fn remainder(&self) -> u128 {
        self.remainder
    }

    /// Income waiting for share holders
    pub fn unallocated(&self) -> u128 {
        self.unallocated
    }

    pub fn total_recognized(&self) -> u128 {
        self.total_recognized
    }

    /// Interest `lender` has earned but not yet settled
    pub fn pending_interest(&self, lender: &Address) -> Result<u128> {
        let Some(account) = self.accounts.get(lender) else {
            return Ok(0);
        };
        let mut settled = account.clone();
        settle(&mut settled, self.acc_per_share, account.last_checkpoint_height)?;
        Ok(math::sub(settled.accrued_interest, account.accrued_interest)?)
    }

    /// Settle `lender` without changing their balance
    pub fn plan_checkpoint(&self, lender: &Address, height: Height) -> Result<LedgerUpdate> {
        let mut draft = Draft::new(self);
        draft.checkpoint(lender, height)?;
        Ok(draft.finish())
    }

    pub fn plan_mint(&self, to: &Address, amount: u128, height: Height) -> Result<LedgerUpdate> {
        let mut draft = Draft::new(self);
        draft.checkpoint(to, height)?;
        draft.credit(to, amount)?;
        draft.update.total_shares = math::add(draft.update.total_shares, amount)?;
        Ok(draft.finish())
    }

    pub fn plan_burn(&self, from: &Address, amount: u128, height: Height) -> Result<LedgerUpdate> {
        let mut draft = Draft::new(self);
        draft.checkpoint(from, height)?;
        draft.debit(from, amount)?;
        draft.update.total_shares = math::sub(draft.update.total_shares, amount)?;
        Ok(draft.finish())
    }

    /// Move shares, checkpointing sender and receiver in the same update
    pub fn plan_transfer(
        &self,
        from: &Address,
        to: &Address,
        amount: u128,
        height: Height,
    ) -> Result<LedgerUpdate> {
        let mut draft = Draft::new(self);
        draft.checkpoint(from, height)?;
        draft.checkpoint(to, height)?;
        draft.debit(from, amount)?;
        draft.credit(to, amount)?;
        Ok(draft.finish())
    }

    /// Recognize realized interest income into the accumulator
    ///
    /// With no shares outstanding the income is parked and distributed at
    /// the next recognition that finds holders.
    pub fn plan_recognition(&self, income: u128) -> Result<LedgerUpdate> {
        let mut draft = Draft::new(self);
        let update = &mut draft.update;
        update.total_recognized = math::add(update.total_recognized, income)?;

        if update.total_shares == 0 {
            update.unallocated = math::add(update.unallocated, income)?;
            return Ok(draft.finish());
        }

        let distributable = math::add(income, update.unallocated)?;
        if distributable == 0 {
            return Ok(draft.finish());
        }
        let scaled = math::add(math::mul(distributable, ACC_PRECISION)?, update.remainder)?;
        update.acc_per_share = math::add(update.acc_per_share, scaled / update.total_shares)?;
        update.remainder = scaled % update.total_shares;
        update.unallocated = 0;
        Ok(draft.finish())
    }

    /// Settle `lender` and mark everything accrued as claimed
    ///
    /// Returns the update and the amount to pay out. An address that never
    /// held shares gets an empty update and nothing to pay.
    pub fn plan_claim(&self, lender: &Address, height: Height) -> Result<(LedgerUpdate, u128)> {
        let mut draft = Draft::new(self);
        if !self.accounts.contains_key(lender) {
            return Ok((draft.finish(), 0));
        }
        draft.checkpoint(lender, height)?;
        let account = draft.account(lender);
        let amount = account.claimable()?;
        account.claimed_interest = account.accrued_interest;
        Ok((draft.finish(), amount))
    }

    /// Write a planned update
    pub fn apply(&mut self, update: LedgerUpdate) {
        for (lender, account) in update.accounts {
            self.accounts.insert(lender, account);
        }
        self.total_shares = update.total_shares;
        self.acc_per_share = update.acc_per_share;
        self.remainder = update.remainder;
        self.unallocated = update.unallocated;
        self.total_recognized = update.total_recognized;
    }

    pub fn checkpoint(&mut self, lender: &Address, height: Height) -> Result<()> {
        let update = self.plan_checkpoint(lender, height)?;
        self.apply(update);
        Ok(())
    }

    pub fn mint(&mut self, to: &Address, amount: u128, height: Height) -> Result<()> {
        let update = self.plan_mint(to, amount, height)?;
        self.apply(update);
        Ok(())
    }

    pub fn burn(&mut self, from: &Address, amount: u128, height: Height) -> Result<()> {
        let update = self.plan_burn(from, amount, height)?;
        self.apply(update);
        Ok(())
    }

    pub fn transfer(&mut self, from: &Address, to: &Address, amount: u128, height: Height) -> Result<()> {
        let update = self.plan_transfer(from, to, amount, height)?;
        self.apply(update);
        Ok(())
    }

    pub fn recognize_interest(&mut self, income: u128) -> Result<()> {
        let update = self.plan_recognition(income)?;
        self.apply(update);
        debug!(
            income,
            acc_per_share = self.acc_per_share,
            unallocated = self.unallocated,
            "Interest recognized"
        );
        Ok(())
    }

    pub fn claim(&mut self, lender: &Address, height: Height) -> Result<u128> {
        let (update, amount) = self.plan_claim(lender, height)?;
        self.apply(update);
        Ok(amount)
    }

    /// Checkpoint every account
    ///
    /// All-or-nothing: on overflow no account is changed.
    pub fn checkpoint_all(&mut self, height: Height) -> Result<()> {
        let mut settled = Vec::with_capacity(self.accounts.len());
        for (lender, account) in &self.accounts {
            let mut account = account.clone();
            settle(&mut account, self.acc_per_share, height)?;
            settled.push((*lender, account));
        }
        self.accounts.extend(settled);
        Ok(())
    }
}
