//! Loan - agreed terms and the per-loan state machine record

use serde::{Deserialize, Serialize};

use super::ids::{Address, Height, LoanId, MarketId, RequestHash};
use crate::error::{ArithmeticError, LoanStateError};
use crate::math;

/// Loan terms agreed by consensus. Immutable once created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanTerms {
    interest_rate: u128,
    collateral_ratio: u128,
    max_loan_amount: u128,
}

impl LoanTerms {
    pub fn new(interest_rate: u128, collateral_ratio: u128, max_loan_amount: u128) -> Self {
        Self {
            interest_rate,
            collateral_ratio,
            max_loan_amount,
        }
    }

    /// Annual interest rate in basis points
    pub fn interest_rate(&self) -> u128 {
        self.interest_rate
    }

    /// Collateral ratio in basis points
    pub fn collateral_ratio(&self) -> u128 {
        self.collateral_ratio
    }

    pub fn max_loan_amount(&self) -> u128 {
        self.max_loan_amount
    }
}

/// Loan lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoanStatus {
    /// Terms agreed, nothing drawn yet
    TermsSet,
    /// Principal drawn and outstanding
    Active,
    /// Fully repaid
    Closed,
    /// Collateral seized
    Liquidated,
}

impl LoanStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoanStatus::Closed | LoanStatus::Liquidated)
    }
}

impl std::fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoanStatus::TermsSet => write!(f, "TermsSet"),
            LoanStatus::Active => write!(f, "Active"),
            LoanStatus::Closed => write!(f, "Closed"),
            LoanStatus::Liquidated => write!(f, "Liquidated"),
        }
    }
}

/// A loan and its balances
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Loan {
    pub id: LoanId,
    pub borrower: Address,
    pub market: MarketId,
    /// Hash of the request the terms were agreed for
    pub request_hash: RequestHash,
    pub terms: LoanTerms,
    /// Duration in heights, counted from the first draw
    pub duration: u64,
    /// Collateral held in escrow (collateral-token base units)
    pub collateral: u128,
    pub principal_owed: u128,
    pub interest_owed: u128,
    /// Cumulative principal drawn
    pub borrowed_amount: u128,
    pub status: LoanStatus,
    /// Last height at which the first draw is allowed
    pub terms_expiry: Height,
    /// Height of the first draw
    pub loan_start_height: Option<Height>,
    /// Height of the latest collateral deposit
    pub last_collateral_in_height: Option<Height>,
}

impl Loan {
    /// Principal plus interest
    pub fn total_owed(&self) -> Result<u128, ArithmeticError> {
        math::add(self.principal_owed, self.interest_owed)
    }

    /// Height after which unpaid debt is overdue
    pub fn end_height(&self) -> Option<Height> {
        self.loan_start_height
            .map(|start| start.saturating_add(self.duration))
    }

    pub fn is_overdue_at(&self, height: Height) -> bool {
        matches!(self.end_height(), Some(end) if height > end)
    }

    /// Borrowing capacity left under the agreed maximum
    pub fn remaining_capacity(&self) -> u128 {
        self.terms
            .max_loan_amount()
            .saturating_sub(self.borrowed_amount)
    }

    /// Fail unless the loan can still change state
    pub fn ensure_not_terminal(&self) -> Result<(), LoanStateError> {
        if self.status.is_terminal() {
            return Err(LoanStateError::AlreadyTerminal {
                loan_id: self.id,
                status: self.status.to_string(),
            });
        }
        Ok(())
    }

    /// Fail unless the loan is Active
    pub fn ensure_active(&self) -> Result<(), LoanStateError> {
        self.ensure_not_terminal()?;
        if self.status != LoanStatus::Active {
            return Err(LoanStateError::NotActive {
                loan_id: self.id,
                status: self.status.to_string(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Display for Loan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Loan({}, {}, status={}, principal={}, interest={}, collateral={})",
            self.id,
            self.market,
            self.status,
            self.principal_owed,
            self.interest_owed,
            self.collateral
        )
    }
}
