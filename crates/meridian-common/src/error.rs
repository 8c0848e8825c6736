//! Error types for the Meridian lending core
//!
//! Provides a unified error type with one sub-enum per failure category.
//! Every variant carries a stable upper-snake code via `code()` so callers can
//! surface the reason without matching on display strings.

use thiserror::Error;

/// Result type alias using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Unified error type for Meridian operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Temporal error: {0}")]
    Temporal(#[from] TemporalError),

    #[error("Consensus error: {0}")]
    Consensus(#[from] ConsensusError),

    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("Collateral error: {0}")]
    Collateral(#[from] CollateralError),

    #[error("Risk error: {0}")]
    Risk(#[from] RiskError),

    #[error("Loan state error: {0}")]
    LoanState(#[from] LoanStateError),

    #[error("Arithmetic error: {0}")]
    Arithmetic(#[from] ArithmeticError),

    #[error("Balance error: {0}")]
    Balance(#[from] BalanceError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProtocolError {
    /// Coded reason surfaced to callers
    pub fn code(&self) -> &'static str {
        match self {
            ProtocolError::Auth(e) => e.code(),
            ProtocolError::Temporal(e) => e.code(),
            ProtocolError::Consensus(e) => e.code(),
            ProtocolError::Oracle(e) => e.code(),
            ProtocolError::Collateral(e) => e.code(),
            ProtocolError::Risk(e) => e.code(),
            ProtocolError::LoanState(e) => e.code(),
            ProtocolError::Arithmetic(e) => e.code(),
            ProtocolError::Balance(e) => e.code(),
            ProtocolError::NotFound(_) => "NOT_FOUND",
            ProtocolError::Config(_) => "CONFIG",
            ProtocolError::Serialization(_) => "SERIALIZATION",
            ProtocolError::Internal(_) => "INTERNAL",
        }
    }
}

/// Signature and signer authentication failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Invalid signature from signer {signer}")]
    InvalidSignature { signer: String },

    #[error("Signer {signer} already responded to request {request}")]
    DuplicateSigner { signer: String, request: String },

    #[error("Signer {signer} is not an authorized risk node")]
    UnauthorizedSigner { signer: String },

    #[error("Request {request} was already processed")]
    RequestReplayed { request: String },
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::InvalidSignature { .. } => "INVALID_SIGNATURE",
            AuthError::DuplicateSigner { .. } => "DUPLICATE_SIGNER",
            AuthError::UnauthorizedSigner { .. } => "UNAUTHORIZED_SIGNER",
            AuthError::RequestReplayed { .. } => "REQUEST_REPLAYED",
        }
    }
}

/// Height-based expiry failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemporalError {
    #[error("Request expired at height {expiration}, current height {current}")]
    RequestExpired { expiration: u64, current: u64 },

    #[error("Loan terms expired at height {expiry}, current height {current}")]
    TermsExpired { expiry: u64, current: u64 },

    #[error("Collateral deposited at height {deposited_at}; draws allowed from height {allowed_from}")]
    CollateralTooRecent { deposited_at: u64, allowed_from: u64 },
}

impl TemporalError {
    pub fn code(&self) -> &'static str {
        match self {
            TemporalError::RequestExpired { .. } => "REQUEST_EXPIRED",
            TemporalError::TermsExpired { .. } => "TERMS_EXPIRED",
            TemporalError::CollateralTooRecent { .. } => "COLLATERAL_TOO_RECENT",
        }
    }
}

/// Agreement failures while aggregating node responses
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsensusError {
    #[error("Responses diverged on {field}: spread {spread} exceeds {tolerance_bps} bps of average {average}")]
    ResponsesDiverged {
        field: &'static str,
        spread: u128,
        average: u128,
        tolerance_bps: u32,
    },

    #[error("Insufficient responses: {received} of {required} required")]
    InsufficientResponses { received: usize, required: usize },
}

impl ConsensusError {
    pub fn code(&self) -> &'static str {
        match self {
            ConsensusError::ResponsesDiverged { .. } => "RESPONSES_DIVERGED",
            ConsensusError::InsufficientResponses { .. } => "INSUFFICIENT_RESPONSES",
        }
    }
}

/// Price feed failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OracleError {
    #[error("Oracle unavailable for {pair}: {reason}")]
    Unavailable { pair: String, reason: String },
}

impl OracleError {
    pub fn code(&self) -> &'static str {
        match self {
            OracleError::Unavailable { .. } => "ORACLE_UNAVAILABLE",
        }
    }
}

/// Collateral sufficiency failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollateralError {
    #[error("Insufficient collateral: {shortfall} more collateral tokens required")]
    InsufficientCollateral { shortfall: u128 },

    #[error("Loan {loan_id} is not liquidatable")]
    NotLiquidatable { loan_id: u64 },
}

impl CollateralError {
    pub fn code(&self) -> &'static str {
        match self {
            CollateralError::InsufficientCollateral { .. } => "INSUFFICIENT_COLLATERAL",
            CollateralError::NotLiquidatable { .. } => "NOT_LIQUIDATABLE",
        }
    }
}

/// Leverage ceiling failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RiskError {
    #[error("Debt ratio {ratio} bps exceeds ceiling {ceiling} bps")]
    DebtRatioExceeded { ratio: u128, ceiling: u128 },

    #[error("Supply-to-debt ratio {ratio} bps exceeds risk group ceiling {ceiling} bps")]
    SupplyToDebtExceeded { ratio: u128, ceiling: u128 },

    #[error("No risk group covers market {market}")]
    RiskGroupNotFound { market: String },
}

impl RiskError {
    pub fn code(&self) -> &'static str {
        match self {
            RiskError::DebtRatioExceeded { .. } => "DEBT_RATIO_EXCEEDED",
            RiskError::SupplyToDebtExceeded { .. } => "SUPPLY_TO_DEBT_EXCEEDED",
            RiskError::RiskGroupNotFound { .. } => "RISK_GROUP_NOT_FOUND",
        }
    }
}

/// Loan state machine failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoanStateError {
    #[error("Loan {loan_id} is not active (status {status})")]
    NotActive { loan_id: u64, status: String },

    #[error("Loan {loan_id} is already terminal (status {status})")]
    AlreadyTerminal { loan_id: u64, status: String },

    #[error("Loan {loan_id} not found")]
    NotFound { loan_id: u64 },

    #[error("Draw of {requested} exceeds remaining loan capacity {remaining}")]
    MaxLoanExceeded { requested: u128, remaining: u128 },

    #[error("Repayment of {requested} exceeds owed {owed}")]
    RepayExceedsOwed { requested: u128, owed: u128 },
}

impl LoanStateError {
    pub fn code(&self) -> &'static str {
        match self {
            LoanStateError::NotActive { .. } => "LOAN_NOT_ACTIVE",
            LoanStateError::AlreadyTerminal { .. } => "ALREADY_TERMINAL",
            LoanStateError::NotFound { .. } => "LOAN_NOT_FOUND",
            LoanStateError::MaxLoanExceeded { .. } => "MAX_LOAN_EXCEEDED",
            LoanStateError::RepayExceedsOwed { .. } => "REPAY_EXCEEDS_OWED",
        }
    }
}

/// Checked arithmetic failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ArithmeticError {
    #[error("Arithmetic overflow")]
    Overflow,

    #[error("Arithmetic underflow")]
    Underflow,

    #[error("Division by zero")]
    DivisionByZero,
}

impl ArithmeticError {
    pub fn code(&self) -> &'static str {
        match self {
            ArithmeticError::Overflow => "OVERFLOW",
            ArithmeticError::Underflow => "UNDERFLOW",
            ArithmeticError::DivisionByZero => "DIVISION_BY_ZERO",
        }
    }
}

/// Fungible balance failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BalanceError {
    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: u128, available: u128 },

    #[error("Insufficient pool liquidity: required {required}, available {available}")]
    InsufficientLiquidity { required: u128, available: u128 },

    #[error("Amount must be positive")]
    InvalidAmount,
}

impl BalanceError {
    pub fn code(&self) -> &'static str {
        match self {
            BalanceError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            BalanceError::InsufficientLiquidity { .. } => "INSUFFICIENT_LIQUIDITY",
            BalanceError::InvalidAmount => "INVALID_AMOUNT",
        }
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        ProtocolError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for ProtocolError {
    fn from(err: anyhow::Error) -> Self {
        ProtocolError::Internal(err.to_string())
    }
}
