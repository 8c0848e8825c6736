//! Protocol configuration
//!
//! Defaults are overridden by an optional `.env` file and `MERIDIAN_*`
//! environment variables, or replaced wholesale by a JSON document.

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ProtocolError, Result};
use crate::math::BPS_SCALE;
use crate::types::ids::Address;

/// Top-level protocol configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    pub consensus: ConsensusSettings,
    pub risk: RiskSettings,
    pub loans: LoanSettings,
    /// Holder of supplied lending tokens
    pub pool_address: Address,
    /// Holder of escrowed collateral
    pub escrow_address: Address,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            consensus: ConsensusSettings::default(),
            risk: RiskSettings::default(),
            loans: LoanSettings::default(),
            pool_address: Address::new([0xa0; 32]),
            escrow_address: Address::new([0xe0; 32]),
        }
    }
}

impl ProtocolConfig {
    /// Load configuration from environment
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let mut cfg = Self::default();

        if let Some(v) = env_parse("MERIDIAN_CONSENSUS_MIN_RESPONSES") {
            cfg.consensus.min_responses = v;
        }
        if let Some(v) = env_parse("MERIDIAN_CONSENSUS_TOLERANCE_BPS") {
            cfg.consensus.tolerance_bps = v;
        }
        if let Ok(list) = std::env::var("MERIDIAN_CONSENSUS_SIGNERS") {
            cfg.consensus.authorized_signers = parse_signers(&list)?;
        }
        if let Some(v) = env_parse("MERIDIAN_RISK_MAX_DEBT_RATIO_BPS") {
            cfg.risk.max_debt_ratio_bps = v;
        }
        if let Some(v) = env_parse("MERIDIAN_LOANS_HEIGHTS_PER_YEAR") {
            cfg.loans.heights_per_year = v;
        }
        if let Some(v) = env_parse("MERIDIAN_LOANS_TERMS_VALIDITY") {
            cfg.loans.terms_validity = v;
        }
        if let Some(v) = env_parse("MERIDIAN_LOANS_SAFETY_INTERVAL") {
            cfg.loans.collateral_safety_interval = v;
        }
        if let Some(v) = env_parse("MERIDIAN_LOANS_MAX_PRICE_AGE") {
            cfg.loans.max_price_age = v;
        }
        if let Ok(addr) = std::env::var("MERIDIAN_POOL_ADDRESS") {
            cfg.pool_address = Address::from_hex(&addr)
                .ok_or_else(|| ProtocolError::Config(format!("Invalid pool address: {}", addr)))?;
        }
        if let Ok(addr) = std::env::var("MERIDIAN_ESCROW_ADDRESS") {
            cfg.escrow_address = Address::from_hex(&addr)
                .ok_or_else(|| ProtocolError::Config(format!("Invalid escrow address: {}", addr)))?;
        }

        cfg.validate()?;
        debug!(?cfg, "Loaded protocol configuration");
        Ok(cfg)
    }

    /// Load a full configuration document
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ProtocolError::Config(format!("Failed to read {}: {}", path.as_ref().display(), e))
        })?;
        let cfg: Self = serde_json::from_str(&content)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject inconsistent settings
    pub fn validate(&self) -> Result<()> {
        if self.consensus.min_responses == 0 {
            return Err(ProtocolError::Config(
                "consensus.min_responses must be at least 1".into(),
            ));
        }
        if u128::from(self.consensus.tolerance_bps) > BPS_SCALE {
            return Err(ProtocolError::Config(format!(
                "consensus.tolerance_bps {} exceeds {}",
                self.consensus.tolerance_bps, BPS_SCALE
            )));
        }
        if self.loans.heights_per_year == 0 {
            return Err(ProtocolError::Config(
                "loans.heights_per_year must be positive".into(),
            ));
        }
        if self.pool_address == self.escrow_address {
            return Err(ProtocolError::Config(
                "pool and escrow addresses must differ".into(),
            ));
        }
        Ok(())
    }
}

/// Risk-node consensus settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusSettings {
    /// Minimum number of distinct signers
    pub min_responses: usize,
    /// Maximum spread per field, in basis points of the field average
    pub tolerance_bps: u32,
    /// Risk nodes allowed to sign responses
    pub authorized_signers: BTreeSet<Address>,
}

impl Default for ConsensusSettings {
    fn default() -> Self {
        Self {
            min_responses: crate::DEFAULT_MIN_RESPONSES,
            tolerance_bps: crate::DEFAULT_TOLERANCE_BPS,
            authorized_signers: BTreeSet::new(),
        }
    }
}

/// Market-level leverage settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskSettings {
    /// Ceiling for a market's debt ratio, in basis points
    pub max_debt_ratio_bps: u128,
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            max_debt_ratio_bps: crate::DEFAULT_MAX_DEBT_RATIO_BPS,
        }
    }
}

/// Loan lifecycle settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanSettings {
    /// Heights in one year, for annual interest rates
    pub heights_per_year: u64,
    /// Heights after creation during which the first draw is allowed
    pub terms_validity: u64,
    /// Minimum heights between a collateral deposit and a draw
    pub collateral_safety_interval: u64,
    /// Maximum age of a price reading, in heights
    pub max_price_age: u64,
}

impl Default for LoanSettings {
    fn default() -> Self {
        Self {
            heights_per_year: crate::DEFAULT_HEIGHTS_PER_YEAR,
            terms_validity: 7_200,
            collateral_safety_interval: 5,
            max_price_age: 300,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn parse_signers(list: &str) -> Result<BTreeSet<Address>> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            Address::from_hex(s)
                .ok_or_else(|| ProtocolError::Config(format!("Invalid signer address: {}", s)))
        })
        .collect()
}
