//! Price-feed collaborator
//!
//! The feed itself is external; this module defines the read interface and
//! the freshness rules applied to every reading before it is used.

use std::collections::HashMap;

use meridian_common::{error::OracleError, AssetPairConfig, Height, PriceReading, Result};
use tracing::warn;

/// Source of the latest exchange-rate reading for a feed reference
pub trait PriceFeed {
    fn latest_price(&self, feed: &str) -> Option<PriceReading>;
}

/// Fetch a usable reading for `pair` at `height`
///
/// Missing, zero, stale, future-dated or mis-scaled readings are
/// `ORACLE_UNAVAILABLE`.
pub fn fetch_price(
    feed: &dyn PriceFeed,
    pair: &AssetPairConfig,
    height: Height,
    max_age: u64,
) -> Result<PriceReading> {
    let unavailable = |reason: String| {
        warn!(feed = %pair.feed, market = %pair.market, %reason, "Price unavailable");
        OracleError::Unavailable {
            pair: pair.market.to_string(),
            reason,
        }
    };

    let reading = feed
        .latest_price(&pair.feed)
        .ok_or_else(|| unavailable("no reading".to_string()))?;

    if reading.value == 0 {
        return Err(unavailable("zero price".to_string()).into());
    }
    if reading.decimals != pair.feed_decimals {
        return Err(unavailable(format!(
            "feed reports {} decimals, expected {}",
            reading.decimals, pair.feed_decimals
        ))
        .into());
    }
    if reading.updated_at_height > height {
        return Err(unavailable(format!(
            "reading dated at height {} is ahead of height {}",
            reading.updated_at_height, height
        ))
        .into());
    }
    let age = height - reading.updated_at_height;
    if age > max_age {
        return Err(unavailable(format!("reading is {} heights old (max {})", age, max_age)).into());
    }

    Ok(reading)
}

/// In-memory price feed
#[derive(Debug, Clone, Default)]
pub struct StaticPriceFeed {
    readings: HashMap<String, PriceReading>,
}

impl StaticPriceFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, feed: impl Into<String>, reading: PriceReading) {
        self.readings.insert(feed.into(), reading);
    }

    pub fn with_price(mut self, feed: impl Into<String>, reading: PriceReading) -> Self {
        self.set(feed, reading);
        self
    }
}

impl PriceFeed for StaticPriceFeed {
    fn latest_price(&self, feed: &str) -> Option<PriceReading> {
        self.readings.get(feed).copied()
    }
}
