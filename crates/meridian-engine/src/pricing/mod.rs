//! Price feed access and decimal normalization

pub mod feed;
pub mod normalizer;

pub use feed::{fetch_price, PriceFeed, StaticPriceFeed};
pub use normalizer::PriceNormalizer;
