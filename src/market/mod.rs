//! Market data as returned by the CoinGecko API.
//!
//! [`AssetSnapshot`] is the flat record of the paged `/coins/markets` endpoint.
//! The single-asset `/coins/{id}` endpoint returns a much larger nested
//! document ([`CoinDetail`]) which is folded back into the same snapshot shape.

pub(crate) mod fetch;
pub(crate) mod serialization;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serialization::{de_f64_or_zero, de_null_default, de_opt_datetime, de_sparse_map};
use std::collections::HashMap;
use thiserror::Error;

pub use fetch::{CoinGeckoClient, COINGECKO_API_URL};

/// One asset's market state at fetch time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetSnapshot {
    pub id: String,
    #[serde(default, deserialize_with = "de_null_default")]
    pub symbol: String,
    #[serde(default, deserialize_with = "de_null_default")]
    pub name: String,
    #[serde(default, deserialize_with = "de_null_default")]
    pub image: String,
    #[serde(default, deserialize_with = "de_f64_or_zero")]
    pub current_price: f64,
    #[serde(default, deserialize_with = "de_f64_or_zero")]
    pub market_cap: f64,
    #[serde(default, deserialize_with = "de_null_default")]
    pub market_cap_rank: i64,
    #[serde(default, deserialize_with = "de_f64_or_zero")]
    pub fully_diluted_valuation: f64,
    #[serde(default, deserialize_with = "de_f64_or_zero")]
    pub total_volume: f64,
    #[serde(default, deserialize_with = "de_f64_or_zero")]
    pub high_24h: f64,
    #[serde(default, deserialize_with = "de_f64_or_zero")]
    pub low_24h: f64,
    #[serde(default, deserialize_with = "de_f64_or_zero")]
    pub price_change_24h: f64,
    #[serde(default, deserialize_with = "de_f64_or_zero")]
    pub price_change_percentage_24h: f64,
    #[serde(default, deserialize_with = "de_f64_or_zero")]
    pub market_cap_change_24h: f64,
    #[serde(default, deserialize_with = "de_f64_or_zero")]
    pub market_cap_change_percentage_24h: f64,
    #[serde(default, deserialize_with = "de_f64_or_zero")]
    pub circulating_supply: f64,
    #[serde(default, deserialize_with = "de_f64_or_zero")]
    pub total_supply: f64,
    #[serde(default, deserialize_with = "de_f64_or_zero")]
    pub max_supply: f64,
    #[serde(default, deserialize_with = "de_f64_or_zero")]
    pub ath: f64,
    #[serde(default, deserialize_with = "de_f64_or_zero")]
    pub ath_change_percentage: f64,
    #[serde(default, deserialize_with = "de_opt_datetime")]
    pub ath_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "de_f64_or_zero")]
    pub atl: f64,
    #[serde(default, deserialize_with = "de_f64_or_zero")]
    pub atl_change_percentage: f64,
    #[serde(default, deserialize_with = "de_opt_datetime")]
    pub atl_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "de_opt_datetime")]
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageLinks {
    #[serde(default, deserialize_with = "de_null_default")]
    pub thumb: String,
    #[serde(default, deserialize_with = "de_null_default")]
    pub small: String,
    #[serde(default, deserialize_with = "de_null_default")]
    pub large: String,
}

/// The `market_data` block of `/coins/{id}`. Price-like values are keyed by
/// quote currency.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MarketData {
    #[serde(default, deserialize_with = "de_sparse_map")]
    pub current_price: HashMap<String, f64>,
    #[serde(default, deserialize_with = "de_sparse_map")]
    pub market_cap: HashMap<String, f64>,
    #[serde(default, deserialize_with = "de_sparse_map")]
    pub fully_diluted_valuation: HashMap<String, f64>,
    #[serde(default, deserialize_with = "de_sparse_map")]
    pub total_volume: HashMap<String, f64>,
    #[serde(default, deserialize_with = "de_sparse_map")]
    pub high_24h: HashMap<String, f64>,
    #[serde(default, deserialize_with = "de_sparse_map")]
    pub low_24h: HashMap<String, f64>,
    #[serde(default, deserialize_with = "de_f64_or_zero")]
    pub price_change_24h: f64,
    #[serde(default, deserialize_with = "de_f64_or_zero")]
    pub price_change_percentage_24h: f64,
    #[serde(default, deserialize_with = "de_f64_or_zero")]
    pub market_cap_change_24h: f64,
    #[serde(default, deserialize_with = "de_f64_or_zero")]
    pub market_cap_change_percentage_24h: f64,
    #[serde(default, deserialize_with = "de_f64_or_zero")]
    pub circulating_supply: f64,
    #[serde(default, deserialize_with = "de_f64_or_zero")]
    pub total_supply: f64,
    #[serde(default, deserialize_with = "de_f64_or_zero")]
    pub max_supply: f64,
    #[serde(default, deserialize_with = "de_sparse_map")]
    pub ath: HashMap<String, f64>,
    #[serde(default, deserialize_with = "de_sparse_map")]
    pub ath_change_percentage: HashMap<String, f64>,
    #[serde(default, deserialize_with = "de_sparse_map")]
    pub ath_date: HashMap<String, DateTime<Utc>>,
    #[serde(default, deserialize_with = "de_sparse_map")]
    pub atl: HashMap<String, f64>,
    #[serde(default, deserialize_with = "de_sparse_map")]
    pub atl_change_percentage: HashMap<String, f64>,
    #[serde(default, deserialize_with = "de_sparse_map")]
    pub atl_date: HashMap<String, DateTime<Utc>>,
}

/// Stripped down `/coins/{id}` document. Descriptive, social and developer
/// sections are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct CoinDetail {
    pub id: String,
    #[serde(default, deserialize_with = "de_null_default")]
    pub symbol: String,
    #[serde(default, deserialize_with = "de_null_default")]
    pub name: String,
    #[serde(default, deserialize_with = "de_null_default")]
    pub image: ImageLinks,
    #[serde(default, deserialize_with = "de_null_default")]
    pub market_cap_rank: i64,
    #[serde(default, deserialize_with = "de_null_default")]
    pub market_data: MarketData,
    #[serde(default, deserialize_with = "de_opt_datetime")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl CoinDetail {
    /// Fold the nested document into a snapshot quoted in `currency`.
    ///
    /// Quotes missing for that currency become zero.
    pub fn into_snapshot(self, currency: &str) -> AssetSnapshot {
        let md = self.market_data;
        let quote = |m: &HashMap<String, f64>| m.get(currency).copied().unwrap_or(0.0);
        let date = |m: &HashMap<String, DateTime<Utc>>| m.get(currency).copied();

        AssetSnapshot {
            id: self.id,
            symbol: self.symbol,
            name: self.name,
            image: self.image.thumb,
            current_price: quote(&md.current_price),
            market_cap: quote(&md.market_cap),
            market_cap_rank: self.market_cap_rank,
            fully_diluted_valuation: quote(&md.fully_diluted_valuation),
            total_volume: quote(&md.total_volume),
            high_24h: quote(&md.high_24h),
            low_24h: quote(&md.low_24h),
            price_change_24h: md.price_change_24h,
            price_change_percentage_24h: md.price_change_percentage_24h,
            market_cap_change_24h: md.market_cap_change_24h,
            market_cap_change_percentage_24h: md.market_cap_change_percentage_24h,
            circulating_supply: md.circulating_supply,
            total_supply: md.total_supply,
            max_supply: md.max_supply,
            ath: quote(&md.ath),
            ath_change_percentage: quote(&md.ath_change_percentage),
            ath_date: date(&md.ath_date),
            atl: quote(&md.atl),
            atl_change_percentage: quote(&md.atl_change_percentage),
            atl_date: date(&md.atl_date),
            last_updated: self.last_updated,
        }
    }
}

/// Coarse failure class used for control flow and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum FailureKind {
    RateLimited,
    Transport,
    Decode,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("being rate limited by coingecko")]
    RateLimited,
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(reqwest::StatusCode),
    #[error("payload did not match the expected shape: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl FetchError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::RateLimited => FailureKind::RateLimited,
            Self::Transport(_) | Self::Status(_) | Self::InvalidRequest(_) => {
                FailureKind::Transport
            }
            Self::Decode(_) => FailureKind::Decode,
        }
    }
}

/// Upstream source of market snapshots.
///
/// Implementations keep no state between calls and may be invoked
/// concurrently for different pages or ids.
#[async_trait]
pub trait MarketSource: Send + Sync {
    /// One page (1-based) of ranked snapshots.
    async fn fetch_page(&self, page: u32) -> Result<Vec<AssetSnapshot>, FetchError>;

    /// A single asset looked up by its CoinGecko id.
    async fn fetch_one(&self, id: &str) -> Result<AssetSnapshot, FetchError>;
}
