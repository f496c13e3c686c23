//! Projection of a snapshot into independently cached scalar fields.

use crate::market::AssetSnapshot;
use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt;
use strum::{EnumCount, EnumIter, IntoEnumIterator, IntoStaticStr};

/// Separator between the asset id and the field name in a cache key.
pub const KEY_SEPARATOR: char = '#';

/// Every cached attribute of an asset, in storage order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, EnumCount, IntoStaticStr)]
pub enum FieldName {
    Symbol,
    Name,
    Image,
    CurrentPrice,
    MarketCap,
    MarketCapRank,
    FullyDilutedValuation,
    TotalVolume,
    High24H,
    Low24H,
    PriceChange24H,
    PriceChangePercentage24H,
    MarketCapChange24H,
    MarketCapChangePercentage24H,
    CirculatingSupply,
    TotalSupply,
    MaxSupply,
    Ath,
    AthChangePercentage,
    AthDate,
    Atl,
    AtlChangePercentage,
    AtlDate,
    LastUpdated,
}

impl FieldName {
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Float(f64),
    Int(i64),
    /// `None` is stored as an empty string.
    Timestamp(Option<DateTime<Utc>>),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Float(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Timestamp(Some(ts)) => {
                f.write_str(&ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            Self::Timestamp(None) => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlattenedField {
    pub owner_id: String,
    pub name: FieldName,
    pub value: FieldValue,
}

impl FlattenedField {
    pub fn key(&self) -> String {
        cache_key(&self.owner_id, self.name)
    }
}

/// `<owner>#<FieldName>`
pub fn cache_key(owner_id: &str, name: FieldName) -> String {
    format!("{owner_id}{KEY_SEPARATOR}{name}")
}

/// All [`FieldName::COUNT`] fields of `s`, in [`FieldName`] order.
pub fn flatten(s: &AssetSnapshot) -> Vec<FlattenedField> {
    FieldName::iter()
        .map(|name| FlattenedField {
            owner_id: s.id.clone(),
            name,
            value: field_value(s, name),
        })
        .collect()
}

fn field_value(s: &AssetSnapshot, name: FieldName) -> FieldValue {
    use FieldValue::{Float, Int, Text, Timestamp};

    match name {
        FieldName::Symbol => Text(s.symbol.clone()),
        FieldName::Name => Text(s.name.clone()),
        FieldName::Image => Text(s.image.clone()),
        FieldName::CurrentPrice => Float(s.current_price),
        FieldName::MarketCap => Float(s.market_cap),
        FieldName::MarketCapRank => Int(s.market_cap_rank),
        FieldName::FullyDilutedValuation => Float(s.fully_diluted_valuation),
        FieldName::TotalVolume => Float(s.total_volume),
        FieldName::High24H => Float(s.high_24h),
        FieldName::Low24H => Float(s.low_24h),
        FieldName::PriceChange24H => Float(s.price_change_24h),
        FieldName::PriceChangePercentage24H => Float(s.price_change_percentage_24h),
        FieldName::MarketCapChange24H => Float(s.market_cap_change_24h),
        FieldName::MarketCapChangePercentage24H => Float(s.market_cap_change_percentage_24h),
        FieldName::CirculatingSupply => Float(s.circulating_supply),
        FieldName::TotalSupply => Float(s.total_supply),
        FieldName::MaxSupply => Float(s.max_supply),
        FieldName::Ath => Float(s.ath),
        FieldName::AthChangePercentage => Float(s.ath_change_percentage),
        FieldName::AthDate => Timestamp(s.ath_date),
        FieldName::Atl => Float(s.atl),
        FieldName::AtlChangePercentage => Float(s.atl_change_percentage),
        FieldName::AtlDate => Timestamp(s.atl_date),
        FieldName::LastUpdated => Timestamp(s.last_updated),
    }
}
