//! Core types used throughout the oracle
//!
//! Defines the price records, freshness tiers and catalog entries shared by the
//! fetch client, the reconciler and the decanting engine.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::oracle::confidence::ConfidenceScorer;
use crate::oracle::freshness;

/// Upstream item identifier (stable across game updates)
pub type ItemId = u32;

/// Ordinal freshness tier of a price observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataQuality {
    /// Younger than one hour
    Fresh,
    /// One to six hours old
    Recent,
    /// Six to twenty-four hours old
    Acceptable,
    /// A day or older
    Stale,
    /// No timestamp recorded
    Unknown,
}

impl DataQuality {
    /// Rank where 0 is the freshest tier. Higher means worse.
    pub fn rank(&self) -> u8 {
        match self {
            DataQuality::Fresh => 0,
            DataQuality::Recent => 1,
            DataQuality::Acceptable => 2,
            DataQuality::Stale => 3,
            DataQuality::Unknown => 4,
        }
    }

    /// The worse of two tiers
    pub fn worst(self, other: DataQuality) -> DataQuality {
        if other.rank() > self.rank() {
            other
        } else {
            self
        }
    }

    /// Continuous score used by the decanting engine's confidence mean
    pub fn as_score(&self) -> f64 {
        match self {
            DataQuality::Fresh => 1.0,
            DataQuality::Recent => 0.8,
            DataQuality::Acceptable => 0.6,
            DataQuality::Stale => 0.3,
            DataQuality::Unknown => 0.1,
        }
    }
}

impl fmt::Display for DataQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataQuality::Fresh => write!(f, "fresh"),
            DataQuality::Recent => write!(f, "recent"),
            DataQuality::Acceptable => write!(f, "acceptable"),
            DataQuality::Stale => write!(f, "stale"),
            DataQuality::Unknown => write!(f, "unknown"),
        }
    }
}

/// How actively an item traded over the analysis window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradingActivity {
    VeryActive,
    Active,
    Moderate,
    Low,
    Inactive,
}

impl TradingActivity {
    pub fn is_active(&self) -> bool {
        matches!(self, TradingActivity::VeryActive | TradingActivity::Active)
    }
}

impl fmt::Display for TradingActivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradingActivity::VeryActive => write!(f, "very_active"),
            TradingActivity::Active => write!(f, "active"),
            TradingActivity::Moderate => write!(f, "moderate"),
            TradingActivity::Low => write!(f, "low"),
            TradingActivity::Inactive => write!(f, "inactive"),
        }
    }
}

/// Direction of traded volume, recent half of the window vs older half
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeTrend {
    Increasing,
    Stable,
    Decreasing,
}

/// Auxiliary volume statistics derived from the hourly timeseries
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VolumeAnalysis {
    pub trading_activity: TradingActivity,
    /// 0.0 - 1.0
    pub liquidity_score: f64,
    pub volume_trend: VolumeTrend,
    pub volume_high_24h: u64,
    pub volume_low_24h: u64,
    pub avg_hourly_volume: f64,
    /// Volume-weighted average of the bucket mid prices, if any bucket traded
    pub vwap: Option<f64>,
    /// Number of buckets that contributed
    pub buckets: usize,
}

impl VolumeAnalysis {
    pub fn total_volume(&self) -> u64 {
        self.volume_high_24h.saturating_add(self.volume_low_24h)
    }
}

/// Latest instant-buy / instant-sell observation for one item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LatestPrice {
    /// Instant-buy price
    pub high: Option<i64>,
    pub high_time: Option<i64>,
    /// Instant-sell price
    pub low: Option<i64>,
    pub low_time: Option<i64>,
}

/// One item's averaged prices inside a 5m / 1h bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BucketPrice {
    pub avg_high_price: Option<i64>,
    pub avg_low_price: Option<i64>,
    pub high_price_volume: u64,
    pub low_price_volume: u64,
}

/// Catalog-wide bucket snapshot as returned by `/5m` and `/1h`
#[derive(Debug, Clone, Default)]
pub struct PriceBucket {
    /// Bucket start, Unix seconds
    pub timestamp: Option<i64>,
    pub prices: std::collections::HashMap<ItemId, BucketPrice>,
}

/// One point of an item's timeseries
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeseriesPoint {
    pub timestamp: i64,
    pub avg_high_price: Option<i64>,
    pub avg_low_price: Option<i64>,
    pub high_price_volume: u64,
    pub low_price_volume: u64,
}

impl TimeseriesPoint {
    pub fn total_volume(&self) -> u64 {
        self.high_price_volume.saturating_add(self.low_price_volume)
    }

    /// Mean of the two sides, or whichever side traded
    pub fn mid_price(&self) -> Option<f64> {
        match (self.avg_high_price, self.avg_low_price) {
            (Some(h), Some(l)) => Some((h as f64 + l as f64) / 2.0),
            (Some(h), None) => Some(h as f64),
            (None, Some(l)) => Some(l as f64),
            (None, None) => None,
        }
    }
}

/// Timeseries granularity accepted by `/timeseries`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeStep {
    Min5,
    Hour1,
    Hour6,
    Hour24,
}

impl TimeStep {
    pub fn as_param(&self) -> &'static str {
        match self {
            TimeStep::Min5 => "5m",
            TimeStep::Hour1 => "1h",
            TimeStep::Hour6 => "6h",
            TimeStep::Hour24 => "24h",
        }
    }

    pub fn duration_secs(&self) -> i64 {
        match self {
            TimeStep::Min5 => 5 * 60,
            TimeStep::Hour1 => 60 * 60,
            TimeStep::Hour6 => 6 * 60 * 60,
            TimeStep::Hour24 => 24 * 60 * 60,
        }
    }
}

impl fmt::Display for TimeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_param())
    }
}

/// Catalog entry from `/mapping`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemMapping {
    pub id: ItemId,
    pub name: String,
    #[serde(default)]
    pub examine: String,
    #[serde(default)]
    pub members: bool,
    #[serde(default)]
    pub lowalch: Option<i64>,
    #[serde(default)]
    pub highalch: Option<i64>,
    /// GE buy limit per four hours
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub value: i64,
    #[serde(default)]
    pub icon: String,
}

/// Raw inputs for one price estimate, before freshness and confidence are derived
#[derive(Debug, Clone, Default)]
pub struct PriceObservation {
    pub item_id: ItemId,
    pub high_price: i64,
    pub low_price: i64,
    pub high_time: i64,
    pub low_time: i64,
    pub volume_high: u64,
    pub volume_low: u64,
    pub volume_analysis: Option<VolumeAnalysis>,
}

impl PriceObservation {
    pub fn from_latest(item_id: ItemId, latest: &LatestPrice) -> Self {
        Self {
            item_id,
            high_price: latest.high.unwrap_or(0).max(0),
            low_price: latest.low.unwrap_or(0).max(0),
            high_time: latest.high_time.unwrap_or(0),
            low_time: latest.low_time.unwrap_or(0),
            ..Self::default()
        }
    }

    pub fn with_volume(mut self, analysis: Option<VolumeAnalysis>) -> Self {
        if let Some(analysis) = &analysis {
            self.volume_high = analysis.volume_high_24h;
            self.volume_low = analysis.volume_low_24h;
        }
        self.volume_analysis = analysis;
        self
    }

    /// Derive freshness and confidence as of `now` (Unix seconds)
    pub fn into_price_data(self, scorer: &ConfidenceScorer, now: i64) -> PriceData {
        let timestamp = self.high_time.max(self.low_time).max(0);
        let (quality, age_hours) = freshness::classify_at(timestamp, now);

        let mut data = PriceData {
            item_id: self.item_id,
            high_price: self.high_price.max(0),
            low_price: self.low_price.max(0),
            timestamp,
            quality,
            age_hours,
            volume_high: self.volume_high,
            volume_low: self.volume_low,
            confidence_score: 0.0,
            volume_analysis: self.volume_analysis,
        };
        data.confidence_score = scorer.score(&data);
        data
    }
}

/// Point-in-time price estimate for one item
///
/// `high_price` is the instant-buy price and `low_price` the instant-sell price,
/// whatever their numeric relation. Records are never mutated after construction;
/// a newer fetch supersedes them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceData {
    pub item_id: ItemId,
    pub high_price: i64,
    pub low_price: i64,
    /// Unix seconds of the newest contributing observation, 0 if none
    pub timestamp: i64,
    pub quality: DataQuality,
    /// Age when the record was built or last re-scored
    pub age_hours: f64,
    pub volume_high: u64,
    pub volume_low: u64,
    confidence_score: f64,
    pub volume_analysis: Option<VolumeAnalysis>,
}

impl PriceData {
    pub fn confidence_score(&self) -> f64 {
        self.confidence_score
    }

    pub fn total_volume(&self) -> u64 {
        self.volume_high.saturating_add(self.volume_low)
    }

    pub fn has_any_price(&self) -> bool {
        self.high_price > 0 || self.low_price > 0
    }

    /// Identical nonzero sides, or an inverted spread
    pub fn is_suspicious(&self) -> bool {
        (self.high_price > 0 && self.high_price == self.low_price)
            || (self.low_price > 0 && self.high_price > 0 && self.high_price < self.low_price)
    }

    /// Age re-derived against the given clock rather than the construction time
    pub fn age_hours_at(&self, now: i64) -> f64 {
        freshness::classify_at(self.timestamp, now).1
    }

    /// Copy with age, quality and confidence re-derived as of `now`
    pub fn rescored_at(&self, scorer: &ConfidenceScorer, now: i64) -> PriceData {
        let (quality, age_hours) = freshness::classify_at(self.timestamp, now);
        let mut data = PriceData {
            quality,
            age_hours,
            ..self.clone()
        };
        data.confidence_score = scorer.score(&data);
        data
    }

    pub fn spread(&self) -> i64 {
        self.high_price - self.low_price
    }
}
