//! Confidence scorer - item acceptance gate
//!
//! Additive model: base score plus freshness, volume, sanity and activity
//! adjustments, clamped to [0, 1]. Recommendation eligibility, stale-data
//! rejection thresholds and displayed confidence all read this score, so the
//! weights below are calibrated together.

use std::sync::Arc;
use tracing::debug;

use crate::oracle::sources::PriceSource;
use crate::types::{DataQuality, PriceData};

/// Base for a single officially sanctioned upstream
pub const SINGLE_SOURCE_BASE: f64 = 0.6;
/// Base when several sources are reconciled, before the primary-source bonus
pub const MULTI_SOURCE_BASE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceScorer {
    base: f64,
    /// Reliability bonus of the one canonical primary source (multi-source only)
    primary_source_bonus: f64,
}

impl Default for ConfidenceScorer {
    fn default() -> Self {
        Self::single_source()
    }
}

impl ConfidenceScorer {
    pub fn single_source() -> Self {
        Self {
            base: SINGLE_SOURCE_BASE,
            primary_source_bonus: 0.0,
        }
    }

    /// Scorer for reconciled feeds. Only the primary source's reliability
    /// contributes; secondary sources never add to the base.
    pub fn multi_source(primary_source_reliability: f64) -> Self {
        Self {
            base: MULTI_SOURCE_BASE,
            primary_source_bonus: primary_source_reliability.clamp(0.0, 0.2),
        }
    }

    /// Scorer for the configured feeds. The first source is the primary; a
    /// lone source gets the single-source base.
    pub fn for_sources(sources: &[Arc<dyn PriceSource>]) -> Self {
        match sources {
            [] | [_] => Self::single_source(),
            [primary, ..] => Self::multi_source(primary.reliability()),
        }
    }

    pub fn base(&self) -> f64 {
        self.base + self.primary_source_bonus
    }

    pub fn score(&self, data: &PriceData) -> f64 {
        if data.is_suspicious() {
            debug!(
                item_id = data.item_id,
                high = data.high_price,
                low = data.low_price,
                "Suspicious price pair"
            );
        }

        let raw = self.base()
            + Self::quality_bonus(data.quality)
            + Self::volume_bonus(data.total_volume())
            + Self::sanity_bonus(data.high_price, data.low_price)
            + Self::activity_bonus(data);

        raw.clamp(0.0, 1.0)
    }

    pub fn quality_bonus(quality: DataQuality) -> f64 {
        match quality {
            DataQuality::Fresh => 0.3,
            DataQuality::Recent => 0.2,
            DataQuality::Acceptable => 0.1,
            DataQuality::Stale => -0.2,
            DataQuality::Unknown => -0.4,
        }
    }

    pub fn volume_bonus(total_volume: u64) -> f64 {
        if total_volume > 100 {
            0.2
        } else if total_volume > 10 {
            0.1
        } else if total_volume > 0 {
            0.05
        } else {
            0.0
        }
    }

    pub fn sanity_bonus(high_price: i64, low_price: i64) -> f64 {
        if high_price >= low_price && low_price > 0 {
            0.1
        } else if high_price <= 0 && low_price <= 0 {
            -0.4
        } else {
            0.0
        }
    }

    fn activity_bonus(data: &PriceData) -> f64 {
        match &data.volume_analysis {
            Some(analysis) if analysis.trading_activity.is_active() => 0.1,
            Some(analysis) if analysis.liquidity_score > 0.5 => 0.05,
            _ => 0.0,
        }
    }
}
