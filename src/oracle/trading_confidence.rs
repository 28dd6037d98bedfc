//! Trading confidence - weighted 7-component model for trading-advice ranking
//!
//! Distinct from [`ConfidenceScorer`](super::confidence::ConfidenceScorer), which
//! gates item acceptance. The two are calibrated independently and are not merged.

use serde::Serialize;

use crate::oracle::volume::coefficient_of_variation;
use crate::types::{ItemMapping, PriceData, TimeseriesPoint, TradingActivity};

/// Component weights (sum to 1.0)
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TradingWeights {
    pub data_freshness: f64,
    pub price_reliability: f64,
    pub volume_consistency: f64,
    pub liquidity: f64,
    pub historical_stability: f64,
    pub market_activity: f64,
    pub item_specific: f64,
}

impl Default for TradingWeights {
    fn default() -> Self {
        Self {
            data_freshness: 0.25,
            price_reliability: 0.20,
            volume_consistency: 0.20,
            liquidity: 0.15,
            historical_stability: 0.10,
            market_activity: 0.05,
            item_specific: 0.05,
        }
    }
}

impl TradingWeights {
    pub fn total(&self) -> f64 {
        self.data_freshness
            + self.price_reliability
            + self.volume_consistency
            + self.liquidity
            + self.historical_stability
            + self.market_activity
            + self.item_specific
    }
}

/// Per-component sub-scores, each in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConfidenceComponents {
    pub data_freshness: f64,
    pub price_reliability: f64,
    pub volume_consistency: f64,
    pub liquidity: f64,
    pub historical_stability: f64,
    pub market_activity: f64,
    pub item_specific: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TradingConfidence {
    pub composite: f64,
    pub components: ConfidenceComponents,
}

#[derive(Debug, Clone, Default)]
pub struct TradingConfidenceScorer {
    weights: TradingWeights,
}

impl TradingConfidenceScorer {
    pub fn new(weights: TradingWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &TradingWeights {
        &self.weights
    }

    pub fn score(
        &self,
        data: &PriceData,
        history: &[TimeseriesPoint],
        item: Option<&ItemMapping>,
    ) -> TradingConfidence {
        let components = ConfidenceComponents {
            data_freshness: freshness_score(data.age_hours),
            price_reliability: price_reliability_score(data.high_price, data.low_price),
            volume_consistency: volume_consistency_score(history),
            liquidity: liquidity_score(data),
            historical_stability: historical_stability_score(history),
            market_activity: market_activity_score(
                data.volume_analysis.as_ref().map(|a| a.trading_activity),
            ),
            item_specific: item_specific_score(item),
        };

        let w = &self.weights;
        let composite = components.data_freshness * w.data_freshness
            + components.price_reliability * w.price_reliability
            + components.volume_consistency * w.volume_consistency
            + components.liquidity * w.liquidity
            + components.historical_stability * w.historical_stability
            + components.market_activity * w.market_activity
            + components.item_specific * w.item_specific;

        TradingConfidence {
            composite: composite.clamp(0.0, 1.0),
            components,
        }
    }
}

/// Piecewise-linear decay; asymptotic toward zero past 48h
pub fn freshness_score(age_hours: f64) -> f64 {
    if !age_hours.is_finite() || age_hours < 0.0 {
        return 0.0;
    }
    if age_hours < 1.0 {
        1.0
    } else if age_hours < 6.0 {
        0.8 - 0.2 * (age_hours - 1.0) / 5.0
    } else if age_hours < 24.0 {
        0.6 - 0.1 * (age_hours - 6.0) / 18.0
    } else if age_hours < 48.0 {
        0.5 - 0.3 * (age_hours - 24.0) / 24.0
    } else {
        0.2 * (-(age_hours - 48.0) / 48.0).exp()
    }
}

pub fn price_reliability_score(high: i64, low: i64) -> f64 {
    if high <= 0 && low <= 0 {
        return 0.0;
    }
    if high <= 0 || low <= 0 {
        // one-sided market
        return 0.4;
    }
    if high == low {
        return 0.3;
    }
    if high < low {
        return 0.2;
    }

    let spread_pct = (high - low) as f64 / low as f64;
    if spread_pct <= 0.02 {
        1.0
    } else if spread_pct <= 0.05 {
        0.8
    } else if spread_pct <= 0.10 {
        0.6
    } else if spread_pct <= 0.20 {
        0.4
    } else {
        0.2
    }
}

pub fn volume_consistency_score(history: &[TimeseriesPoint]) -> f64 {
    let volumes: Vec<f64> = history.iter().map(|p| p.total_volume() as f64).collect();
    match coefficient_of_variation(&volumes) {
        None => 0.3,
        Some(cv) if cv < 0.5 => 1.0,
        Some(cv) if cv < 1.0 => 0.7,
        Some(cv) if cv < 2.0 => 0.4,
        Some(_) => 0.2,
    }
}

pub fn liquidity_score(data: &PriceData) -> f64 {
    if let Some(analysis) = &data.volume_analysis {
        return analysis.liquidity_score.clamp(0.0, 1.0);
    }
    // log10(1 + v) / 3 saturates at roughly a thousand trades
    ((1.0 + data.total_volume() as f64).log10() / 3.0).min(1.0)
}

/// Stability bands over the coefficient of variation of recent mid prices
pub fn historical_stability_score(history: &[TimeseriesPoint]) -> f64 {
    let mids: Vec<f64> = history.iter().filter_map(|p| p.mid_price()).collect();
    if mids.len() < 3 {
        return 0.5;
    }
    match coefficient_of_variation(&mids) {
        None => 0.5,
        Some(cv) if cv < 0.05 => 1.0,
        Some(cv) if cv < 0.10 => 0.8,
        Some(cv) if cv < 0.20 => 0.6,
        Some(cv) if cv < 0.30 => 0.4,
        Some(cv) if cv <= 0.50 => 0.2,
        Some(_) => 0.1,
    }
}

pub fn market_activity_score(activity: Option<TradingActivity>) -> f64 {
    match activity {
        Some(TradingActivity::VeryActive) => 1.0,
        Some(TradingActivity::Active) => 0.8,
        Some(TradingActivity::Moderate) => 0.6,
        Some(TradingActivity::Low) => 0.3,
        Some(TradingActivity::Inactive) => 0.1,
        None => 0.3,
    }
}

/// Higher GE buy limits mean positions can actually be sized
pub fn item_specific_score(item: Option<&ItemMapping>) -> f64 {
    match item.and_then(|i| i.limit) {
        Some(limit) if limit >= 1_000 => 1.0,
        Some(limit) if limit >= 100 => 0.7,
        Some(_) => 0.4,
        None => 0.5,
    }
}
