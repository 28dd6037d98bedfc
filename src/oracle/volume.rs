//! Volume analysis over an item's hourly timeseries
//!
//! Produces the rolling 24h side volumes, an activity tier, a liquidity score,
//! a volume trend and the volume-weighted average price.

use crate::types::{TimeseriesPoint, TradingActivity, VolumeAnalysis, VolumeTrend};

/// Hourly buckets considered (rolling 24h window)
pub const WINDOW_BUCKETS: usize = 24;
/// Half-over-half change that counts as a trend
const TREND_THRESHOLD: f64 = 0.20;

/// Analyze the most recent `WINDOW_BUCKETS` points. Returns `None` for an empty series.
pub fn analyze(series: &[TimeseriesPoint]) -> Option<VolumeAnalysis> {
    if series.is_empty() {
        return None;
    }

    let mut points: Vec<&TimeseriesPoint> = series.iter().collect();
    points.sort_by_key(|p| p.timestamp);
    let start = points.len().saturating_sub(WINDOW_BUCKETS);
    let window = &points[start..];

    // Wire counts are untrusted, so sums saturate instead of overflowing
    let volume_high_24h = window
        .iter()
        .map(|p| p.high_price_volume)
        .fold(0u64, u64::saturating_add);
    let volume_low_24h = window
        .iter()
        .map(|p| p.low_price_volume)
        .fold(0u64, u64::saturating_add);
    let total = volume_high_24h.saturating_add(volume_low_24h);
    let avg_hourly_volume = total as f64 / window.len() as f64;

    Some(VolumeAnalysis {
        trading_activity: activity_tier(avg_hourly_volume),
        liquidity_score: (avg_hourly_volume / 100.0).min(1.0),
        volume_trend: volume_trend(window),
        volume_high_24h,
        volume_low_24h,
        avg_hourly_volume,
        vwap: vwap(window.iter().copied()),
        buckets: window.len(),
    })
}

pub fn activity_tier(avg_hourly_volume: f64) -> TradingActivity {
    if avg_hourly_volume >= 1000.0 {
        TradingActivity::VeryActive
    } else if avg_hourly_volume >= 100.0 {
        TradingActivity::Active
    } else if avg_hourly_volume >= 10.0 {
        TradingActivity::Moderate
    } else if avg_hourly_volume > 0.0 {
        TradingActivity::Low
    } else {
        TradingActivity::Inactive
    }
}

fn volume_trend(window: &[&TimeseriesPoint]) -> VolumeTrend {
    if window.len() < 4 {
        return VolumeTrend::Stable;
    }

    let mid = window.len() / 2;
    let older = window[..mid]
        .iter()
        .map(|p| p.total_volume())
        .fold(0u64, u64::saturating_add);
    let recent = window[mid..]
        .iter()
        .map(|p| p.total_volume())
        .fold(0u64, u64::saturating_add);
    let older_avg = older as f64 / mid as f64;
    let recent_avg = recent as f64 / (window.len() - mid) as f64;

    if older_avg <= 0.0 {
        return if recent_avg > 0.0 {
            VolumeTrend::Increasing
        } else {
            VolumeTrend::Stable
        };
    }

    let change = (recent_avg - older_avg) / older_avg;
    if change > TREND_THRESHOLD {
        VolumeTrend::Increasing
    } else if change < -TREND_THRESHOLD {
        VolumeTrend::Decreasing
    } else {
        VolumeTrend::Stable
    }
}

/// Volume-weighted average price, weighting each side by its own volume
pub fn vwap<'a>(points: impl IntoIterator<Item = &'a TimeseriesPoint>) -> Option<f64> {
    let mut notional = 0.0;
    let mut volume = 0.0;

    for p in points {
        if let Some(high) = p.avg_high_price {
            notional += high as f64 * p.high_price_volume as f64;
            volume += p.high_price_volume as f64;
        }
        if let Some(low) = p.avg_low_price {
            notional += low as f64 * p.low_price_volume as f64;
            volume += p.low_price_volume as f64;
        }
    }

    if volume > 0.0 {
        Some(notional / volume)
    } else {
        None
    }
}

/// Coefficient of variation (population std dev over mean). `None` below two
/// samples or with a non-positive mean.
pub fn coefficient_of_variation(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    if mean <= 0.0 {
        return None;
    }
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    Some(variance.sqrt() / mean)
}
