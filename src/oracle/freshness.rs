//! Freshness classifier
//!
//! Maps an observation timestamp to an age in hours and an ordinal quality tier.

use chrono::Utc;

use crate::types::DataQuality;

const SECS_PER_HOUR: f64 = 3600.0;

/// Upper bounds (exclusive) of the fresh / recent / acceptable tiers, in hours
pub const FRESH_MAX_HOURS: f64 = 1.0;
pub const RECENT_MAX_HOURS: f64 = 6.0;
pub const ACCEPTABLE_MAX_HOURS: f64 = 24.0;

/// Classify against the wall clock
pub fn classify(timestamp: i64) -> (DataQuality, f64) {
    classify_at(timestamp, Utc::now().timestamp())
}

/// Classify against an explicit clock (Unix seconds)
pub fn classify_at(timestamp: i64, now: i64) -> (DataQuality, f64) {
    if timestamp <= 0 {
        return (DataQuality::Unknown, f64::INFINITY);
    }

    // Clock skew upstream can put observations slightly in the future
    let age_hours = ((now - timestamp) as f64 / SECS_PER_HOUR).max(0.0);
    (tier_for_age(age_hours), age_hours)
}

/// Half-open tiers: [0,1) fresh, [1,6) recent, [6,24) acceptable, [24,inf) stale
pub fn tier_for_age(age_hours: f64) -> DataQuality {
    if age_hours.is_nan() {
        DataQuality::Unknown
    } else if age_hours < FRESH_MAX_HOURS {
        DataQuality::Fresh
    } else if age_hours < RECENT_MAX_HOURS {
        DataQuality::Recent
    } else if age_hours < ACCEPTABLE_MAX_HOURS {
        DataQuality::Acceptable
    } else {
        DataQuality::Stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    #[test]
    fn missing_timestamp_is_unknown() {
        let (quality, age) = classify_at(0, NOW);
        assert_eq!(quality, DataQuality::Unknown);
        assert!(age.is_infinite());

        let (quality, _) = classify_at(-30, NOW);
        assert_eq!(quality, DataQuality::Unknown);
    }

    #[test]
    fn tier_boundaries_are_half_open() {
        assert_eq!(classify_at(NOW, NOW).0, DataQuality::Fresh);
        assert_eq!(classify_at(NOW - 3599, NOW).0, DataQuality::Fresh);
        assert_eq!(classify_at(NOW - 3600, NOW).0, DataQuality::Recent);
        assert_eq!(classify_at(NOW - 6 * 3600 + 1, NOW).0, DataQuality::Recent);
        assert_eq!(classify_at(NOW - 6 * 3600, NOW).0, DataQuality::Acceptable);
        assert_eq!(classify_at(NOW - 24 * 3600 + 1, NOW).0, DataQuality::Acceptable);
        assert_eq!(classify_at(NOW - 24 * 3600, NOW).0, DataQuality::Stale);
        assert_eq!(classify_at(NOW - 90 * 24 * 3600, NOW).0, DataQuality::Stale);
    }

    #[test]
    fn age_is_measured_in_hours() {
        let (_, age) = classify_at(NOW - 5400, NOW);
        assert!((age - 1.5).abs() < 1e-9);
    }

    #[test]
    fn future_timestamps_clamp_to_zero_age() {
        let (quality, age) = classify_at(NOW + 120, NOW);
        assert_eq!(quality, DataQuality::Fresh);
        assert_eq!(age, 0.0);
    }

    #[test]
    fn older_data_never_gets_a_fresher_tier() {
        let offsets: Vec<i64> = (0..200).map(|i| i * 1800 + (i % 7) * 13).collect();
        for pair in offsets.windows(2) {
            // pair[1] is older than pair[0]
            let newer = classify_at(NOW - pair[0], NOW).0;
            let older = classify_at(NOW - pair[1], NOW).0;
            assert!(
                older.rank() >= newer.rank(),
                "{} h old got {:?} but {} h old got {:?}",
                pair[1] / 3600,
                older,
                pair[0] / 3600,
                newer
            );
        }
    }
}
