//! Freshest-available price lookup
//!
//! Walks progressively coarser granularities and accepts the first observation
//! younger than `max_age_hours`:
//!
//! `5m series -> 1h series -> latest -> give up`

use tracing::{debug, warn};

use super::PriceSource;
use crate::oracle::freshness;
use crate::types::{ItemId, LatestPrice, TimeStep, TimeseriesPoint};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackStep {
    FiveMinuteSeries,
    HourlySeries,
    Latest,
    GiveUp,
}

impl FallbackStep {
    pub fn next(self) -> FallbackStep {
        match self {
            FallbackStep::FiveMinuteSeries => FallbackStep::HourlySeries,
            FallbackStep::HourlySeries => FallbackStep::Latest,
            FallbackStep::Latest | FallbackStep::GiveUp => FallbackStep::GiveUp,
        }
    }
}

/// Observation accepted by the fallback chain
#[derive(Debug, Clone, PartialEq)]
pub struct FreshestPrice {
    pub item_id: ItemId,
    pub price: LatestPrice,
    /// Step that produced the hit
    pub step: FallbackStep,
    pub age_hours: f64,
}

pub async fn freshest_available(
    source: &dyn PriceSource,
    item_id: ItemId,
    max_age_hours: f64,
    now: i64,
) -> Option<FreshestPrice> {
    let mut step = FallbackStep::FiveMinuteSeries;

    loop {
        let candidate = match step {
            FallbackStep::FiveMinuteSeries => {
                series_candidate(source, item_id, TimeStep::Min5).await
            }
            FallbackStep::HourlySeries => series_candidate(source, item_id, TimeStep::Hour1).await,
            FallbackStep::Latest => match source.latest(item_id).await {
                Ok(price) => price,
                Err(e) => {
                    warn!(item_id = item_id, category = e.category(), error = %e, "Latest lookup failed");
                    None
                }
            },
            FallbackStep::GiveUp => {
                debug!(item_id = item_id, max_age_hours = max_age_hours, "No fresh price at any granularity");
                return None;
            }
        };

        if let Some(price) = candidate {
            let timestamp = price
                .high_time
                .unwrap_or(0)
                .max(price.low_time.unwrap_or(0));
            let (_, age_hours) = freshness::classify_at(timestamp, now);
            if age_hours <= max_age_hours && (price.high.is_some() || price.low.is_some()) {
                return Some(FreshestPrice {
                    item_id,
                    price,
                    step,
                    age_hours,
                });
            }
            debug!(item_id = item_id, step = ?step, age_hours = age_hours, "Candidate too old");
        }

        step = step.next();
    }
}

/// Newest series point that has at least one side priced, as a latest-style record
async fn series_candidate(
    source: &dyn PriceSource,
    item_id: ItemId,
    step: TimeStep,
) -> Option<LatestPrice> {
    let series = match source.timeseries(item_id, step).await {
        Ok(series) => series,
        Err(e) => {
            warn!(item_id = item_id, step = %step, category = e.category(), error = %e, "Series lookup failed");
            return None;
        }
    };

    series
        .iter()
        .filter(|p| p.avg_high_price.is_some() || p.avg_low_price.is_some())
        .max_by_key(|p| p.timestamp)
        .map(|p| point_to_latest(p, step))
}

/// Bucket timestamps mark the bucket start; the observation is as old as its end
fn point_to_latest(point: &TimeseriesPoint, step: TimeStep) -> LatestPrice {
    let observed_at = point.timestamp + step.duration_secs();
    LatestPrice {
        high: point.avg_high_price,
        high_time: point.avg_high_price.map(|_| observed_at),
        low: point.avg_low_price,
        low_time: point.avg_low_price.map(|_| observed_at),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::sources::{FetchError, MockPriceSource};
    use mockall::predicate::eq;

    const NOW: i64 = 1_700_000_000;

    fn point(timestamp: i64, high: i64) -> TimeseriesPoint {
        TimeseriesPoint {
            timestamp,
            avg_high_price: Some(high),
            avg_low_price: Some(high - 5),
            high_price_volume: 1,
            low_price_volume: 1,
        }
    }

    #[test]
    fn step_order_ends_in_give_up() {
        let mut step = FallbackStep::FiveMinuteSeries;
        let mut seen = vec![step];
        while step != FallbackStep::GiveUp {
            step = step.next();
            seen.push(step);
        }
        assert_eq!(
            seen,
            vec![
                FallbackStep::FiveMinuteSeries,
                FallbackStep::HourlySeries,
                FallbackStep::Latest,
                FallbackStep::GiveUp
            ]
        );
    }

    #[tokio::test]
    async fn five_minute_hit_short_circuits() {
        let mut source = MockPriceSource::new();
        source
            .expect_timeseries()
            .with(eq(7), eq(TimeStep::Min5))
            .times(1)
            .returning(|_, _| Ok(vec![point(NOW - 900, 100), point(NOW - 600, 110)]));
        source.expect_latest().times(0);

        let hit = freshest_available(&source, 7, 1.0, NOW).await.unwrap();
        assert_eq!(hit.step, FallbackStep::FiveMinuteSeries);
        assert_eq!(hit.price.high, Some(110));
    }

    #[tokio::test]
    async fn falls_back_to_hourly_then_latest() {
        let mut source = MockPriceSource::new();
        source
            .expect_timeseries()
            .with(eq(7), eq(TimeStep::Min5))
            .returning(|_, _| Err(FetchError::Timeout(10)));
        source
            .expect_timeseries()
            .with(eq(7), eq(TimeStep::Hour1))
            .returning(|_, _| Ok(vec![point(NOW - 10 * 3600, 100)]));
        source.expect_latest().with(eq(7)).returning(|_| {
            Ok(Some(LatestPrice {
                high: Some(120),
                high_time: Some(NOW - 60),
                low: Some(115),
                low_time: Some(NOW - 30),
            }))
        });

        let hit = freshest_available(&source, 7, 2.0, NOW).await.unwrap();
        assert_eq!(hit.step, FallbackStep::Latest);
        assert_eq!(hit.price.low, Some(115));
    }

    #[tokio::test]
    async fn gives_up_when_everything_is_old() {
        let mut source = MockPriceSource::new();
        source
            .expect_timeseries()
            .returning(|_, _| Ok(vec![point(NOW - 100 * 3600, 100)]));
        source.expect_latest().returning(|_| Ok(None));

        assert!(freshest_available(&source, 7, 24.0, NOW).await.is_none());
    }
}
