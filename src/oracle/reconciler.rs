//! Price Reconciler - single best price per item
//!
//! Combines the latest instant-buy/instant-sell observation with hourly volume
//! analysis, annotates freshness and confidence, caches the result and enforces
//! the caller's staleness bound. Batch lookups isolate per-item failures and
//! track consecutive fully-failed batches so an operator can back off upstream.

use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::oracle::cache::{CacheKey, PriceCache};
use crate::oracle::confidence::ConfidenceScorer;
use crate::oracle::sources::{FetchError, PriceSource};
use crate::oracle::volume;
use crate::types::{ItemId, PriceData, PriceObservation, TimeStep};

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub cache_ttl: Duration,
    pub batch_size: usize,
    pub inter_batch_delay: Duration,
    pub batch_timeout: Duration,
    /// Upper bound for one item's lookup, including its retries
    pub item_timeout: Duration,
    pub max_concurrency: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(300),
            batch_size: 50,
            inter_batch_delay: Duration::from_millis(500),
            batch_timeout: Duration::from_secs(120),
            item_timeout: Duration::from_secs(45),
            max_concurrency: 8,
        }
    }
}

/// Outcome of one item lookup inside a batch
enum ItemOutcome {
    Priced(PriceData),
    Absent,
    Failed,
}

pub struct PriceReconciler {
    source: Arc<dyn PriceSource>,
    cache: Arc<dyn PriceCache>,
    scorer: ConfidenceScorer,
    config: ReconcilerConfig,
    consecutive_batch_failures: AtomicUsize,
}

impl PriceReconciler {
    pub fn new(
        source: Arc<dyn PriceSource>,
        cache: Arc<dyn PriceCache>,
        scorer: ConfidenceScorer,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            source,
            cache,
            scorer,
            config,
            consecutive_batch_failures: AtomicUsize::new(0),
        }
    }

    pub fn source(&self) -> &Arc<dyn PriceSource> {
        &self.source
    }

    pub fn scorer(&self) -> &ConfidenceScorer {
        &self.scorer
    }

    /// Best price for one item, or `None` when absent, unreachable or older
    /// than `max_staleness_hours`
    pub async fn get_best_price(
        &self,
        item_id: ItemId,
        max_staleness_hours: f64,
        include_volume: bool,
    ) -> Option<PriceData> {
        match self
            .try_best_price(item_id, max_staleness_hours, include_volume)
            .await
        {
            Ok(price) => price,
            Err(e) => {
                warn!(
                    item_id = item_id,
                    category = e.category(),
                    error = %e,
                    "Price lookup failed"
                );
                None
            }
        }
    }

    /// Like [`get_best_price`](Self::get_best_price) but surfaces upstream failures
    pub async fn try_best_price(
        &self,
        item_id: ItemId,
        max_staleness_hours: f64,
        include_volume: bool,
    ) -> Result<Option<PriceData>, FetchError> {
        let now = Utc::now().timestamp();
        let key = CacheKey::new(item_id, include_volume);

        if let Some(cached) = self.cache.get(&key) {
            let age = cached.age_hours_at(now);
            if age <= max_staleness_hours {
                debug!(item_id = item_id, age_hours = age, "Cache hit");
                return Ok(Some(cached.rescored_at(&self.scorer, now)));
            }
            debug!(
                item_id = item_id,
                age_hours = age,
                max_staleness_hours = max_staleness_hours,
                "Cached price too old for caller, refetching"
            );
        }

        let fetched = tokio::time::timeout(
            self.config.item_timeout,
            self.fetch_observation(item_id, include_volume),
        )
        .await
        .map_err(|_| FetchError::Timeout(self.config.item_timeout.as_millis() as u64))??;

        let Some(observation) = fetched else {
            debug!(item_id = item_id, "No recorded prices");
            return Ok(None);
        };

        let data = observation.into_price_data(&self.scorer, now);
        if !data.has_any_price() {
            debug!(item_id = item_id, "Both prices zero");
            return Ok(None);
        }

        self.cache.set(key, data.clone(), self.config.cache_ttl);

        if data.age_hours > max_staleness_hours {
            debug!(
                item_id = item_id,
                age_hours = data.age_hours,
                max_staleness_hours = max_staleness_hours,
                "Rejecting stale price"
            );
            return Ok(None);
        }

        Ok(Some(data))
    }

    async fn fetch_observation(
        &self,
        item_id: ItemId,
        include_volume: bool,
    ) -> Result<Option<PriceObservation>, FetchError> {
        if !include_volume {
            let latest = self.source.latest(item_id).await?;
            return Ok(latest.map(|l| PriceObservation::from_latest(item_id, &l)));
        }

        let (latest, series) = tokio::join!(
            self.source.latest(item_id),
            self.source.timeseries(item_id, TimeStep::Hour1)
        );

        let Some(latest) = latest? else {
            return Ok(None);
        };

        // Volume only enriches the estimate; losing it is not an item failure
        let analysis = match series {
            Ok(series) => volume::analyze(&series),
            Err(e) => {
                warn!(
                    item_id = item_id,
                    category = e.category(),
                    error = %e,
                    "Volume series unavailable"
                );
                None
            }
        };

        Ok(Some(
            PriceObservation::from_latest(item_id, &latest).with_volume(analysis),
        ))
    }

    /// Best prices for many items, keyed by item id. Items that are absent,
    /// stale or failing are simply missing from the map.
    pub async fn get_best_prices(
        &self,
        item_ids: &[ItemId],
        max_staleness_hours: f64,
        include_volume: bool,
    ) -> HashMap<ItemId, PriceData> {
        let mut prices = HashMap::with_capacity(item_ids.len());
        let batch_size = self.config.batch_size.max(1);
        let batches = item_ids.chunks(batch_size).count();

        for (index, chunk) in item_ids.chunks(batch_size).enumerate() {
            let lookups = stream::iter(chunk.iter().copied())
                .map(|id| async move {
                    let outcome = match self
                        .try_best_price(id, max_staleness_hours, include_volume)
                        .await
                    {
                        Ok(Some(price)) => ItemOutcome::Priced(price),
                        Ok(None) => ItemOutcome::Absent,
                        Err(e) => {
                            warn!(
                                item_id = id,
                                category = e.category(),
                                error = %e,
                                "Item dropped from batch"
                            );
                            ItemOutcome::Failed
                        }
                    };
                    (id, outcome)
                })
                .buffer_unordered(self.config.max_concurrency.max(1));
            tokio::pin!(lookups);

            // Finished items are kept even when the batch deadline cuts the rest off
            let deadline = tokio::time::Instant::now() + self.config.batch_timeout;
            let mut settled = 0usize;
            let mut failed = 0usize;
            loop {
                match tokio::time::timeout_at(deadline, lookups.next()).await {
                    Ok(Some((id, outcome))) => {
                        settled += 1;
                        match outcome {
                            ItemOutcome::Priced(price) => {
                                prices.insert(id, price);
                            }
                            ItemOutcome::Absent => {}
                            ItemOutcome::Failed => failed += 1,
                        }
                    }
                    Ok(None) => break,
                    Err(_) => {
                        warn!(
                            batch = index + 1,
                            timeout_ms = self.config.batch_timeout.as_millis() as u64,
                            unfinished = chunk.len() - settled,
                            "⏱️ Price batch timed out"
                        );
                        break;
                    }
                }
            }

            let lost = failed + (chunk.len() - settled);
            if lost == chunk.len() {
                self.record_batch_failure(index + 1, chunk.len());
            } else {
                self.consecutive_batch_failures.store(0, Ordering::Relaxed);
            }
            debug!(
                batch = index + 1,
                batches = batches,
                size = chunk.len(),
                failed = failed,
                unfinished = chunk.len() - settled,
                "Price batch complete"
            );

            if index + 1 < batches && !self.config.inter_batch_delay.is_zero() {
                tokio::time::sleep(self.config.inter_batch_delay).await;
            }
        }

        info!(
            requested = item_ids.len(),
            priced = prices.len(),
            batches = batches,
            "Batch price lookup complete"
        );
        prices
    }

    fn record_batch_failure(&self, batch: usize, size: usize) {
        let streak = self.consecutive_batch_failures.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(
            batch = batch,
            size = size,
            consecutive_failures = streak,
            "🚨 Every item in batch failed"
        );
    }

    /// Consecutive fully-failed batches. Exposed for operators; never tripped here.
    pub fn consecutive_batch_failures(&self) -> usize {
        self.consecutive_batch_failures.load(Ordering::Relaxed)
    }

    pub fn reset_batch_failures(&self) {
        self.consecutive_batch_failures.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::cache::MemoryCache;
    use crate::oracle::sources::MockPriceSource;
    use crate::types::{DataQuality, LatestPrice, TimeseriesPoint};
    use mockall::predicate::eq;

    fn now() -> i64 {
        Utc::now().timestamp()
    }

    fn latest(high: i64, low: i64, age_secs: i64) -> LatestPrice {
        let ts = now() - age_secs;
        LatestPrice {
            high: Some(high),
            high_time: Some(ts),
            low: Some(low),
            low_time: Some(ts),
        }
    }

    fn config() -> ReconcilerConfig {
        ReconcilerConfig {
            inter_batch_delay: Duration::ZERO,
            ..ReconcilerConfig::default()
        }
    }

    fn reconciler(source: MockPriceSource) -> PriceReconciler {
        PriceReconciler::new(
            Arc::new(source),
            Arc::new(MemoryCache::new()),
            ConfidenceScorer::default(),
            config(),
        )
    }

    #[tokio::test]
    async fn fresh_price_is_annotated_and_cached() {
        let mut source = MockPriceSource::new();
        source
            .expect_latest()
            .with(eq(2434))
            .times(1)
            .returning(|_| Ok(Some(latest(1200, 1100, 120))));
        let reconciler = reconciler(source);

        let price = reconciler.get_best_price(2434, 24.0, false).await.unwrap();
        assert_eq!(price.high_price, 1200);
        assert_eq!(price.quality, DataQuality::Fresh);
        assert!(price.confidence_score() > 0.9);

        // Served from cache: the mock would panic on a second call
        let again = reconciler.get_best_price(2434, 24.0, false).await.unwrap();
        assert_eq!(again.timestamp, price.timestamp);
        assert_eq!(again.low_price, price.low_price);
    }

    #[tokio::test]
    async fn zero_prices_are_absent() {
        let mut source = MockPriceSource::new();
        source
            .expect_latest()
            .returning(|_| Ok(Some(LatestPrice::default())));
        let reconciler = reconciler(source);

        assert!(reconciler.get_best_price(1, 24.0, false).await.is_none());
    }

    #[tokio::test]
    async fn identical_prices_are_kept_but_flagged() {
        let mut source = MockPriceSource::new();
        source
            .expect_latest()
            .returning(|_| Ok(Some(latest(500, 500, 60))));
        let reconciler = reconciler(source);

        let price = reconciler.get_best_price(7, 24.0, false).await.unwrap();
        assert!(price.is_suspicious());
        assert_eq!(price.spread(), 0);
    }

    #[tokio::test]
    async fn upstream_errors_degrade_to_none() {
        let mut source = MockPriceSource::new();
        source
            .expect_latest()
            .returning(|_| Err(FetchError::Http { status: 503 }));
        let reconciler = reconciler(source);

        assert!(reconciler.get_best_price(1, 24.0, false).await.is_none());
        assert!(matches!(
            reconciler.try_best_price(1, 24.0, false).await,
            Err(FetchError::Http { status: 503 })
        ));
    }

    #[tokio::test]
    async fn volume_analysis_feeds_side_volumes() {
        let mut source = MockPriceSource::new();
        source
            .expect_latest()
            .returning(|_| Ok(Some(latest(1200, 1100, 60))));
        source
            .expect_timeseries()
            .with(eq(2434), eq(TimeStep::Hour1))
            .returning(|_, _| {
                Ok((0..24)
                    .map(|i| TimeseriesPoint {
                        timestamp: i * 3600,
                        avg_high_price: Some(1200),
                        avg_low_price: Some(1100),
                        high_price_volume: 60,
                        low_price_volume: 50,
                    })
                    .collect())
            });
        let reconciler = reconciler(source);

        let price = reconciler.get_best_price(2434, 24.0, true).await.unwrap();
        assert_eq!(price.volume_high, 24 * 60);
        assert_eq!(price.volume_low, 24 * 50);
        let analysis = price.volume_analysis.as_ref().unwrap();
        assert!(analysis.trading_activity.is_active());
    }

    #[tokio::test]
    async fn missing_volume_series_keeps_price() {
        let mut source = MockPriceSource::new();
        source
            .expect_latest()
            .returning(|_| Ok(Some(latest(1200, 1100, 60))));
        source
            .expect_timeseries()
            .returning(|_, _| Err(FetchError::Transport("reset".into())));
        let reconciler = reconciler(source);

        let price = reconciler.get_best_price(2434, 24.0, true).await.unwrap();
        assert!(price.volume_analysis.is_none());
        assert_eq!(price.total_volume(), 0);
    }

    #[tokio::test]
    async fn fully_failed_batches_build_a_streak() {
        let mut source = MockPriceSource::new();
        source
            .expect_latest()
            .returning(|id| {
                if id < 100 {
                    Err(FetchError::Timeout(10))
                } else {
                    Ok(Some(latest(500, 400, 60)))
                }
            });
        let reconciler = PriceReconciler::new(
            Arc::new(source),
            Arc::new(MemoryCache::new()),
            ConfidenceScorer::default(),
            ReconcilerConfig {
                batch_size: 2,
                ..config()
            },
        );

        let prices = reconciler.get_best_prices(&[1, 2, 3, 4], 24.0, false).await;
        assert!(prices.is_empty());
        assert_eq!(reconciler.consecutive_batch_failures(), 2);

        let prices = reconciler.get_best_prices(&[5, 100], 24.0, false).await;
        assert_eq!(prices.len(), 1);
        assert_eq!(reconciler.consecutive_batch_failures(), 0);
    }
}
