//! End-to-end tests for reconciliation, decanting and ingestion

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use ge_oracle::decanting::RiskLevel;
    use ge_oracle::ingestion::{IngestionConfig, Ingestor};
    use ge_oracle::oracle::sources::{FetchError, PriceSource};
    use ge_oracle::oracle::{
        CacheKey, ConfidenceScorer, MemoryCache, PriceCache, PriceReconciler, ReconcilerConfig,
    };
    use ge_oracle::persistence::{CsvPriceStore, PriceStore};
    use ge_oracle::service::{OracleService, ServiceConfig};
    use ge_oracle::types::{
        DataQuality, ItemId, ItemMapping, LatestPrice, PriceBucket, PriceObservation, TimeStep,
        TimeseriesPoint,
    };

    // ============================================================================
    // Fake upstream
    // ============================================================================

    #[derive(Default)]
    struct FakeSource {
        catalog: Vec<ItemMapping>,
        mapping_error: Option<FetchError>,
        latest: HashMap<ItemId, LatestPrice>,
        failing: HashSet<ItemId>,
        hanging: HashSet<ItemId>,
        latest_calls: AtomicUsize,
    }

    impl FakeSource {
        fn with_price(mut self, item_id: ItemId, high: i64, low: i64, age_secs: i64) -> Self {
            let ts = Utc::now().timestamp() - age_secs;
            self.latest.insert(
                item_id,
                LatestPrice {
                    high: Some(high),
                    high_time: Some(ts),
                    low: Some(low),
                    low_time: Some(ts),
                },
            );
            self
        }

        fn failing(mut self, ids: &[ItemId]) -> Self {
            self.failing.extend(ids.iter().copied());
            self
        }

        /// Lookups for these ids never answer
        fn hanging(mut self, ids: &[ItemId]) -> Self {
            self.hanging.extend(ids.iter().copied());
            self
        }

        fn calls(&self) -> usize {
            self.latest_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PriceSource for FakeSource {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn reliability(&self) -> f64 {
            0.1
        }

        async fn mapping(&self) -> Result<Vec<ItemMapping>, FetchError> {
            match &self.mapping_error {
                Some(e) => Err(e.clone()),
                None => Ok(self.catalog.clone()),
            }
        }

        async fn latest(&self, item_id: ItemId) -> Result<Option<LatestPrice>, FetchError> {
            self.latest_calls.fetch_add(1, Ordering::SeqCst);
            if self.hanging.contains(&item_id) {
                std::future::pending::<()>().await;
            }
            if self.failing.contains(&item_id) {
                return Err(FetchError::Transport("connection reset".into()));
            }
            Ok(self.latest.get(&item_id).copied())
        }

        async fn latest_all(&self) -> Result<HashMap<ItemId, LatestPrice>, FetchError> {
            Ok(self.latest.clone())
        }

        async fn bucket(
            &self,
            _step: TimeStep,
            _timestamp: Option<i64>,
        ) -> Result<PriceBucket, FetchError> {
            Ok(PriceBucket::default())
        }

        async fn timeseries(
            &self,
            item_id: ItemId,
            _step: TimeStep,
        ) -> Result<Vec<TimeseriesPoint>, FetchError> {
            if !self.latest.contains_key(&item_id) {
                return Ok(Vec::new());
            }
            let now = Utc::now().timestamp();
            Ok((0..24)
                .map(|i| TimeseriesPoint {
                    timestamp: now - (24 - i) * 3600,
                    avg_high_price: Some(1000),
                    avg_low_price: Some(990),
                    high_price_volume: 10,
                    low_price_volume: 10,
                })
                .collect())
        }
    }

    fn item(id: ItemId, name: &str, value: i64) -> ItemMapping {
        ItemMapping {
            id,
            name: name.to_string(),
            examine: String::new(),
            members: true,
            lowalch: None,
            highalch: None,
            limit: Some(2000),
            value,
            icon: String::new(),
        }
    }

    fn test_config() -> ReconcilerConfig {
        ReconcilerConfig {
            cache_ttl: Duration::from_secs(300),
            batch_size: 4,
            inter_batch_delay: Duration::ZERO,
            batch_timeout: Duration::from_secs(10),
            item_timeout: Duration::from_secs(5),
            max_concurrency: 4,
        }
    }

    fn reconciler(source: Arc<FakeSource>, cache: Arc<MemoryCache>) -> PriceReconciler {
        PriceReconciler::new(source, cache, ConfidenceScorer::single_source(), test_config())
    }

    // ============================================================================
    // Reconciliation
    // ============================================================================

    #[tokio::test]
    async fn staleness_gate_rejects_old_prices() {
        let source = Arc::new(FakeSource::default().with_price(2434, 1200, 1100, 10 * 3600));
        let oracle = reconciler(source, Arc::new(MemoryCache::new()));

        assert!(oracle.get_best_price(2434, 5.0, false).await.is_none());

        let accepted = oracle.get_best_price(2434, 24.0, false).await.unwrap();
        assert!(accepted.age_hours <= 24.0);
        assert_eq!(accepted.quality, DataQuality::Acceptable);
    }

    #[tokio::test]
    async fn batch_isolates_failing_items() {
        let ids: Vec<ItemId> = (1..=10).collect();
        let mut source = FakeSource::default().failing(&[2, 5, 9]);
        for &id in &ids {
            source = source.with_price(id, 100 + i64::from(id), 90, 60);
        }
        let oracle = reconciler(Arc::new(source), Arc::new(MemoryCache::new()));

        let prices = oracle.get_best_prices(&ids, 24.0, false).await;

        assert_eq!(prices.len(), 7);
        for failed in [2, 5, 9] {
            assert!(!prices.contains_key(&failed));
        }
        assert_eq!(prices[&10].high_price, 110);
        assert_eq!(oracle.consecutive_batch_failures(), 0);
    }

    fn priced_ids(source: FakeSource, ids: &[ItemId]) -> FakeSource {
        ids.iter().fold(source, |source, &id| {
            source.with_price(id, 100 + i64::from(id), 90, 60)
        })
    }

    #[tokio::test]
    async fn hung_items_time_out_without_sinking_the_batch() {
        let ids: Vec<ItemId> = (1..=10).collect();
        let source = priced_ids(FakeSource::default().hanging(&[2, 5, 9]), &ids);
        let oracle = Arc::new(PriceReconciler::new(
            Arc::new(source),
            Arc::new(MemoryCache::new()),
            ConfidenceScorer::single_source(),
            ReconcilerConfig {
                batch_size: 10,
                item_timeout: Duration::from_millis(100),
                batch_timeout: Duration::from_secs(5),
                ..test_config()
            },
        ));
        let service = OracleService::new(oracle.clone(), None, ServiceConfig::default());

        let prices = service
            .get_multiple_comprehensive_prices(&ids, Some(24.0), false)
            .await;

        assert_eq!(prices.len(), 7);
        for hung in [2, 5, 9] {
            assert!(!prices.contains_key(&hung));
        }
        assert_eq!(oracle.consecutive_batch_failures(), 0);
    }

    #[tokio::test]
    async fn batch_deadline_keeps_finished_items() {
        let ids: Vec<ItemId> = (1..=10).collect();
        let source = priced_ids(
            FakeSource::default().failing(&[2, 5]).hanging(&[10]),
            &ids,
        );
        let oracle = PriceReconciler::new(
            Arc::new(source),
            Arc::new(MemoryCache::new()),
            ConfidenceScorer::single_source(),
            ReconcilerConfig {
                batch_size: 10,
                max_concurrency: 1,
                item_timeout: Duration::from_secs(30),
                batch_timeout: Duration::from_millis(200),
                ..test_config()
            },
        );

        let prices = oracle.get_best_prices(&ids, 24.0, false).await;

        assert_eq!(prices.len(), 7);
        assert!(!prices.contains_key(&10));
        assert_eq!(prices[&9].high_price, 109);
        assert_eq!(oracle.consecutive_batch_failures(), 0);
    }

    #[tokio::test]
    async fn batch_deadline_with_nothing_finished_counts_as_failure() {
        let ids: Vec<ItemId> = (1..=4).collect();
        let source = priced_ids(FakeSource::default().hanging(&ids), &ids);
        let oracle = PriceReconciler::new(
            Arc::new(source),
            Arc::new(MemoryCache::new()),
            ConfidenceScorer::single_source(),
            ReconcilerConfig {
                item_timeout: Duration::from_secs(30),
                batch_timeout: Duration::from_millis(100),
                ..test_config()
            },
        );

        assert!(oracle.get_best_prices(&ids, 24.0, false).await.is_empty());
        assert_eq!(oracle.consecutive_batch_failures(), 1);
    }

    #[tokio::test]
    async fn fully_failing_batches_are_counted() {
        let ids: Vec<ItemId> = (1..=8).collect();
        let source = Arc::new(FakeSource::default().failing(&ids));
        let oracle = reconciler(source, Arc::new(MemoryCache::new()));

        let prices = oracle.get_best_prices(&ids, 24.0, false).await;

        assert!(prices.is_empty());
        // Two batches of four, both lost
        assert_eq!(oracle.consecutive_batch_failures(), 2);
        oracle.reset_batch_failures();
        assert_eq!(oracle.consecutive_batch_failures(), 0);
    }

    #[tokio::test]
    async fn cached_entry_is_revalidated_against_caller_staleness() {
        let now = Utc::now().timestamp();
        let cache = Arc::new(MemoryCache::new());
        // Scored when the observation was new, then left in the cache
        let ten_hours_old = PriceObservation {
            item_id: 2434,
            high_price: 1200,
            low_price: 1100,
            high_time: now - 10 * 3600,
            low_time: now - 10 * 3600,
            ..Default::default()
        }
        .into_price_data(&ConfidenceScorer::single_source(), now - 10 * 3600);
        assert_eq!(ten_hours_old.quality, DataQuality::Fresh);
        cache.set(
            CacheKey::new(2434, false),
            ten_hours_old,
            Duration::from_secs(3600),
        );

        // Upstream is down, so only the cache could answer
        let source = Arc::new(FakeSource::default().failing(&[2434]));
        let oracle = reconciler(source.clone(), cache);

        assert!(oracle.get_best_price(2434, 5.0, false).await.is_none());
        assert_eq!(source.calls(), 1);

        let cached = oracle.get_best_price(2434, 12.0, false).await.unwrap();
        assert_eq!(cached.high_price, 1200);
        assert_eq!(source.calls(), 1);
        // Served with its current age, not the age it was cached with
        assert_eq!(cached.quality, DataQuality::Acceptable);
        assert!(cached.age_hours >= 10.0);
    }

    #[tokio::test]
    async fn repeated_lookups_hit_the_cache() {
        let source = Arc::new(FakeSource::default().with_price(2434, 1200, 1100, 60));
        let cache = Arc::new(MemoryCache::new());
        let oracle = reconciler(source.clone(), cache.clone());

        let first = oracle.get_best_price(2434, 1.0, false).await.unwrap();
        let second = oracle.get_best_price(2434, 1.0, false).await.unwrap();

        assert_eq!(first.high_price, second.high_price);
        assert_eq!(first.timestamp, second.timestamp);
        assert_eq!(source.calls(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn volume_lookup_is_cached_separately() {
        let source = Arc::new(FakeSource::default().with_price(2434, 1200, 1100, 60));
        let cache = Arc::new(MemoryCache::new());
        let oracle = reconciler(source, cache.clone());

        let plain = oracle.get_best_price(2434, 1.0, false).await.unwrap();
        let rich = oracle.get_best_price(2434, 1.0, true).await.unwrap();

        assert!(plain.volume_analysis.is_none());
        let analysis = rich.volume_analysis.unwrap();
        assert_eq!(analysis.total_volume(), 480);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn never_traded_items_are_absent() {
        let source = Arc::new(FakeSource::default());
        let oracle = reconciler(source, Arc::new(MemoryCache::new()));
        assert!(oracle.get_best_price(1, 24.0, false).await.is_none());
    }

    // ============================================================================
    // Service and decanting
    // ============================================================================

    fn potion_source() -> FakeSource {
        let mut source = FakeSource::default()
            .with_price(2434, 1200, 1100, 60)
            .with_price(143, 350, 300, 60)
            .with_price(3024, 9000, 8900, 120)
            .with_price(3030, 4000, 3900, 120)
            .with_price(385, 900, 880, 60);
        source.catalog = vec![
            item(2434, "Prayer potion(4)", 380),
            item(143, "Prayer potion(1)", 152),
            item(3024, "Super restore(4)", 300),
            item(3030, "Super restore(1)", 120),
            item(385, "Shark", 1000),
        ];
        source
    }

    fn service(source: FakeSource, store: Option<Arc<dyn PriceStore>>) -> OracleService {
        let oracle = Arc::new(reconciler(Arc::new(source), Arc::new(MemoryCache::new())));
        OracleService::new(oracle, store, ServiceConfig::default())
    }

    #[tokio::test]
    async fn decanting_scan_reports_profitable_families_only() {
        let service = service(potion_source(), None);

        let opportunities = service.get_decanting_opportunities(100).await.unwrap();

        assert_eq!(opportunities.len(), 1);
        let opp = &opportunities[0];
        assert_eq!(opp.family, "Super restore");
        assert_eq!((opp.from_dose, opp.to_dose), (4, 1));
        assert_eq!(opp.target_potions, 3);
        assert_eq!(opp.profit_per_conversion, 3 * (3900 - 78) - 9000);
        assert_eq!(opp.risk_level, RiskLevel::Medium);
        assert_eq!(opp.data_quality, DataQuality::Fresh);
        assert_eq!(opp.from_volume, 480);
        assert!((0.0..=1.0).contains(&opp.confidence_score));
    }

    #[tokio::test]
    async fn decanting_threshold_filters_everything() {
        let service = service(potion_source(), None);
        assert!(service
            .get_decanting_opportunities(10_000)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn decanting_scan_fails_without_catalog() {
        let source = FakeSource {
            mapping_error: Some(FetchError::Http { status: 503 }),
            ..potion_source()
        };
        let service = service(source, None);
        assert!(service.get_decanting_opportunities(0).await.is_err());
    }

    #[tokio::test]
    async fn comprehensive_prices_follow_volume_flag() {
        let service = service(potion_source(), None);

        let prices = service
            .get_multiple_comprehensive_prices(&[2434, 143, 999], None, true)
            .await;
        assert_eq!(prices.len(), 2);
        assert!(prices.values().all(|p| p.volume_analysis.is_some()));

        let plain = service
            .get_multiple_comprehensive_prices(&[2434, 143], None, false)
            .await;
        assert_eq!(plain.len(), 2);
        assert!(plain.values().all(|p| p.volume_analysis.is_none()));
    }

    #[tokio::test]
    async fn trading_confidence_is_bounded() {
        let service = service(potion_source(), None);
        service.catalog().await.unwrap();

        let confidence = service.get_trading_confidence(2434, None).await.unwrap();
        assert!((0.0..=1.0).contains(&confidence.composite));
        assert!(service.get_trading_confidence(999, None).await.is_none());
    }

    // ============================================================================
    // Ingestion
    // ============================================================================

    #[tokio::test]
    async fn ingestion_fails_when_catalog_is_unavailable() {
        let source = FakeSource {
            mapping_error: Some(FetchError::Timeout(10_000)),
            ..FakeSource::default()
        };
        let oracle = Arc::new(reconciler(Arc::new(source), Arc::new(MemoryCache::new())));
        let ingestor = Ingestor::new(oracle, None, IngestionConfig::default());

        assert!(ingestor.run().await.is_err());
    }

    #[tokio::test]
    async fn ingestion_prices_and_persists_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CsvPriceStore::new(dir.path()).unwrap());
        let source = potion_source().failing(&[385]);
        let oracle = Arc::new(reconciler(Arc::new(source), Arc::new(MemoryCache::new())));
        let shared: Arc<dyn PriceStore> = store.clone();
        let ingestor = Ingestor::new(
            oracle,
            Some(shared),
            IngestionConfig {
                batch_size: 2,
                ..IngestionConfig::default()
            },
        );

        let report = ingestor.run().await.unwrap();

        assert_eq!(report.catalog_items, 5);
        assert_eq!(report.families, 2);
        assert_eq!(report.requested, 5);
        assert_eq!(report.priced, 4);
        assert_eq!(report.persisted, 4);
        assert_eq!(report.persist_errors, 0);
        assert_eq!(store.load_price_history(3024, 1).unwrap().len(), 1);
    }
}
