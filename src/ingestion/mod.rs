//! Ingestion module - catalog bootstrap and priority-ordered price refresh
//!
//! A run loads the item catalog, orders items so decanting families and
//! high-value items are priced first, then pushes them through the reconciler
//! in waves and persists each wave as it lands.

use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::decanting::{discover_families, PotionFamily};
use crate::oracle::sources::PriceSource;
use crate::oracle::PriceReconciler;
use crate::persistence::PriceStore;
use crate::types::{ItemId, ItemMapping};

/// Item catalog plus the potion families derived from it
#[derive(Debug, Clone)]
pub struct Catalog {
    pub items: Vec<ItemMapping>,
    pub families: Vec<PotionFamily>,
    /// Unix seconds
    pub loaded_at: i64,
}

impl Catalog {
    pub fn new(items: Vec<ItemMapping>) -> Self {
        let families = discover_families(&items);
        Self {
            items,
            families,
            loaded_at: Utc::now().timestamp(),
        }
    }

    /// Fetch `/mapping`. Failure here is fatal for the run.
    pub async fn fetch(source: &dyn PriceSource) -> Result<Self> {
        let items = source
            .mapping()
            .await
            .with_context(|| format!("Failed to load item catalog from {}", source.name()))?;
        if items.is_empty() {
            anyhow::bail!("Item catalog from {} is empty", source.name());
        }

        let catalog = Self::new(items);
        info!(
            items = catalog.items.len(),
            families = catalog.families.len(),
            "📚 Item catalog loaded"
        );
        Ok(catalog)
    }

    pub fn get(&self, item_id: ItemId) -> Option<&ItemMapping> {
        self.items.iter().find(|item| item.id == item_id)
    }
}

#[derive(Debug, Clone)]
pub struct IngestionConfig {
    /// Items per persisted wave
    pub batch_size: usize,
    pub max_staleness_hours: f64,
    pub high_value_threshold: i64,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_staleness_hours: 24.0,
            high_value_threshold: 100_000,
        }
    }
}

/// Summary of one ingestion run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestionReport {
    pub catalog_items: usize,
    pub families: usize,
    pub requested: usize,
    pub priced: usize,
    pub persisted: usize,
    pub persist_errors: usize,
    pub consecutive_batch_failures: usize,
    pub elapsed: Duration,
}

impl IngestionReport {
    /// Fraction of requested items that came back priced
    pub fn coverage(&self) -> f64 {
        if self.requested == 0 {
            0.0
        } else {
            self.priced as f64 / self.requested as f64
        }
    }
}

/// Family members first, then items worth at least `high_value_threshold`,
/// then everything else. Ties break on item id.
pub fn prioritize(catalog: &Catalog, high_value_threshold: i64) -> Vec<ItemId> {
    let family_members: HashSet<ItemId> = catalog
        .families
        .iter()
        .flat_map(|f| f.member_ids())
        .collect();

    let tier = |item: &ItemMapping| -> u8 {
        if family_members.contains(&item.id) {
            0
        } else if item.value >= high_value_threshold {
            1
        } else {
            2
        }
    };

    let mut ordered: Vec<(u8, ItemId)> = catalog.items.iter().map(|i| (tier(i), i.id)).collect();
    ordered.sort_unstable();
    ordered.dedup_by_key(|(_, id)| *id);
    ordered.into_iter().map(|(_, id)| id).collect()
}

pub struct Ingestor {
    reconciler: Arc<PriceReconciler>,
    store: Option<Arc<dyn PriceStore>>,
    config: IngestionConfig,
}

impl Ingestor {
    pub fn new(
        reconciler: Arc<PriceReconciler>,
        store: Option<Arc<dyn PriceStore>>,
        config: IngestionConfig,
    ) -> Self {
        Self {
            reconciler,
            store,
            config,
        }
    }

    /// Load the catalog and refresh every item in it
    pub async fn run(&self) -> Result<IngestionReport> {
        let catalog = Catalog::fetch(self.reconciler.source().as_ref()).await?;
        Ok(self.run_with_catalog(&catalog).await)
    }

    /// Refresh prices for an already loaded catalog. Per-item and per-wave
    /// failures are logged and counted, never returned.
    pub async fn run_with_catalog(&self, catalog: &Catalog) -> IngestionReport {
        let started = Instant::now();
        let order = prioritize(catalog, self.config.high_value_threshold);
        let wave_size = self.config.batch_size.max(1);
        let waves = order.chunks(wave_size).count();

        let mut report = IngestionReport {
            catalog_items: catalog.items.len(),
            families: catalog.families.len(),
            requested: order.len(),
            ..IngestionReport::default()
        };

        info!(items = order.len(), waves = waves, "🚀 Ingestion started");

        for (index, wave) in order.chunks(wave_size).enumerate() {
            let prices = self
                .reconciler
                .get_best_prices(wave, self.config.max_staleness_hours, false)
                .await;
            report.priced += prices.len();

            if let Some(store) = &self.store {
                let mut rows: Vec<_> = prices.into_values().collect();
                rows.sort_by_key(|p| p.item_id);
                match store.save_prices(&rows).await {
                    Ok(written) => report.persisted += written,
                    Err(e) => {
                        report.persist_errors += 1;
                        error!(wave = index + 1, error = %e, "Failed to persist price wave");
                    }
                }
            }
        }

        report.consecutive_batch_failures = self.reconciler.consecutive_batch_failures();
        report.elapsed = started.elapsed();

        if report.consecutive_batch_failures > 0 {
            warn!(
                consecutive_failures = report.consecutive_batch_failures,
                "Ingestion finished with failing batches"
            );
        }
        info!(
            requested = report.requested,
            priced = report.priced,
            persisted = report.persisted,
            coverage_pct = report.coverage() * 100.0,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "✅ Ingestion complete"
        );
        report
    }
}
