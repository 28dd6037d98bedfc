//! In-process query surface
//!
//! `OracleService` is what callers talk to: single and multi-item price
//! lookups plus the decanting scan. It owns the reconciler and a lazily
//! loaded item catalog.

use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::decanting::{DecantingConfig, DecantingEngine, DecantingOpportunity, PotionFamily};
use crate::ingestion::Catalog;
use crate::oracle::{PriceReconciler, TradingConfidence, TradingConfidenceScorer};
use crate::persistence::PriceStore;
use crate::types::{ItemId, PriceData, TimeStep};

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub default_max_staleness_hours: f64,
    pub decanting: DecantingConfig,
    pub decanting_max_staleness_hours: f64,
    pub decanting_include_volume: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            default_max_staleness_hours: 24.0,
            decanting: DecantingConfig::default(),
            decanting_max_staleness_hours: 6.0,
            decanting_include_volume: true,
        }
    }
}

pub struct OracleService {
    reconciler: Arc<PriceReconciler>,
    store: Option<Arc<dyn PriceStore>>,
    config: ServiceConfig,
    trading_scorer: TradingConfidenceScorer,
    catalog: RwLock<Option<Arc<Catalog>>>,
}

impl OracleService {
    pub fn new(
        reconciler: Arc<PriceReconciler>,
        store: Option<Arc<dyn PriceStore>>,
        config: ServiceConfig,
    ) -> Self {
        Self {
            reconciler,
            store,
            config,
            trading_scorer: TradingConfidenceScorer::default(),
            catalog: RwLock::new(None),
        }
    }

    pub fn reconciler(&self) -> &Arc<PriceReconciler> {
        &self.reconciler
    }

    /// Cached catalog, loading it on first use
    pub async fn catalog(&self) -> Result<Arc<Catalog>> {
        if let Some(catalog) = self.catalog.read().await.as_ref() {
            return Ok(Arc::clone(catalog));
        }
        self.refresh_catalog().await
    }

    /// Reload the catalog. On failure the previous catalog is kept.
    pub async fn refresh_catalog(&self) -> Result<Arc<Catalog>> {
        let catalog = Arc::new(Catalog::fetch(self.reconciler.source().as_ref()).await?);
        *self.catalog.write().await = Some(Arc::clone(&catalog));
        Ok(catalog)
    }

    /// Best price for one item; `max_staleness_hours` falls back to the configured default
    pub async fn get_best_price_data(
        &self,
        item_id: ItemId,
        max_staleness_hours: Option<f64>,
        include_volume: bool,
    ) -> Option<PriceData> {
        let max_staleness = max_staleness_hours.unwrap_or(self.config.default_max_staleness_hours);
        self.reconciler
            .get_best_price(item_id, max_staleness, include_volume)
            .await
    }

    /// Prices for many items, with volume analysis when `include_volume` is
    /// set. Missing ids were absent, stale or failing upstream.
    pub async fn get_multiple_comprehensive_prices(
        &self,
        item_ids: &[ItemId],
        max_staleness_hours: Option<f64>,
        include_volume: bool,
    ) -> HashMap<ItemId, PriceData> {
        let max_staleness = max_staleness_hours.unwrap_or(self.config.default_max_staleness_hours);
        self.reconciler
            .get_best_prices(item_ids, max_staleness, include_volume)
            .await
    }

    /// Seven-factor trading confidence for one item. `None` when the item
    /// has no acceptable price.
    pub async fn get_trading_confidence(
        &self,
        item_id: ItemId,
        max_staleness_hours: Option<f64>,
    ) -> Option<TradingConfidence> {
        let price = self
            .get_best_price_data(item_id, max_staleness_hours, true)
            .await?;

        let history = match self
            .reconciler
            .source()
            .timeseries(item_id, TimeStep::Hour1)
            .await
        {
            Ok(history) => history,
            Err(e) => {
                warn!(
                    item_id = item_id,
                    category = e.category(),
                    error = %e,
                    "History unavailable for trading confidence"
                );
                Vec::new()
            }
        };

        let catalog = self.catalog.read().await.clone();
        let item = catalog.as_ref().and_then(|c| c.get(item_id));
        Some(self.trading_scorer.score(&price, &history, item))
    }

    /// Families with current prices attached
    pub async fn priced_families(&self) -> Result<Vec<PotionFamily>> {
        let catalog = self.catalog().await?;
        let ids: Vec<ItemId> = catalog
            .families
            .iter()
            .flat_map(|f| f.member_ids())
            .collect();

        let prices = self
            .reconciler
            .get_best_prices(
                &ids,
                self.config.decanting_max_staleness_hours,
                self.config.decanting_include_volume,
            )
            .await;
        debug!(members = ids.len(), priced = prices.len(), "Family prices fetched");

        Ok(catalog
            .families
            .iter()
            .map(|family| family.with_prices(&prices))
            .collect())
    }

    /// Best conversion per family earning at least `min_profit_gp`, highest
    /// margin first. Errors only when the catalog cannot be loaded.
    pub async fn get_decanting_opportunities(
        &self,
        min_profit_gp: i64,
    ) -> Result<Vec<DecantingOpportunity>> {
        let families = self.priced_families().await?;
        let engine = DecantingEngine::new(DecantingConfig {
            min_profit_threshold: min_profit_gp,
            ..self.config.decanting.clone()
        });
        let opportunities = engine.find_opportunities(&families);

        if let Some(best) = opportunities.first() {
            info!(
                family = %best.family,
                from_dose = best.from_dose,
                to_dose = best.to_dose,
                profit = best.profit_per_conversion,
                margin_pct = best.profit_margin_pct,
                "💰 Top decanting opportunity"
            );
        }

        if let Some(store) = &self.store {
            if let Err(e) = store.save_opportunities(&opportunities).await {
                error!(error = %e, "Failed to persist decanting opportunities");
            }
        }

        Ok(opportunities)
    }
}
