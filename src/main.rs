//! ge-oracle
//!
//! Keeps Grand Exchange prices fresh and scans potion families for decanting
//! margins until interrupted.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ge_oracle::config::{AppConfig, LoggingConfig};
use ge_oracle::ingestion::Ingestor;
use ge_oracle::oracle::sources::{PriceSource, WikiPricesClient};
use ge_oracle::oracle::{ConfidenceScorer, MemoryCache, PriceReconciler};
use ge_oracle::persistence::{CsvPriceStore, PriceStore};
use ge_oracle::service::OracleService;

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    if logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config.logging);
    info!(config = %config, "⚙️ Configuration loaded");

    let client: Arc<dyn PriceSource> = Arc::new(WikiPricesClient::open(config.client_config())?);
    let sources = vec![client.clone()];
    let cache = Arc::new(MemoryCache::new());
    let reconciler = Arc::new(PriceReconciler::new(
        client,
        cache.clone(),
        ConfidenceScorer::for_sources(&sources),
        config.reconciler_config(),
    ));

    let store: Option<Arc<dyn PriceStore>> = if config.persistence.csv_enabled {
        let csv: Arc<dyn PriceStore> = Arc::new(CsvPriceStore::new(&config.persistence.data_dir)?);
        Some(csv)
    } else {
        None
    };

    let service = OracleService::new(reconciler.clone(), store.clone(), config.service_config());
    let ingestor = Ingestor::new(reconciler.clone(), store, config.ingestion_config());

    // Without a catalog there is nothing to ingest or scan
    service.catalog().await?;

    let mut ticker =
        tokio::time::interval(Duration::from_secs(config.ingestion.refresh_interval_secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        refresh_secs = config.ingestion.refresh_interval_secs,
        "🟢 ge-oracle running, Ctrl-C to stop"
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("🛑 Shutdown requested");
                break;
            }
            _ = async {
                ticker.tick().await;
                run_cycle(&service, &ingestor, &cache, config.decanting.min_profit_gp).await;
            } => {}
        }
    }

    Ok(())
}

async fn run_cycle(
    service: &OracleService,
    ingestor: &Ingestor,
    cache: &MemoryCache,
    min_profit_gp: i64,
) {
    let purged = cache.purge_expired();
    if purged > 0 {
        info!(purged = purged, "Expired cache entries removed");
    }

    let catalog = match service.refresh_catalog().await {
        Ok(catalog) => catalog,
        Err(e) => {
            warn!(error = %e, "Catalog refresh failed, reusing previous catalog");
            match service.catalog().await {
                Ok(catalog) => catalog,
                Err(e) => {
                    error!(error = %e, "No catalog available, skipping cycle");
                    return;
                }
            }
        }
    };

    let report = ingestor.run_with_catalog(&catalog).await;
    if report.consecutive_batch_failures > 0 {
        warn!(
            consecutive_failures = report.consecutive_batch_failures,
            "Upstream looks unhealthy"
        );
        service.reconciler().reset_batch_failures();
    }

    match service.get_decanting_opportunities(min_profit_gp).await {
        Ok(opportunities) => {
            for opp in opportunities.iter().take(5) {
                info!(
                    family = %opp.family,
                    from_dose = opp.from_dose,
                    to_dose = opp.to_dose,
                    profit = opp.profit_per_conversion,
                    margin_pct = opp.profit_margin_pct,
                    risk = %opp.risk_level,
                    confidence = opp.confidence_score,
                    "🧪 Decant"
                );
            }
        }
        Err(e) => error!(error = %e, "Decanting scan failed"),
    }
}
