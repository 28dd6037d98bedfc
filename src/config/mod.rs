//! Configuration management for the GE oracle
//!
//! Loads built-in defaults, optional `config/default` and `config/local` files,
//! then `GE_ORACLE__*` environment variables (after `.env`).

mod types;

pub use types::*;

use anyhow::{bail, Context, Result};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use serde::Deserialize;
use std::time::Duration;

use crate::decanting::DecantingConfig;
use crate::ingestion::IngestionConfig;
use crate::oracle::sources::WikiClientConfig;
use crate::oracle::ReconcilerConfig;
use crate::service::ServiceConfig;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub reconciliation: ReconciliationConfig,
    pub decanting: DecantingSettings,
    pub ingestion: IngestionSettings,
    pub persistence: PersistenceConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Real-time prices API root
    pub base_url: String,
    /// Contact-bearing user agent; the API rejects anonymous clients
    pub user_agent: String,
    pub request_timeout_ms: u64,
    /// Retries per request for transient failures
    pub max_retries: u32,
    pub min_request_interval_ms: u64,
    /// Idle pooled connections are closed after this long
    pub pool_idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconciliationConfig {
    pub cache_ttl_secs: u64,
    pub batch_size: usize,
    pub batch_delay_ms: u64,
    pub batch_timeout_secs: u64,
    pub item_timeout_secs: u64,
    pub max_concurrency: usize,
    pub default_max_staleness_hours: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DecantingSettings {
    /// Minimum profit per conversion in GP
    pub min_profit_gp: i64,
    pub max_staleness_hours: f64,
    pub tax_model: TaxModel,
    /// Fetch hourly series so opportunities carry volumes
    pub include_volume: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestionSettings {
    /// Items per persisted wave; each wave goes through the reconciler's batching
    pub batch_size: usize,
    pub refresh_interval_secs: u64,
    pub max_staleness_hours: f64,
    /// Items worth at least this much are fetched ahead of the long tail
    pub high_value_threshold: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    /// Data directory
    pub data_dir: String,
    /// Enable CSV logging
    pub csv_enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset
    pub level: String,
    pub json: bool,
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::with_defaults(Config::builder())
            .context("Failed to set configuration defaults")?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (GE_ORACLE__*)
            .add_source(Environment::with_prefix("GE_ORACLE").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.validate()?;
        Ok(app_config)
    }

    /// Built-in defaults only, no files or environment
    pub fn defaults() -> Result<Self> {
        let config = Self::with_defaults(Config::builder())?
            .build()
            .context("Failed to build default configuration")?;
        config
            .try_deserialize()
            .context("Failed to deserialize default configuration")
    }

    fn with_defaults(
        builder: ConfigBuilder<DefaultState>,
    ) -> Result<ConfigBuilder<DefaultState>, config::ConfigError> {
        builder
            // API defaults
            .set_default("api.base_url", crate::oracle::sources::WIKI_BASE_URL)?
            .set_default(
                "api.user_agent",
                concat!("ge-oracle/", env!("CARGO_PKG_VERSION")),
            )?
            .set_default("api.request_timeout_ms", 10_000)?
            .set_default("api.max_retries", 3)?
            .set_default("api.min_request_interval_ms", 100)?
            .set_default("api.pool_idle_timeout_secs", 30)?
            // Reconciliation defaults
            .set_default("reconciliation.cache_ttl_secs", 300)?
            .set_default("reconciliation.batch_size", 50)?
            .set_default("reconciliation.batch_delay_ms", 500)?
            .set_default("reconciliation.batch_timeout_secs", 120)?
            .set_default("reconciliation.item_timeout_secs", 45)?
            .set_default("reconciliation.max_concurrency", 8)?
            .set_default("reconciliation.default_max_staleness_hours", 24.0)?
            // Decanting defaults
            .set_default("decanting.min_profit_gp", 100)?
            .set_default("decanting.max_staleness_hours", 6.0)?
            .set_default("decanting.tax_model", "grand_exchange")?
            .set_default("decanting.include_volume", true)?
            // Ingestion defaults
            .set_default("ingestion.batch_size", 100)?
            .set_default("ingestion.refresh_interval_secs", 300)?
            .set_default("ingestion.max_staleness_hours", 24.0)?
            .set_default("ingestion.high_value_threshold", 100_000)?
            // Persistence defaults
            .set_default("persistence.data_dir", "./data")?
            .set_default("persistence.csv_enabled", true)?
            // Logging defaults
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)
    }

    /// Reject values that would stall or divide by zero downstream
    pub fn validate(&self) -> Result<()> {
        if self.reconciliation.batch_size == 0 || self.ingestion.batch_size == 0 {
            bail!("batch_size must be at least 1");
        }
        if self.reconciliation.max_concurrency == 0 {
            bail!("max_concurrency must be at least 1");
        }
        if self.api.user_agent.trim().is_empty() {
            bail!("api.user_agent must not be empty");
        }
        for (name, hours) in [
            ("reconciliation.default_max_staleness_hours", self.reconciliation.default_max_staleness_hours),
            ("decanting.max_staleness_hours", self.decanting.max_staleness_hours),
            ("ingestion.max_staleness_hours", self.ingestion.max_staleness_hours),
        ] {
            if hours.is_nan() || hours <= 0.0 {
                bail!("{} must be positive, got {}", name, hours);
            }
        }
        Ok(())
    }

    pub fn client_config(&self) -> WikiClientConfig {
        WikiClientConfig {
            base_url: self.api.base_url.clone(),
            user_agent: self.api.user_agent.clone(),
            request_timeout: Duration::from_millis(self.api.request_timeout_ms),
            max_retries: self.api.max_retries,
            min_request_interval: Duration::from_millis(self.api.min_request_interval_ms),
            pool_idle_timeout: Duration::from_secs(self.api.pool_idle_timeout_secs),
        }
    }

    pub fn reconciler_config(&self) -> ReconcilerConfig {
        let r = &self.reconciliation;
        ReconcilerConfig {
            cache_ttl: Duration::from_secs(r.cache_ttl_secs),
            batch_size: r.batch_size,
            inter_batch_delay: Duration::from_millis(r.batch_delay_ms),
            batch_timeout: Duration::from_secs(r.batch_timeout_secs),
            item_timeout: Duration::from_secs(r.item_timeout_secs),
            max_concurrency: r.max_concurrency,
        }
    }

    pub fn decanting_config(&self) -> DecantingConfig {
        DecantingConfig {
            min_profit_threshold: self.decanting.min_profit_gp,
            tax: self.decanting.tax_model.policy(),
            ..DecantingConfig::default()
        }
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            default_max_staleness_hours: self.reconciliation.default_max_staleness_hours,
            decanting: self.decanting_config(),
            decanting_max_staleness_hours: self.decanting.max_staleness_hours,
            decanting_include_volume: self.decanting.include_volume,
        }
    }

    pub fn ingestion_config(&self) -> IngestionConfig {
        IngestionConfig {
            batch_size: self.ingestion.batch_size,
            max_staleness_hours: self.ingestion.max_staleness_hours,
            high_value_threshold: self.ingestion.high_value_threshold,
        }
    }

    /// Generate a one-line digest of the config for logging
    pub fn digest(&self) -> String {
        format!(
            "api={} batch={} concurrency={} ttl={}s min_profit={} tax={} refresh={}s csv={}",
            self.api.base_url,
            self.reconciliation.batch_size,
            self.reconciliation.max_concurrency,
            self.reconciliation.cache_ttl_secs,
            self.decanting.min_profit_gp,
            self.decanting.tax_model,
            self.ingestion.refresh_interval_secs,
            self.persistence.csv_enabled
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}
