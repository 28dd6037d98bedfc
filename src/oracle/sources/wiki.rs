//! OSRS Wiki real-time prices REST client
//!
//! Endpoints documented at: https://oldschool.runescape.wiki/w/RuneScape:Real-time_Prices
//!
//! The client owns its connection pool for its whole lifetime. Dropping it
//! releases every pooled connection, and idle connections are force-closed after
//! `pool_idle_timeout` so a forgotten client cannot pin sockets.

use anyhow::{Context, Result};
use async_trait::async_trait;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{FetchError, PriceSource};
use crate::types::{
    BucketPrice, ItemId, ItemMapping, LatestPrice, PriceBucket, TimeStep, TimeseriesPoint,
};

pub const WIKI_BASE_URL: &str = "https://prices.runescape.wiki/api/v1/osrs";

const BASE_BACKOFF_MS: u64 = 250;
const MAX_BACKOFF_MS: u64 = 8_000;
const BACKOFF_JITTER_RATIO: f64 = 0.20;

/// Reliability of the wiki feed when reconciled against secondary sources
const WIKI_RELIABILITY: f64 = 0.1;

#[derive(Debug, Clone)]
pub struct WikiClientConfig {
    pub base_url: String,
    /// The wiki blocks default library user agents; identify the deployment
    pub user_agent: String,
    pub request_timeout: Duration,
    pub max_retries: u32,
    /// Minimum spacing between consecutive requests
    pub min_request_interval: Duration,
    pub pool_idle_timeout: Duration,
}

impl Default for WikiClientConfig {
    fn default() -> Self {
        Self {
            base_url: WIKI_BASE_URL.to_string(),
            user_agent: concat!("ge-oracle/", env!("CARGO_PKG_VERSION")).to_string(),
            request_timeout: Duration::from_secs(10),
            max_retries: 3,
            min_request_interval: Duration::from_millis(100),
            pool_idle_timeout: Duration::from_secs(30),
        }
    }
}

pub struct WikiPricesClient {
    client: Client,
    config: WikiClientConfig,
    last_request: Mutex<Option<Instant>>,
}

impl WikiPricesClient {
    /// Open a client and its connection pool
    pub fn open(config: WikiClientConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent).context("Invalid user agent header value")?,
        );

        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.request_timeout)
            .pool_idle_timeout(config.pool_idle_timeout)
            .default_headers(headers)
            .build()
            .context("Failed to create HTTP client")?;

        debug!(base_url = %config.base_url, "Wiki prices client opened");

        Ok(Self {
            client,
            config: WikiClientConfig {
                base_url: config.base_url.trim_end_matches('/').to_string(),
                ..config
            },
            last_request: Mutex::new(None),
        })
    }

    /// Explicitly release the client. Equivalent to dropping it.
    pub fn close(self) {}

    pub fn config(&self) -> &WikiClientConfig {
        &self.config
    }

    async fn pace(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.config.min_request_interval {
                tokio::time::sleep(self.config.min_request_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn get_once(&self, path: &str, query: &[(&str, String)]) -> Result<String, FetchError> {
        self.pace().await;

        let url = format!("{}{}", self.config.base_url, path);
        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http {
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(|e| self.classify(e))
    }

    /// GET with bounded retry on transient failures
    async fn get_with_retry(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<String, FetchError> {
        let mut attempt = 0u32;
        loop {
            match self.get_once(path, query).await {
                Ok(body) => return Ok(body),
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let delay = backoff_with_jitter_ms(attempt);
                    warn!(
                        path = %path,
                        attempt = attempt,
                        delay_ms = delay,
                        error = %e,
                        "Retrying wiki request with exponential backoff + jitter"
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, FetchError> {
        let body = self.get_with_retry(path, query).await?;
        serde_json::from_str(&body).map_err(|e| FetchError::Decode(format!("{}: {}", path, e)))
    }

    fn classify(&self, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout(self.config.request_timeout.as_millis() as u64)
        } else if let Some(status) = e.status() {
            FetchError::Http {
                status: status.as_u16(),
            }
        } else {
            FetchError::Transport(e.to_string())
        }
    }
}

impl Drop for WikiPricesClient {
    fn drop(&mut self) {
        debug!(base_url = %self.config.base_url, "Wiki prices client closed");
    }
}

#[async_trait]
impl PriceSource for WikiPricesClient {
    fn name(&self) -> &'static str {
        "OSRS Wiki"
    }

    fn reliability(&self) -> f64 {
        WIKI_RELIABILITY
    }

    async fn mapping(&self) -> Result<Vec<ItemMapping>, FetchError> {
        let raw: Vec<serde_json::Value> = self.get_json("/mapping", &[]).await?;
        Ok(parse_mapping(raw))
    }

    async fn latest(&self, item_id: ItemId) -> Result<Option<LatestPrice>, FetchError> {
        let envelope: DataEnvelope<HashMap<String, serde_json::Value>> = self
            .get_json("/latest", &[("id", item_id.to_string())])
            .await?;
        Ok(parse_latest(envelope.data).remove(&item_id))
    }

    async fn latest_all(&self) -> Result<HashMap<ItemId, LatestPrice>, FetchError> {
        let envelope: DataEnvelope<HashMap<String, serde_json::Value>> =
            self.get_json("/latest", &[]).await?;
        Ok(parse_latest(envelope.data))
    }

    async fn bucket(
        &self,
        step: TimeStep,
        timestamp: Option<i64>,
    ) -> Result<PriceBucket, FetchError> {
        let path = match step {
            TimeStep::Min5 => "/5m",
            TimeStep::Hour1 => "/1h",
            other => {
                return Err(FetchError::Decode(format!(
                    "no catalog bucket endpoint for {}",
                    other
                )))
            }
        };
        let query: Vec<(&str, String)> = timestamp
            .map(|ts| vec![("timestamp", ts.to_string())])
            .unwrap_or_default();

        let envelope: DataEnvelope<HashMap<String, serde_json::Value>> =
            self.get_json(path, &query).await?;
        Ok(PriceBucket {
            timestamp: envelope.timestamp,
            prices: parse_bucket(envelope.data),
        })
    }

    async fn timeseries(
        &self,
        item_id: ItemId,
        step: TimeStep,
    ) -> Result<Vec<TimeseriesPoint>, FetchError> {
        let envelope: DataEnvelope<Vec<serde_json::Value>> = self
            .get_json(
                "/timeseries",
                &[
                    ("id", item_id.to_string()),
                    ("timestep", step.as_param().to_string()),
                ],
            )
            .await?;
        Ok(parse_timeseries(item_id, envelope.data))
    }
}

/// Exponential backoff (capped) with up to 20% jitter either way
pub(crate) fn backoff_with_jitter_ms(attempt: u32) -> u64 {
    let capped_attempt = attempt.saturating_sub(1).min(16);
    let base = BASE_BACKOFF_MS
        .saturating_mul(1u64 << capped_attempt)
        .min(MAX_BACKOFF_MS);

    let unit: f64 = rand::thread_rng().gen_range(-1.0..=1.0);
    let jitter = 1.0 + unit * BACKOFF_JITTER_RATIO;
    ((base as f64) * jitter).round().clamp(1.0, MAX_BACKOFF_MS as f64) as u64
}

// ---------------------------------------------------------------------------
// Wire records. Each entry is validated on its own; a malformed entry is logged
// and skipped rather than failing the whole payload.
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: T,
    #[serde(default)]
    timestamp: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LatestEntry {
    high: Option<i64>,
    high_time: Option<i64>,
    low: Option<i64>,
    low_time: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BucketEntry {
    avg_high_price: Option<i64>,
    avg_low_price: Option<i64>,
    #[serde(default)]
    high_price_volume: Option<u64>,
    #[serde(default)]
    low_price_volume: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SeriesEntry {
    timestamp: i64,
    avg_high_price: Option<i64>,
    avg_low_price: Option<i64>,
    #[serde(default)]
    high_price_volume: Option<u64>,
    #[serde(default)]
    low_price_volume: Option<u64>,
}

fn parse_keyed<W: DeserializeOwned>(
    data: HashMap<String, serde_json::Value>,
    what: &'static str,
) -> Vec<(ItemId, W)> {
    data.into_iter()
        .filter_map(|(key, value)| {
            let id = match key.parse::<ItemId>() {
                Ok(id) => id,
                Err(_) => {
                    warn!(endpoint = what, key = %key, "Skipping entry with non-numeric item id");
                    return None;
                }
            };
            match serde_json::from_value::<W>(value) {
                Ok(entry) => Some((id, entry)),
                Err(e) => {
                    warn!(endpoint = what, item_id = id, error = %e, "Skipping malformed entry");
                    None
                }
            }
        })
        .collect()
}

pub(crate) fn parse_latest(data: HashMap<String, serde_json::Value>) -> HashMap<ItemId, LatestPrice> {
    parse_keyed::<LatestEntry>(data, "latest")
        .into_iter()
        .map(|(id, e)| {
            (
                id,
                LatestPrice {
                    high: e.high,
                    high_time: e.high_time,
                    low: e.low,
                    low_time: e.low_time,
                },
            )
        })
        .collect()
}

pub(crate) fn parse_bucket(data: HashMap<String, serde_json::Value>) -> HashMap<ItemId, BucketPrice> {
    parse_keyed::<BucketEntry>(data, "bucket")
        .into_iter()
        .map(|(id, e)| {
            (
                id,
                BucketPrice {
                    avg_high_price: e.avg_high_price,
                    avg_low_price: e.avg_low_price,
                    high_price_volume: e.high_price_volume.unwrap_or(0),
                    low_price_volume: e.low_price_volume.unwrap_or(0),
                },
            )
        })
        .collect()
}

pub(crate) fn parse_timeseries(item_id: ItemId, data: Vec<serde_json::Value>) -> Vec<TimeseriesPoint> {
    let mut points: Vec<TimeseriesPoint> = data
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<SeriesEntry>(value) {
            Ok(e) => Some(TimeseriesPoint {
                timestamp: e.timestamp,
                avg_high_price: e.avg_high_price,
                avg_low_price: e.avg_low_price,
                high_price_volume: e.high_price_volume.unwrap_or(0),
                low_price_volume: e.low_price_volume.unwrap_or(0),
            }),
            Err(e) => {
                warn!(item_id = item_id, error = %e, "Skipping malformed timeseries point");
                None
            }
        })
        .collect();
    points.sort_by_key(|p| p.timestamp);
    points
}

pub(crate) fn parse_mapping(data: Vec<serde_json::Value>) -> Vec<ItemMapping> {
    data.into_iter()
        .filter_map(|value| match serde_json::from_value::<ItemMapping>(value) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!(error = %e, "Skipping malformed mapping entry");
                None
            }
        })
        .collect()
}
