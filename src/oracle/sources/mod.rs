//! Upstream price sources
//!
//! The OSRS Wiki real-time prices API is the primary (and officially sanctioned)
//! feed. Everything downstream talks to it through the [`PriceSource`] trait so
//! the reconciler and orchestrator can run against fakes in tests.

mod batch;
mod fallback;
mod wiki;

pub use batch::{fetch_latest_batch, BatchOptions};
pub use fallback::{freshest_available, FallbackStep, FreshestPrice};
pub use wiki::{WikiClientConfig, WikiPricesClient, WIKI_BASE_URL};

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

use crate::types::{ItemId, ItemMapping, LatestPrice, PriceBucket, TimeStep, TimeseriesPoint};

/// Categorized upstream failure
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("request timed out after {0} ms")]
    Timeout(u64),
    #[error("upstream returned HTTP {status}")]
    Http { status: u16 },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed response: {0}")]
    Decode(String),
}

impl FetchError {
    /// Worth retrying at the single-request level
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout(_) | FetchError::Transport(_) => true,
            FetchError::Http { status } => *status >= 500 || *status == 429,
            FetchError::Decode(_) => false,
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            FetchError::Timeout(_) => "timeout",
            FetchError::Http { .. } => "http-error",
            FetchError::Transport(_) => "transport-error",
            FetchError::Decode(_) => "decode-error",
        }
    }
}

/// Trait for upstream price feeds
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Source name for logs
    fn name(&self) -> &'static str;

    /// Reliability constant used when this source is the primary of several
    fn reliability(&self) -> f64;

    /// Full item catalog
    async fn mapping(&self) -> Result<Vec<ItemMapping>, FetchError>;

    /// Latest prices for one item. `Ok(None)` when the item has never traded.
    async fn latest(&self, item_id: ItemId) -> Result<Option<LatestPrice>, FetchError>;

    /// Latest prices for every item
    async fn latest_all(&self) -> Result<HashMap<ItemId, LatestPrice>, FetchError>;

    /// Catalog-wide 5m or 1h averages. `timestamp` selects a past bucket.
    async fn bucket(
        &self,
        step: TimeStep,
        timestamp: Option<i64>,
    ) -> Result<PriceBucket, FetchError>;

    /// One item's series at the given granularity, oldest first
    async fn timeseries(
        &self,
        item_id: ItemId,
        step: TimeStep,
    ) -> Result<Vec<TimeseriesPoint>, FetchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(FetchError::Timeout(5000).is_transient());
        assert!(FetchError::Transport("reset".into()).is_transient());
        assert!(FetchError::Http { status: 503 }.is_transient());
        assert!(FetchError::Http { status: 429 }.is_transient());
        assert!(!FetchError::Http { status: 404 }.is_transient());
        assert!(!FetchError::Decode("bad json".into()).is_transient());
    }

    #[test]
    fn categories_match_failure_kind() {
        assert_eq!(FetchError::Timeout(1).category(), "timeout");
        assert_eq!(FetchError::Http { status: 500 }.category(), "http-error");
        assert_eq!(
            FetchError::Transport("x".into()).category(),
            "transport-error"
        );
    }
}
