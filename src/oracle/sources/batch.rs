//! Batched per-item fetching
//!
//! Fans out per-item `latest` requests with a concurrency cap, paces batches,
//! and merges partial results. Item failures are logged, never raised.

use futures_util::stream::{self, StreamExt};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use super::PriceSource;
use crate::types::{ItemId, LatestPrice};

#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    pub batch_size: usize,
    pub max_concurrency: usize,
    pub inter_batch_delay: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            batch_size: 50,
            max_concurrency: 8,
            inter_batch_delay: Duration::from_millis(500),
        }
    }
}

pub async fn fetch_latest_batch(
    source: &dyn PriceSource,
    item_ids: &[ItemId],
    options: BatchOptions,
) -> HashMap<ItemId, LatestPrice> {
    let mut merged = HashMap::with_capacity(item_ids.len());
    let batch_size = options.batch_size.max(1);
    let batches = item_ids.chunks(batch_size).count();

    for (index, chunk) in item_ids.chunks(batch_size).enumerate() {
        let results: Vec<_> = stream::iter(chunk.iter().copied())
            .map(|id| async move { (id, source.latest(id).await) })
            .buffer_unordered(options.max_concurrency.max(1))
            .collect()
            .await;

        let mut failed = 0usize;
        for (id, result) in results {
            match result {
                Ok(Some(price)) => {
                    merged.insert(id, price);
                }
                Ok(None) => debug!(item_id = id, "No recorded prices"),
                Err(e) => {
                    failed += 1;
                    warn!(
                        source = source.name(),
                        item_id = id,
                        category = e.category(),
                        error = %e,
                        "Item fetch failed"
                    );
                }
            }
        }

        debug!(
            batch = index + 1,
            batches = batches,
            size = chunk.len(),
            failed = failed,
            "Latest batch complete"
        );

        if index + 1 < batches && !options.inter_batch_delay.is_zero() {
            tokio::time::sleep(options.inter_batch_delay).await;
        }
    }

    merged
}
