//! Price cache - injected get/set/ttl interface
//!
//! Last-writer-wins per key. Entries are never trusted unconditionally: callers
//! re-check staleness against the wall clock on every read.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::types::{ItemId, PriceData};

/// Cache key: item plus the feature flags the entry was built with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub item_id: ItemId,
    pub include_volume: bool,
}

impl CacheKey {
    pub fn new(item_id: ItemId, include_volume: bool) -> Self {
        Self {
            item_id,
            include_volume,
        }
    }
}

pub trait PriceCache: Send + Sync {
    /// Entry if present and its TTL has not elapsed
    fn get(&self, key: &CacheKey) -> Option<PriceData>;

    fn set(&self, key: CacheKey, value: PriceData, ttl: Duration);

    fn invalidate(&self, key: &CacheKey);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct CacheEntry {
    value: PriceData,
    expires_at: Instant,
}

/// In-process cache
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop expired entries
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        match self.entries.write() {
            Ok(mut entries) => {
                let before = entries.len();
                entries.retain(|_, e| e.expires_at > now);
                before - entries.len()
            }
            Err(_) => 0,
        }
    }
}

impl PriceCache for MemoryCache {
    fn get(&self, key: &CacheKey) -> Option<PriceData> {
        let entries = self.entries.read().ok()?;
        let entry = entries.get(key)?;
        if entry.expires_at > Instant::now() {
            Some(entry.value.clone())
        } else {
            None
        }
    }

    fn set(&self, key: CacheKey, value: PriceData, ttl: Duration) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(
                key,
                CacheEntry {
                    value,
                    expires_at: Instant::now() + ttl,
                },
            );
        }
    }

    fn invalidate(&self, key: &CacheKey) {
        if let Ok(mut entries) = self.entries.write() {
            entries.remove(key);
        }
    }

    fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }
}
