//! Oracle module - price reconciliation
//!
//! Fetches raw observations from upstream sources, classifies their freshness,
//! scores confidence and produces one trusted `PriceData` per item.

pub mod cache;
pub mod confidence;
pub mod freshness;
mod reconciler;
pub mod sources;
pub mod trading_confidence;
pub mod volume;

pub use cache::{CacheKey, MemoryCache, PriceCache};
pub use confidence::ConfidenceScorer;
pub use reconciler::{PriceReconciler, ReconcilerConfig};
pub use trading_confidence::{TradingConfidence, TradingConfidenceScorer};
