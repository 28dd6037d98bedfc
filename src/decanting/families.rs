//! Potion family discovery and price attachment

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::types::{DataQuality, ItemId, ItemMapping, PriceData};

pub const MAX_DOSE: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DosePrice {
    /// Instant-buy
    pub high: i64,
    /// Instant-sell
    pub low: i64,
}

/// One potion at every dose level the catalog knows about.
/// Rebuilt each refresh cycle, never updated in place.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PotionFamily {
    pub base_name: String,
    pub item_ids: BTreeMap<u8, ItemId>,
    pub current_prices: BTreeMap<u8, DosePrice>,
    pub volumes: BTreeMap<u8, u64>,
    /// Worst quality across member items
    pub data_quality: DataQuality,
}

impl PotionFamily {
    pub fn new(base_name: impl Into<String>, item_ids: BTreeMap<u8, ItemId>) -> Self {
        Self {
            base_name: base_name.into(),
            item_ids,
            current_prices: BTreeMap::new(),
            volumes: BTreeMap::new(),
            data_quality: DataQuality::Unknown,
        }
    }

    /// Snapshot of this family with the given prices attached
    pub fn with_prices(&self, prices: &HashMap<ItemId, PriceData>) -> PotionFamily {
        let mut current_prices = BTreeMap::new();
        let mut volumes = BTreeMap::new();
        let mut quality = DataQuality::Fresh;

        for (&dose, item_id) in &self.item_ids {
            match prices.get(item_id) {
                Some(price) => {
                    current_prices.insert(
                        dose,
                        DosePrice {
                            high: price.high_price,
                            low: price.low_price,
                        },
                    );
                    volumes.insert(dose, price.total_volume());
                    quality = quality.worst(price.quality);
                }
                None => quality = DataQuality::Unknown,
            }
        }

        PotionFamily {
            base_name: self.base_name.clone(),
            item_ids: self.item_ids.clone(),
            current_prices,
            volumes,
            data_quality: if self.item_ids.is_empty() {
                DataQuality::Unknown
            } else {
                quality
            },
        }
    }

    /// Every dose has a positive instant-buy price
    pub fn has_complete_data(&self) -> bool {
        !self.item_ids.is_empty()
            && self
                .item_ids
                .keys()
                .all(|dose| self.current_prices.get(dose).map_or(false, |p| p.high > 0))
    }

    pub fn member_ids(&self) -> impl Iterator<Item = ItemId> + '_ {
        self.item_ids.values().copied()
    }

    pub fn price(&self, dose: u8) -> Option<DosePrice> {
        self.current_prices.get(&dose).copied()
    }

    pub fn volume(&self, dose: u8) -> u64 {
        self.volumes.get(&dose).copied().unwrap_or(0)
    }
}

/// Split `"Prayer potion(4)"` into `("Prayer potion", 4)`
pub fn parse_dose_name(name: &str) -> Option<(&str, u8)> {
    let inner = name.trim_end().strip_suffix(')')?;
    let open = inner.rfind('(')?;
    let dose: u8 = inner[open + 1..].parse().ok()?;
    if !(1..=MAX_DOSE).contains(&dose) {
        return None;
    }
    let base = inner[..open].trim_end();
    if base.is_empty() {
        return None;
    }
    Some((base, dose))
}

/// Families with at least two dose levels, sorted by name
pub fn discover_families(items: &[ItemMapping]) -> Vec<PotionFamily> {
    let mut grouped: BTreeMap<String, BTreeMap<u8, ItemId>> = BTreeMap::new();

    for item in items {
        let Some((base, dose)) = parse_dose_name(&item.name) else {
            continue;
        };
        let doses = grouped.entry(base.to_string()).or_default();
        // Keep the lowest id when the catalog lists a name twice
        doses
            .entry(dose)
            .and_modify(|id| *id = (*id).min(item.id))
            .or_insert(item.id);
    }

    let families: Vec<PotionFamily> = grouped
        .into_iter()
        .filter(|(_, doses)| doses.len() >= 2)
        .map(|(base, doses)| PotionFamily::new(base, doses))
        .collect();

    debug!(families = families.len(), "Potion families discovered");
    families
}
