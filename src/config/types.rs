//! Configuration value types

use serde::Deserialize;
use std::fmt;

use crate::tax::TaxPolicy;

/// Tax applied to the sell side of a decant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxModel {
    /// 2%, under-50 GP exempt, 5M cap
    GrandExchange,
    /// Flat 1%, uncapped. Kept for comparing against older reports.
    LegacyFlat,
}

impl TaxModel {
    pub fn policy(&self) -> TaxPolicy {
        match self {
            TaxModel::GrandExchange => TaxPolicy::grand_exchange(),
            TaxModel::LegacyFlat => TaxPolicy::flat(0.01),
        }
    }
}

impl fmt::Display for TaxModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaxModel::GrandExchange => write!(f, "grand_exchange"),
            TaxModel::LegacyFlat => write!(f, "legacy_flat"),
        }
    }
}
