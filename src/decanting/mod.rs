//! Decanting module - dose-conversion arbitrage
//!
//! Groups potions into dose families, attaches reconciled prices and searches
//! every dose pair for the most profitable conversion.

mod engine;
mod families;

pub use engine::{ConversionModel, ConversionQuote, DecantingConfig, DecantingEngine};
pub use families::{discover_families, parse_dose_name, DosePrice, PotionFamily, MAX_DOSE};

use serde::Serialize;
use std::fmt;

use crate::types::{DataQuality, ItemId};

/// Risk band derived from profit margin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn from_margin(margin_pct: f64) -> Self {
        if margin_pct >= 50.0 {
            RiskLevel::Low
        } else if margin_pct >= 20.0 {
            RiskLevel::Medium
        } else {
            RiskLevel::High
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "low"),
            RiskLevel::Medium => write!(f, "medium"),
            RiskLevel::High => write!(f, "high"),
        }
    }
}

/// A profitable conversion. Never constructed with a non-positive profit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecantingOpportunity {
    pub family: String,
    pub from_dose: u8,
    pub to_dose: u8,
    pub from_item_id: ItemId,
    pub to_item_id: ItemId,
    /// Instant-buy price of one source potion
    pub from_price: i64,
    /// Instant-sell price of one target potion, before tax
    pub to_price: i64,
    /// Source potions bought per conversion
    pub doses_needed: u32,
    pub target_potions: u32,
    /// Doses lost to rounding after recombination
    pub leftover_doses: u32,
    pub revenue: i64,
    pub cost: i64,
    pub profit_per_conversion: i64,
    pub profit_margin_pct: f64,
    pub confidence_score: f64,
    pub risk_level: RiskLevel,
    pub from_volume: u64,
    pub to_volume: u64,
    pub data_quality: DataQuality,
}
