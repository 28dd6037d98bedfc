//! Decanting Engine
//!
//! Searches every `from > to` dose pair of each family and keeps the single
//! most profitable conversion.
//!
//! Decanting works by drinking one dose from the source potion and recombining
//! the remaining doses into target potions, so a 4-dose potion decanted to
//! 1-dose potions yields three of them, not four.

use tracing::{debug, info};

use super::families::PotionFamily;
use super::{DecantingOpportunity, RiskLevel};
use crate::tax::TaxPolicy;

/// Volume (per side, summed) at which the volume component saturates
const FULL_VOLUME: f64 = 100.0;

/// How target potions are counted from one source potion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConversionModel {
    /// One dose is consumed, the rest recombine: `(from - 1) / to`
    #[default]
    DrinkThenRecombine,
    /// Legacy model: `from / to`. Overstates the yield by ignoring the drunk dose.
    NaiveDivision,
}

impl ConversionModel {
    pub fn target_potions(self, from_dose: u8, to_dose: u8) -> u32 {
        if to_dose == 0 {
            return 0;
        }
        u32::from(self.usable_doses(from_dose)) / u32::from(to_dose)
    }

    pub fn leftover_doses(self, from_dose: u8, to_dose: u8) -> u32 {
        if to_dose == 0 {
            return 0;
        }
        u32::from(self.usable_doses(from_dose)) % u32::from(to_dose)
    }

    fn usable_doses(self, from_dose: u8) -> u8 {
        match self {
            ConversionModel::DrinkThenRecombine => from_dose.saturating_sub(1),
            ConversionModel::NaiveDivision => from_dose,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DecantingConfig {
    /// Minimum profit per conversion in GP
    pub min_profit_threshold: i64,
    pub tax: TaxPolicy,
    pub model: ConversionModel,
}

impl Default for DecantingConfig {
    fn default() -> Self {
        Self {
            min_profit_threshold: 0,
            tax: TaxPolicy::grand_exchange(),
            model: ConversionModel::DrinkThenRecombine,
        }
    }
}

/// Economics of one conversion, profitable or not
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionQuote {
    pub from_dose: u8,
    pub to_dose: u8,
    pub from_price: i64,
    pub to_price: i64,
    pub doses_needed: u32,
    pub target_potions: u32,
    pub leftover_doses: u32,
    pub revenue: i64,
    pub cost: i64,
    pub profit: i64,
    pub margin_pct: f64,
}

pub struct DecantingEngine {
    config: DecantingConfig,
}

impl DecantingEngine {
    pub fn new(config: DecantingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DecantingConfig {
        &self.config
    }

    /// Price one conversion. `None` when either side has no usable price or the
    /// pair is not a down-conversion.
    pub fn quote(&self, family: &PotionFamily, from_dose: u8, to_dose: u8) -> Option<ConversionQuote> {
        if from_dose <= to_dose || to_dose == 0 {
            return None;
        }
        let from_price = family.price(from_dose)?.high;
        let to_price = family.price(to_dose)?.low;
        if from_price <= 0 || to_price <= 0 {
            return None;
        }

        let doses_needed = 1u32;
        let target_potions = self.config.model.target_potions(from_dose, to_dose);
        let leftover_doses = self.config.model.leftover_doses(from_dose, to_dose);

        let revenue = i64::from(target_potions) * self.config.tax.post_tax_price(to_price);
        let cost = from_price * i64::from(doses_needed);
        let profit = revenue - cost;
        let margin_pct = profit as f64 / cost as f64 * 100.0;

        Some(ConversionQuote {
            from_dose,
            to_dose,
            from_price,
            to_price,
            doses_needed,
            target_potions,
            leftover_doses,
            revenue,
            cost,
            profit,
            margin_pct,
        })
    }

    fn accepts(&self, quote: &ConversionQuote) -> bool {
        quote.profit > 0 && quote.profit >= self.config.min_profit_threshold
    }

    /// Most profitable accepted pair of one family
    pub fn best_opportunity(&self, family: &PotionFamily) -> Option<DecantingOpportunity> {
        let doses: Vec<u8> = family.item_ids.keys().copied().collect();

        let best = doses
            .iter()
            .flat_map(|&from| doses.iter().map(move |&to| (from, to)))
            .filter_map(|(from, to)| self.quote(family, from, to))
            .filter(|quote| self.accepts(quote))
            .max_by(|a, b| {
                a.profit
                    .cmp(&b.profit)
                    .then_with(|| a.margin_pct.total_cmp(&b.margin_pct))
            })?;

        Some(self.build_opportunity(family, best))
    }

    /// Best opportunity per family, highest margin first
    pub fn find_opportunities(&self, families: &[PotionFamily]) -> Vec<DecantingOpportunity> {
        let mut opportunities: Vec<DecantingOpportunity> = families
            .iter()
            .filter_map(|family| self.best_opportunity(family))
            .collect();

        sort_opportunities(&mut opportunities);

        info!(
            families = families.len(),
            opportunities = opportunities.len(),
            min_profit = self.config.min_profit_threshold,
            "🧪 Decanting scan complete"
        );
        opportunities
    }

    fn build_opportunity(&self, family: &PotionFamily, quote: ConversionQuote) -> DecantingOpportunity {
        let from_volume = family.volume(quote.from_dose);
        let to_volume = family.volume(quote.to_dose);
        let confidence_score = opportunity_confidence(
            family.data_quality.as_score(),
            from_volume,
            to_volume,
            quote.margin_pct,
        );

        debug!(
            family = %family.base_name,
            from_dose = quote.from_dose,
            to_dose = quote.to_dose,
            profit = quote.profit,
            margin_pct = quote.margin_pct,
            "Decanting candidate"
        );

        DecantingOpportunity {
            family: family.base_name.clone(),
            from_dose: quote.from_dose,
            to_dose: quote.to_dose,
            from_item_id: family.item_ids.get(&quote.from_dose).copied().unwrap_or_default(),
            to_item_id: family.item_ids.get(&quote.to_dose).copied().unwrap_or_default(),
            from_price: quote.from_price,
            to_price: quote.to_price,
            doses_needed: quote.doses_needed,
            target_potions: quote.target_potions,
            leftover_doses: quote.leftover_doses,
            revenue: quote.revenue,
            cost: quote.cost,
            profit_per_conversion: quote.profit,
            profit_margin_pct: quote.margin_pct,
            confidence_score,
            risk_level: RiskLevel::from_margin(quote.margin_pct),
            from_volume,
            to_volume,
            data_quality: family.data_quality,
        }
    }
}

fn margin_score(margin_pct: f64) -> f64 {
    if margin_pct >= 50.0 {
        1.0
    } else if margin_pct >= 20.0 {
        0.7
    } else {
        0.4
    }
}

/// Mean of the quality, volume and margin components
fn opportunity_confidence(quality_score: f64, from_volume: u64, to_volume: u64, margin_pct: f64) -> f64 {
    let volume_score = (from_volume.min(to_volume) as f64 / FULL_VOLUME).min(1.0);
    let score = (quality_score + volume_score + margin_score(margin_pct)) / 3.0;
    score.clamp(0.0, 1.0)
}

/// Margin desc, then source price desc, then profit desc
pub(crate) fn sort_opportunities(opportunities: &mut [DecantingOpportunity]) {
    opportunities.sort_by(|a, b| {
        b.profit_margin_pct
            .total_cmp(&a.profit_margin_pct)
            .then_with(|| b.from_price.cmp(&a.from_price))
            .then_with(|| b.profit_per_conversion.cmp(&a.profit_per_conversion))
    });
}
