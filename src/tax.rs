//! Grand Exchange Tax Calculator
//!
//! The GE takes 2% of the sale price of each item, rounded down. Items selling
//! below 50 GP pay nothing (2% of 49 rounds to zero anyway) and the tax is
//! capped at 5,000,000 GP per item.
//!
//! Reference: https://oldschool.runescape.wiki/w/Grand_Exchange#Convenience_fee_and_item_sink

use serde::{Deserialize, Serialize};

pub const GE_TAX_RATE: f64 = 0.02;
pub const GE_TAX_EXEMPT_BELOW: i64 = 50;
pub const GE_TAX_CAP: i64 = 5_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TaxPolicy {
    pub rate: f64,
    /// Sale prices strictly below this pay no tax
    pub exempt_below: i64,
    /// Per-item ceiling, if any
    pub cap: Option<i64>,
}

impl Default for TaxPolicy {
    fn default() -> Self {
        Self::grand_exchange()
    }
}

impl TaxPolicy {
    pub fn grand_exchange() -> Self {
        Self {
            rate: GE_TAX_RATE,
            exempt_below: GE_TAX_EXEMPT_BELOW,
            cap: Some(GE_TAX_CAP),
        }
    }

    /// Uncapped flat rate with no exemption
    pub fn flat(rate: f64) -> Self {
        Self {
            rate,
            exempt_below: 0,
            cap: None,
        }
    }

    /// Tax in GP on selling one item at `sale_price`
    pub fn tax_on(&self, sale_price: i64) -> i64 {
        if sale_price <= 0 || sale_price < self.exempt_below {
            return 0;
        }
        let tax = (sale_price as f64 * self.rate).floor() as i64;
        match self.cap {
            Some(cap) => tax.min(cap),
            None => tax,
        }
    }

    /// What the seller receives for one item
    pub fn post_tax_price(&self, sale_price: i64) -> i64 {
        sale_price - self.tax_on(sale_price)
    }
}
