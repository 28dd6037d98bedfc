//! CSV Persistence Module
//!
//! Stores reconciled prices and decanting opportunities as daily CSV files
//! under the configured data directory.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use csv::{ReaderBuilder, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock as AsyncRwLock;
use tracing::{debug, info};

use crate::decanting::DecantingOpportunity;
use crate::types::{ItemId, PriceData};

/// Reconciled price row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    /// When the row was written, Unix seconds
    pub recorded_at: i64,
    pub item_id: ItemId,
    pub high_price: i64,
    pub low_price: i64,
    /// Newest upstream observation, Unix seconds
    pub price_timestamp: i64,
    pub quality: String,
    pub age_hours: f64,
    pub confidence: f64,
    pub volume_high: u64,
    pub volume_low: u64,
    pub trading_activity: Option<String>,
}

impl PriceRecord {
    pub fn from_price(price: &PriceData, recorded_at: i64) -> Self {
        Self {
            recorded_at,
            item_id: price.item_id,
            high_price: price.high_price,
            low_price: price.low_price,
            price_timestamp: price.timestamp,
            quality: price.quality.to_string(),
            age_hours: if price.age_hours.is_finite() {
                price.age_hours
            } else {
                -1.0
            },
            confidence: price.confidence_score(),
            volume_high: price.volume_high,
            volume_low: price.volume_low,
            trading_activity: price
                .volume_analysis
                .as_ref()
                .map(|v| v.trading_activity.to_string()),
        }
    }
}

/// Decanting opportunity row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpportunityRecord {
    pub recorded_at: i64,
    pub family: String,
    pub from_dose: u8,
    pub to_dose: u8,
    pub from_item_id: ItemId,
    pub to_item_id: ItemId,
    pub from_price: i64,
    pub to_price: i64,
    pub target_potions: u32,
    pub revenue: i64,
    pub cost: i64,
    pub profit: i64,
    pub margin_pct: f64,
    pub confidence: f64,
    pub risk: String,
    pub quality: String,
}

impl OpportunityRecord {
    pub fn from_opportunity(opp: &DecantingOpportunity, recorded_at: i64) -> Self {
        Self {
            recorded_at,
            family: opp.family.clone(),
            from_dose: opp.from_dose,
            to_dose: opp.to_dose,
            from_item_id: opp.from_item_id,
            to_item_id: opp.to_item_id,
            from_price: opp.from_price,
            to_price: opp.to_price,
            target_potions: opp.target_potions,
            revenue: opp.revenue,
            cost: opp.cost,
            profit: opp.profit_per_conversion,
            margin_pct: opp.profit_margin_pct,
            confidence: opp.confidence_score,
            risk: opp.risk_level.to_string(),
            quality: opp.data_quality.to_string(),
        }
    }
}

/// Storage collaborator for the ingestion loop and the decanting scan
#[async_trait]
pub trait PriceStore: Send + Sync {
    /// Returns the number of rows written
    async fn save_prices(&self, prices: &[PriceData]) -> Result<usize>;

    async fn save_opportunities(&self, opportunities: &[DecantingOpportunity]) -> Result<usize>;
}

/// Appending CSV writer that rolls over to a new file when the UTC date changes
struct DailyWriter {
    dir: PathBuf,
    prefix: &'static str,
    date: NaiveDate,
    writer: csv::Writer<fs::File>,
}

impl DailyWriter {
    fn open(dir: PathBuf, prefix: &'static str, date: NaiveDate) -> Result<Self> {
        let writer = create_writer(&dir, &daily_filename(prefix, date))?;
        Ok(Self {
            dir,
            prefix,
            date,
            writer,
        })
    }

    fn writer_for(&mut self, date: NaiveDate) -> Result<&mut csv::Writer<fs::File>> {
        if date != self.date {
            self.writer.flush().context("Failed to flush rotated writer")?;
            self.writer = create_writer(&self.dir, &daily_filename(self.prefix, date))?;
            self.date = date;
            debug!(prefix = self.prefix, date = %date, "CSV file rotated");
        }
        Ok(&mut self.writer)
    }
}

fn daily_filename(prefix: &str, date: NaiveDate) -> String {
    format!("{}_{}.csv", prefix, date.format("%Y-%m-%d"))
}

fn create_writer(dir: &Path, filename: &str) -> Result<csv::Writer<fs::File>> {
    let path = dir.join(filename);
    let file_has_data =
        path.exists() && fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false);

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Failed to open CSV file {}", path.display()))?;

    Ok(WriterBuilder::new()
        .has_headers(!file_has_data)
        .from_writer(file))
}

pub struct CsvPriceStore {
    data_dir: PathBuf,
    price_writer: Arc<AsyncRwLock<DailyWriter>>,
    opportunity_writer: Arc<AsyncRwLock<DailyWriter>>,
}

impl CsvPriceStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        let prices_dir = data_dir.join("prices");
        let opportunities_dir = data_dir.join("opportunities");

        fs::create_dir_all(&prices_dir).context("Failed to create prices directory")?;
        fs::create_dir_all(&opportunities_dir)
            .context("Failed to create opportunities directory")?;

        let today = Utc::now().date_naive();
        let price_writer = DailyWriter::open(prices_dir, "prices", today)?;
        let opportunity_writer = DailyWriter::open(opportunities_dir, "opportunities", today)?;

        info!(data_dir = %data_dir.display(), "💾 CSV store ready");

        Ok(Self {
            data_dir,
            price_writer: Arc::new(AsyncRwLock::new(price_writer)),
            opportunity_writer: Arc::new(AsyncRwLock::new(opportunity_writer)),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Price rows for one item over the last `days` daily files, oldest first
    pub fn load_price_history(&self, item_id: ItemId, days: u32) -> Result<Vec<PriceRecord>> {
        let mut records = Vec::new();

        for i in 0..days {
            let date = (Utc::now() - Duration::days(i64::from(i))).date_naive();
            let path = self
                .data_dir
                .join("prices")
                .join(daily_filename("prices", date));

            if !path.exists() {
                continue;
            }
            let file = fs::File::open(&path).context("Failed to open price file")?;
            let mut reader = ReaderBuilder::new().has_headers(true).from_reader(file);

            for result in reader.deserialize() {
                let record: PriceRecord = result.context("Failed to deserialize price record")?;
                if record.item_id == item_id {
                    records.push(record);
                }
            }
        }

        records.sort_by_key(|r| r.recorded_at);
        Ok(records)
    }
}

#[async_trait]
impl PriceStore for CsvPriceStore {
    async fn save_prices(&self, prices: &[PriceData]) -> Result<usize> {
        if prices.is_empty() {
            return Ok(0);
        }
        let now = Utc::now();
        let mut guard = self.price_writer.write().await;
        let writer = guard.writer_for(now.date_naive())?;

        for price in prices {
            writer
                .serialize(PriceRecord::from_price(price, now.timestamp()))
                .context("Failed to write price record")?;
        }
        writer.flush().context("Failed to flush price writer")?;
        Ok(prices.len())
    }

    async fn save_opportunities(&self, opportunities: &[DecantingOpportunity]) -> Result<usize> {
        if opportunities.is_empty() {
            return Ok(0);
        }
        let now = Utc::now();
        let mut guard = self.opportunity_writer.write().await;
        let writer = guard.writer_for(now.date_naive())?;

        for opp in opportunities {
            writer
                .serialize(OpportunityRecord::from_opportunity(opp, now.timestamp()))
                .context("Failed to write opportunity record")?;
        }
        writer.flush().context("Failed to flush opportunity writer")?;
        Ok(opportunities.len())
    }
}
