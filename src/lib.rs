//! GE Oracle Library
//!
//! Price reconciliation, confidence scoring and decanting arbitrage for the
//! Old School RuneScape Grand Exchange

pub mod config;
pub mod decanting;
pub mod ingestion;
pub mod oracle;
pub mod persistence;
pub mod service;
pub mod tax;
pub mod types;
