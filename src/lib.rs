//! DEXWATCH — DexScreener signal scanner with Telegram alerts and paper trading.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod commands;
pub mod config;
pub mod dashboard;
pub mod engine;
pub mod market;
pub mod notify;
pub mod strategy;
pub mod types;
