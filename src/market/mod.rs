//! Market data sources.
//!
//! Defines the `MarketSource` trait and the DexScreener implementation.
//! Sources only ever report failures as `TraderError::DataUnavailable`;
//! the scan loop backs off on it.

pub mod dexscreener;

use async_trait::async_trait;

use crate::types::{MarketTick, TokenSnapshot, TraderError};

/// Abstraction over market-data providers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketSource: Send + Sync {
    /// Fetch up to `limit` token snapshots on the target chain, in
    /// provider order.
    async fn fetch(&self, limit: usize) -> Result<Vec<TokenSnapshot>, TraderError>;

    /// Fetch the current price and short-window change for one symbol.
    async fn fetch_tick(&self, symbol: &str) -> Result<MarketTick, TraderError>;

    /// Source name for logging.
    fn name(&self) -> &str;
}
