//! DexScreener market-data integration.
//!
//! API docs: https://docs.dexscreener.com/api/reference
//! Endpoint: `GET /latest/dex/search?q={query}` returns `{ "pairs": [...] }`
//! Rate limit: 300 requests/minute. No auth.
//!
//! Only pairs on the configured chain are kept. Numeric fields missing
//! from a pair default to zero; a price string that does not parse makes
//! the whole response malformed.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use super::MarketSource;
use crate::types::{MarketTick, TokenSnapshot, TraderError};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const BASE_URL: &str = "https://api.dexscreener.com/latest/dex";
const SOURCE_NAME: &str = "dexscreener";

// ---------------------------------------------------------------------------
// API response types (DexScreener JSON → Rust)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    pairs: Option<Vec<ApiPair>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiPair {
    chain_id: String,
    base_token: ApiToken,
    /// USD price, sent as a string.
    #[serde(default)]
    price_usd: Option<String>,
    #[serde(default)]
    liquidity: Option<ApiLiquidity>,
    #[serde(default)]
    volume: Option<ApiWindows>,
    #[serde(default)]
    price_change: Option<ApiWindows>,
}

#[derive(Debug, Deserialize)]
struct ApiToken {
    address: String,
    symbol: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiLiquidity {
    #[serde(default)]
    usd: Option<f64>,
}

/// Per-window figures (`volume` and `priceChange` share the shape).
#[derive(Debug, Deserialize)]
struct ApiWindows {
    #[serde(default)]
    h1: Option<f64>,
    #[serde(default)]
    h24: Option<f64>,
}

impl ApiPair {
    fn price(&self) -> Result<f64, TraderError> {
        match self.price_usd.as_deref() {
            None => Ok(0.0),
            Some(raw) => raw.trim().parse::<f64>().map_err(|_| {
                TraderError::DataUnavailable(format!(
                    "malformed priceUsd '{raw}' for {}",
                    self.base_token.symbol
                ))
            }),
        }
    }

    fn into_snapshot(self) -> Result<TokenSnapshot, TraderError> {
        let price = self.price()?;
        Ok(TokenSnapshot {
            price,
            liquidity: self.liquidity.and_then(|l| l.usd).unwrap_or(0.0),
            volume_24h: self.volume.and_then(|v| v.h24).unwrap_or(0.0),
            change_24h: self.price_change.and_then(|c| c.h24).unwrap_or(0.0),
            name: self.base_token.name.unwrap_or_else(|| "Unknown".to_string()),
            address: self.base_token.address,
            symbol: self.base_token.symbol,
        })
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

fn parse_pairs(body: &str) -> Result<Vec<ApiPair>, TraderError> {
    let response: SearchResponse = serde_json::from_str(body).map_err(|e| {
        TraderError::DataUnavailable(format!("malformed DexScreener response: {e}"))
    })?;
    Ok(response.pairs.unwrap_or_default())
}

/// Turn a search response body into snapshots on `chain_id`, truncated to
/// `limit`, preserving provider order.
pub fn parse_search(body: &str, chain_id: &str, limit: usize) -> Result<Vec<TokenSnapshot>, TraderError> {
    parse_pairs(body)?
        .into_iter()
        .filter(|p| p.chain_id == chain_id)
        .take(limit)
        .map(ApiPair::into_snapshot)
        .collect()
}

/// Pick the first pair on `chain_id` whose base symbol matches `symbol`.
pub fn parse_tick(body: &str, chain_id: &str, symbol: &str) -> Result<MarketTick, TraderError> {
    let pair = parse_pairs(body)?
        .into_iter()
        .find(|p| p.chain_id == chain_id && p.base_token.symbol.eq_ignore_ascii_case(symbol))
        .ok_or_else(|| {
            TraderError::DataUnavailable(format!("no {chain_id} pair found for {symbol}"))
        })?;

    let price = pair.price()?;
    let change_pct = pair.price_change.as_ref().and_then(|c| c.h1).unwrap_or(0.0);

    Ok(MarketTick {
        symbol: pair.base_token.symbol,
        price,
        change: change_pct / 100.0,
        timestamp: Utc::now(),
    })
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// DexScreener search client.
pub struct DexScreenerClient {
    http: Client,
    base_url: String,
    chain_id: String,
    query: String,
}

impl DexScreenerClient {
    /// Create a client filtering to `chain_id` and searching for `query`.
    ///
    /// `timeout` bounds every request; a timeout surfaces as
    /// `DataUnavailable`.
    pub fn new(chain_id: &str, query: &str, timeout: Duration) -> Result<Self, TraderError> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent("DEXWATCH/0.1.0 (signal-scanner)")
            .build()
            .map_err(|e| TraderError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: BASE_URL.to_string(),
            chain_id: chain_id.to_string(),
            query: query.to_string(),
        })
    }

    /// Point the client at a different host (self-hosted proxy or tests).
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    async fn search(&self, term: &str) -> Result<String, TraderError> {
        let url = format!("{}/search?q={}", self.base_url, urlencoding::encode(term));
        debug!(url = %url, "Fetching DexScreener pairs");

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| TraderError::DataUnavailable(format!("DexScreener request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(TraderError::DataUnavailable(format!(
                "DexScreener API error {status}"
            )));
        }

        resp.text()
            .await
            .map_err(|e| TraderError::DataUnavailable(format!("DexScreener body read failed: {e}")))
    }
}

#[async_trait]
impl MarketSource for DexScreenerClient {
    async fn fetch(&self, limit: usize) -> Result<Vec<TokenSnapshot>, TraderError> {
        let body = self.search(&self.query).await?;
        let tokens = parse_search(&body, &self.chain_id, limit)?;
        info!(
            query = %self.query,
            chain = %self.chain_id,
            count = tokens.len(),
            "DexScreener scan fetched"
        );
        Ok(tokens)
    }

    async fn fetch_tick(&self, symbol: &str) -> Result<MarketTick, TraderError> {
        let body = self.search(symbol).await?;
        let tick = parse_tick(&body, &self.chain_id, symbol)?;
        debug!(symbol = %tick.symbol, price = tick.price, change = tick.change, "Tick fetched");
        Ok(tick)
    }

    fn name(&self) -> &str {
        SOURCE_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
