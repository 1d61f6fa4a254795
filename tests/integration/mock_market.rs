//! In-memory doubles for integration testing.
//!
//! `MockMarket` serves a fixed, test-controlled token list and price
//! ticks; `RecordingTransport` captures every message instead of talking
//! to Telegram. Both are cheap to clone and share state across clones so
//! the test can keep a handle after giving one to the loop.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use dexwatch::market::MarketSource;
use dexwatch::notify::MessageTransport;
use dexwatch::types::{MarketTick, TokenSnapshot, TraderError};

/// Build a snapshot with the fields the scorer looks at.
pub fn token(symbol: &str, price: f64, liquidity: f64, volume_24h: f64, change_24h: f64) -> TokenSnapshot {
    TokenSnapshot {
        address: format!("{symbol}111111111111111111111111111111"),
        symbol: symbol.to_string(),
        name: format!("{symbol} Token"),
        price,
        liquidity,
        volume_24h,
        change_24h,
    }
}

// ---------------------------------------------------------------------------
// Market
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct MockMarket {
    tokens: Arc<Mutex<Vec<TokenSnapshot>>>,
    ticks: Arc<Mutex<HashMap<String, MarketTick>>>,
    /// If set, every fetch fails with this message.
    force_error: Arc<Mutex<Option<String>>>,
    fetches: Arc<AtomicUsize>,
}

impl MockMarket {
    pub fn with_tokens(tokens: Vec<TokenSnapshot>) -> Self {
        let market = Self::default();
        market.set_tokens(tokens);
        market
    }

    pub fn set_tokens(&self, tokens: Vec<TokenSnapshot>) {
        *self.tokens.lock().unwrap() = tokens;
    }

    pub fn set_tick(&self, symbol: &str, price: f64, change: f64) {
        self.ticks.lock().unwrap().insert(
            symbol.to_uppercase(),
            MarketTick {
                symbol: symbol.to_uppercase(),
                price,
                change,
                timestamp: Utc::now(),
            },
        );
    }

    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn check_error(&self) -> Result<(), TraderError> {
        match self.force_error.lock().unwrap().as_ref() {
            Some(msg) => Err(TraderError::DataUnavailable(msg.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl MarketSource for MockMarket {
    async fn fetch(&self, limit: usize) -> Result<Vec<TokenSnapshot>, TraderError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.check_error()?;
        Ok(self.tokens.lock().unwrap().iter().take(limit).cloned().collect())
    }

    async fn fetch_tick(&self, symbol: &str) -> Result<MarketTick, TraderError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.check_error()?;
        self.ticks
            .lock()
            .unwrap()
            .get(&symbol.to_uppercase())
            .cloned()
            .ok_or_else(|| TraderError::DataUnavailable(format!("no pair for {symbol}")))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct RecordingTransport {
    sent: Arc<Mutex<Vec<(String, String)>>>,
    failures_left: Arc<AtomicUsize>,
}

impl RecordingTransport {
    /// Fail the next `n` deliveries.
    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Every delivered `(destination, text)` pair, in order.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent().into_iter().map(|(_, text)| text).collect()
    }
}

#[async_trait]
impl MessageTransport for RecordingTransport {
    async fn deliver(&self, destination: &str, text: &str) -> Result<(), TraderError> {
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(TraderError::DeliveryFailure("HTTP 502 Bad Gateway".into()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((destination.to_string(), text.to_string()));
        Ok(())
    }
}
