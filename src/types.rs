//! Shared types for the DEXWATCH agent.
//!
//! These types form the data model used across all modules: market
//! snapshots, scored signals, proposed and executed trades, and the
//! domain error enum. Market readings stay in `f64` (that is what the
//! upstream feed gives us); everything that touches the ledger is
//! `Decimal`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

/// One observed reading for a token during a poll cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenSnapshot {
    pub address: String,
    pub symbol: String,
    pub name: String,
    /// USD price.
    pub price: f64,
    /// Pool liquidity in USD.
    pub liquidity: f64,
    /// Rolling 24h volume in USD.
    pub volume_24h: f64,
    /// 24h price change in percent (25.0 = +25%).
    pub change_24h: f64,
}

impl fmt::Display for TokenSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) ${:.6} | liq ${:.0} | vol ${:.0} | 24h {:+.1}%",
            self.symbol, self.name, self.price, self.liquidity, self.volume_24h, self.change_24h,
        )
    }
}

impl TokenSnapshot {
    /// Helper to build a test snapshot with the three scored metrics.
    #[cfg(test)]
    pub fn sample(symbol: &str, liquidity: f64, volume_24h: f64, change_24h: f64) -> Self {
        Self {
            address: format!("{symbol}-mint"),
            symbol: symbol.to_string(),
            name: format!("{symbol} token"),
            price: 1.0,
            liquidity,
            volume_24h,
            change_24h,
        }
    }
}

/// Single-symbol reading used by the threshold strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketTick {
    pub symbol: String,
    pub price: f64,
    /// Price change over the short window as a fraction (0.015 = +1.5%).
    pub change: f64,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

/// Recommendation attached to a scored token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

impl fmt::Display for SignalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalAction::Buy => write!(f, "BUY"),
            SignalAction::Sell => write!(f, "SELL"),
            SignalAction::Hold => write!(f, "HOLD"),
        }
    }
}

/// A scored recommendation derived from one snapshot. Never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub token: TokenSnapshot,
    pub score: i32,
    pub action: SignalAction,
    pub reasons: Vec<String>,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} score={} {}", self.token.symbol, self.score, self.action)?;
        if !self.reasons.is_empty() {
            write!(f, " ({})", self.reasons.join(", "))?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Actions & trades
// ---------------------------------------------------------------------------

/// Direction of a proposed trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Buy,
    Sell,
    None,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::Buy => write!(f, "buy"),
            ActionKind::Sell => write!(f, "sell"),
            ActionKind::None => write!(f, "none"),
        }
    }
}

impl std::str::FromStr for ActionKind {
    type Err = TraderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "buy" => Ok(ActionKind::Buy),
            "sell" => Ok(ActionKind::Sell),
            other => Err(TraderError::InvalidCommand(format!(
                "unknown side '{other}', use buy or sell"
            ))),
        }
    }
}

/// An action produced by a strategy or a manual command, before risk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedAction {
    pub kind: ActionKind,
    pub symbol: String,
    pub price: Decimal,
    pub quantity: Decimal,
}

impl ProposedAction {
    pub fn buy(symbol: &str, price: Decimal, quantity: Decimal) -> Self {
        Self {
            kind: ActionKind::Buy,
            symbol: symbol.to_string(),
            price,
            quantity,
        }
    }

    pub fn sell(symbol: &str, price: Decimal, quantity: Decimal) -> Self {
        Self {
            kind: ActionKind::Sell,
            symbol: symbol.to_string(),
            price,
            quantity,
        }
    }

    pub fn none(symbol: &str) -> Self {
        Self {
            kind: ActionKind::None,
            symbol: symbol.to_string(),
            price: Decimal::ZERO,
            quantity: Decimal::ZERO,
        }
    }

    /// USD value of the action (`price × quantity`), saturating at `Decimal::MAX`.
    pub fn notional(&self) -> Decimal {
        self.price.saturating_mul(self.quantity)
    }

    pub fn is_none(&self) -> bool {
        self.kind == ActionKind::None
    }
}

impl fmt::Display for ProposedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} @ ${} (${:.2})",
            self.kind,
            self.quantity.normalize(),
            self.symbol,
            self.price.normalize(),
            self.notional(),
        )
    }
}

/// Which execution backend a trader talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Paper,
    Live,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Paper => write!(f, "paper"),
            ExecutionMode::Live => write!(f, "live"),
        }
    }
}

impl std::str::FromStr for ExecutionMode {
    type Err = TraderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "paper" => Ok(ExecutionMode::Paper),
            "live" | "real" => Ok(ExecutionMode::Live),
            other => Err(TraderError::Config(format!("unknown execution mode: {other}"))),
        }
    }
}

/// Outcome of a `Trader` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeResult {
    pub id: String,
    pub success: bool,
    pub action: ActionKind,
    pub symbol: String,
    pub quantity: Decimal,
    pub price: Decimal,
    pub notional: Decimal,
    pub mode: ExecutionMode,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl TradeResult {
    pub fn new(order: &ProposedAction, mode: ExecutionMode, success: bool, message: &str) -> Self {
        Self {
            id: format!("{mode}-{}", uuid::Uuid::new_v4()),
            success,
            action: order.kind,
            symbol: order.symbol.clone(),
            quantity: order.quantity,
            price: order.price,
            notional: order.notional(),
            mode,
            message: message.to_string(),
            timestamp: Utc::now(),
        }
    }
}

impl fmt::Display for TradeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = if self.success { "✅" } else { "❌" };
        write!(
            f,
            "{mark} [{}] {} {} {} @ ${} (${:.2}) — {}",
            self.mode,
            self.action,
            self.quantity.normalize(),
            self.symbol,
            self.price.normalize(),
            self.notional,
            self.message,
        )
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for DEXWATCH.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TraderError {
    #[error("Market data unavailable: {0}")]
    DataUnavailable(String),

    #[error("Delivery failed: {0}")]
    DeliveryFailure(String),

    #[error("Risk rejected {symbol}: {reason}")]
    RiskRejected { symbol: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Execution unavailable: {0}")]
    Execution(String),

    #[error("Cycle aborted: {0}")]
    CycleAborted(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
