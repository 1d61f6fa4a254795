//! Rule-based token scorer.
//!
//! Scores are additive over a fixed rule set and map onto buy/sell/hold.
//! `rank` orders by score descending with a stable sort so that ties keep
//! the order the provider returned them in.

use tracing::debug;

use crate::market::MarketSource;
use crate::types::{Signal, SignalAction, TokenSnapshot, TraderError};

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

const HEALTHY_LIQUIDITY_USD: f64 = 50_000.0;
const STRONG_VOLUME_USD: f64 = 100_000.0;
const MOMENTUM_PCT: f64 = 20.0;

const LIQUIDITY_POINTS: i32 = 10;
const VOLUME_POINTS: i32 = 20;
const MOMENTUM_POINTS: i32 = 15;
const DECLINE_POINTS: i32 = -20;

/// Score at or above which a token is a buy.
pub const BUY_SCORE: i32 = 40;
/// Score at or below which a token is a sell.
pub const SELL_SCORE: i32 = -20;

/// Stateless scorer for token snapshots.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalScorer;

impl SignalScorer {
    pub fn new() -> Self {
        Self
    }

    /// Score a single snapshot. Deterministic.
    pub fn score(&self, token: &TokenSnapshot) -> Signal {
        let mut score = 0;
        let mut reasons = Vec::new();

        if token.liquidity > HEALTHY_LIQUIDITY_USD {
            score += LIQUIDITY_POINTS;
            reasons.push("healthy liquidity".to_string());
        }
        if token.volume_24h > STRONG_VOLUME_USD {
            score += VOLUME_POINTS;
            reasons.push("strong 24h volume".to_string());
        }
        if token.change_24h > MOMENTUM_PCT {
            score += MOMENTUM_POINTS;
            reasons.push("positive momentum".to_string());
        }
        if token.change_24h < -MOMENTUM_PCT {
            score += DECLINE_POINTS;
            reasons.push("sharp decline".to_string());
        }

        Signal {
            token: token.clone(),
            score,
            action: action_for(score),
            reasons,
        }
    }

    /// Score every token and keep the `top_k` best, highest first.
    pub fn rank(&self, tokens: &[TokenSnapshot], top_k: usize) -> Vec<Signal> {
        let mut signals: Vec<Signal> = tokens.iter().map(|t| self.score(t)).collect();
        // sort_by is stable: equal scores stay in fetch order
        signals.sort_by(|a, b| b.score.cmp(&a.score));
        signals.truncate(top_k);
        debug!(
            scored = tokens.len(),
            kept = signals.len(),
            best = signals.first().map(|s| s.score),
            "Tokens ranked"
        );
        signals
    }

    /// Fetch `limit` tokens from `source` and return the `top_k` signals.
    pub async fn scan(
        &self,
        source: &dyn MarketSource,
        limit: usize,
        top_k: usize,
    ) -> Result<Vec<Signal>, TraderError> {
        let tokens = source.fetch(limit).await?;
        Ok(self.rank(&tokens, top_k))
    }
}

fn action_for(score: i32) -> SignalAction {
    if score >= BUY_SCORE {
        SignalAction::Buy
    } else if score <= SELL_SCORE {
        SignalAction::Sell
    } else {
        SignalAction::Hold
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
