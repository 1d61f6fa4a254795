//! Strategy engine: token scoring, threshold trading, and risk management.
//!
//! Both decision paths sit behind the `Strategy` trait: `observe` pulls
//! market data (the only network step, run off the loop by the caller)
//! and `decide` turns that observation plus the current portfolio into
//! signals and proposed actions without any I/O.

pub mod risk;
pub mod scorer;
pub mod threshold;

use async_trait::async_trait;
use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use std::str::FromStr;
use tracing::debug;

use crate::engine::portfolio::Portfolio;
use crate::market::MarketSource;
use crate::types::{MarketTick, ProposedAction, Signal, SignalAction, TokenSnapshot, TraderError};
use scorer::SignalScorer;
use threshold::ThresholdStrategy;

/// Share of free cash committed by a strategy-proposed buy.
pub const ORDER_CASH_FRACTION: Decimal = dec!(0.01);

// ---------------------------------------------------------------------------
// Decision contract
// ---------------------------------------------------------------------------

/// Market data gathered for one cycle.
#[derive(Debug, Clone)]
pub enum Observation {
    Tokens(Vec<TokenSnapshot>),
    Tick(MarketTick),
}

impl Observation {
    /// Latest USD price per symbol, for marking positions.
    pub fn marks(&self) -> Vec<(String, Decimal)> {
        match self {
            Observation::Tokens(tokens) => tokens
                .iter()
                .filter_map(|t| to_price(t.price).map(|p| (t.symbol.clone(), p)))
                .collect(),
            Observation::Tick(tick) => to_price(tick.price)
                .map(|p| vec![(tick.symbol.clone(), p)])
                .unwrap_or_default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Observation::Tokens(tokens) if tokens.is_empty())
    }
}

/// What a strategy wants reported and traded this cycle.
#[derive(Debug, Clone, Default)]
pub struct Decision {
    pub signals: Vec<Signal>,
    pub actions: Vec<ProposedAction>,
}

impl Decision {
    pub fn is_empty(&self) -> bool {
        self.signals.is_empty() && self.actions.is_empty()
    }
}

/// A decision path the scan loop can drive.
#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    /// Fetch the market data this strategy needs.
    async fn observe(&self, source: &dyn MarketSource) -> Result<Observation, TraderError>;

    /// Turn an observation into signals and proposed actions.
    fn decide(&self, observation: &Observation, portfolio: &Portfolio) -> Decision;
}

// ---------------------------------------------------------------------------
// Ranked top-k scan
// ---------------------------------------------------------------------------

/// Score a batch of tokens and act on the best `top_k`.
pub struct RankedScan {
    scorer: SignalScorer,
    limit: usize,
    top_k: usize,
}

impl RankedScan {
    pub fn new(limit: usize, top_k: usize) -> Self {
        Self {
            scorer: SignalScorer::new(),
            limit,
            top_k,
        }
    }
}

#[async_trait]
impl Strategy for RankedScan {
    fn name(&self) -> &str {
        "ranked"
    }

    async fn observe(&self, source: &dyn MarketSource) -> Result<Observation, TraderError> {
        Ok(Observation::Tokens(source.fetch(self.limit).await?))
    }

    fn decide(&self, observation: &Observation, portfolio: &Portfolio) -> Decision {
        let Observation::Tokens(tokens) = observation else {
            return Decision::default();
        };

        let signals = self.scorer.rank(tokens, self.top_k);
        let mut actions = Vec::new();

        for signal in &signals {
            let Some(price) = to_price(signal.token.price) else {
                continue;
            };
            let symbol = &signal.token.symbol;
            match signal.action {
                SignalAction::Buy => {
                    let quantity = order_size(portfolio.cash(), price);
                    if quantity > Decimal::ZERO {
                        actions.push(ProposedAction::buy(symbol, price, quantity));
                    }
                }
                SignalAction::Sell => {
                    let held = portfolio.position(symbol);
                    if held > Decimal::ZERO {
                        actions.push(ProposedAction::sell(symbol, price, held));
                    }
                }
                SignalAction::Hold => {}
            }
        }

        debug!(signals = signals.len(), actions = actions.len(), "Ranked scan decided");
        Decision { signals, actions }
    }
}

// ---------------------------------------------------------------------------
// Single-symbol threshold watch
// ---------------------------------------------------------------------------

/// `ThresholdStrategy` bound to the symbol it watches.
pub struct ThresholdWatch {
    symbol: String,
    rule: ThresholdStrategy,
}

impl ThresholdWatch {
    pub fn new(symbol: &str, threshold: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            rule: ThresholdStrategy::new(threshold),
        }
    }
}

#[async_trait]
impl Strategy for ThresholdWatch {
    fn name(&self) -> &str {
        "threshold"
    }

    async fn observe(&self, source: &dyn MarketSource) -> Result<Observation, TraderError> {
        Ok(Observation::Tick(source.fetch_tick(&self.symbol).await?))
    }

    fn decide(&self, observation: &Observation, portfolio: &Portfolio) -> Decision {
        let Observation::Tick(tick) = observation else {
            return Decision::default();
        };

        let action = self.rule.decide(tick, portfolio);
        debug!(
            symbol = %tick.symbol,
            change = format!("{:+.2}%", tick.change * 100.0),
            threshold = format!("{:.2}%", self.rule.threshold() * 100.0),
            action = %action.kind,
            "Threshold strategy decided"
        );

        Decision {
            signals: Vec::new(),
            actions: if action.is_none() { Vec::new() } else { vec![action] },
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Convert a feed price to a positive `Decimal`, or `None` if it is not one.
pub fn to_price(value: f64) -> Option<Decimal> {
    if !value.is_finite() || value <= 0.0 {
        return None;
    }
    Decimal::from_str(&value.to_string())
        .ok()
        .or_else(|| Decimal::from_f64(value))
        .filter(|p| *p > Decimal::ZERO)
}

/// Quantity bought with `ORDER_CASH_FRACTION` of `cash` at `price`.
/// Zero when the price is not positive or the quotient does not fit.
pub fn order_size(cash: Decimal, price: Decimal) -> Decimal {
    if price <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    (cash * ORDER_CASH_FRACTION)
        .checked_div(price)
        .map_or(Decimal::ZERO, |q| q.round_dp(risk::QUANTITY_DP))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::MockMarketSource;
    use crate::types::ActionKind;
    use chrono::Utc;

    fn priced(symbol: &str, price: f64, liquidity: f64, volume: f64, change: f64) -> TokenSnapshot {
        TokenSnapshot {
            price,
            ..TokenSnapshot::sample(symbol, liquidity, volume, change)
        }
    }

    #[test]
    fn test_to_price() {
        assert_eq!(to_price(142.51), Some(dec!(142.51)));
        assert_eq!(to_price(0.0000231), Some(dec!(0.0000231)));
        assert_eq!(to_price(0.0), None);
        assert_eq!(to_price(-1.0), None);
        assert_eq!(to_price(f64::NAN), None);
    }

    #[test]
    fn test_order_size() {
        assert_eq!(order_size(dec!(1000), dec!(20)), dec!(0.5));
        assert_eq!(order_size(dec!(1000), dec!(3)), dec!(3.33333333));
        assert_eq!(order_size(dec!(1000), Decimal::ZERO), Decimal::ZERO);
    }

    #[test]
    fn test_order_size_overflow_is_zero() {
        let dust = Decimal::new(1, 28);
        assert_eq!(order_size(Decimal::MAX, dust), Decimal::ZERO);
    }

    #[test]
    fn test_ranked_scan_proposes_buys_and_sells() {
        let mut portfolio = Portfolio::new(dec!(1000));
        assert!(portfolio.apply_trade(&ProposedAction::buy("RUG", dec!(2), dec!(10))));

        let observation = Observation::Tokens(vec![
            priced("HOT", 4.0, 60_000.0, 150_000.0, 25.0), // 45 → buy
            priced("MEH", 1.0, 60_000.0, 0.0, 0.0),        // 10 → hold
            priced("RUG", 1.5, 0.0, 0.0, -40.0),           // -20 → sell (held)
            priced("DUD", 1.0, 0.0, 0.0, -40.0),           // -20 → sell (not held)
        ]);

        let decision = RankedScan::new(30, 5).decide(&observation, &portfolio);
        assert_eq!(decision.signals.len(), 4);
        assert_eq!(decision.actions.len(), 2);

        let buy = &decision.actions[0];
        assert_eq!(buy.kind, ActionKind::Buy);
        assert_eq!(buy.symbol, "HOT");
        // 1% of $980 cash at $4
        assert_eq!(buy.quantity, dec!(2.45));

        let sell = &decision.actions[1];
        assert_eq!(sell.kind, ActionKind::Sell);
        assert_eq!(sell.symbol, "RUG");
        assert_eq!(sell.quantity, dec!(10));
        assert_eq!(sell.price, dec!(1.5));
    }

    #[test]
    fn test_ranked_scan_ignores_tick_observation() {
        let tick = Observation::Tick(MarketTick {
            symbol: "SOL".into(),
            price: 20.0,
            change: 0.5,
            timestamp: Utc::now(),
        });
        let decision = RankedScan::new(30, 5).decide(&tick, &Portfolio::new(dec!(1000)));
        assert!(decision.is_empty());
    }

    #[test]
    fn test_threshold_watch_wraps_single_action() {
        let tick = Observation::Tick(MarketTick {
            symbol: "SOL".into(),
            price: 20.0,
            change: 0.03,
            timestamp: Utc::now(),
        });
        let decision = ThresholdWatch::new("SOL", 0.01).decide(&tick, &Portfolio::new(dec!(1000)));
        assert!(decision.signals.is_empty());
        assert_eq!(decision.actions.len(), 1);
        assert_eq!(decision.actions[0].kind, ActionKind::Buy);
    }

    #[test]
    fn test_threshold_watch_quiet_market_is_empty() {
        let tick = Observation::Tick(MarketTick {
            symbol: "SOL".into(),
            price: 20.0,
            change: 0.0,
            timestamp: Utc::now(),
        });
        let decision = ThresholdWatch::new("SOL", 0.01).decide(&tick, &Portfolio::new(dec!(1000)));
        assert!(decision.is_empty());
    }

    #[test]
    fn test_observation_marks() {
        let obs = Observation::Tokens(vec![
            priced("A", 2.0, 0.0, 0.0, 0.0),
            priced("B", 0.0, 0.0, 0.0, 0.0),
        ]);
        assert_eq!(obs.marks(), vec![("A".to_string(), dec!(2))]);
        assert!(Observation::Tokens(Vec::new()).is_empty());
    }

    #[tokio::test]
    async fn test_threshold_watch_observes_its_symbol() {
        let mut source = MockMarketSource::new();
        source
            .expect_fetch_tick()
            .withf(|symbol| symbol == "JUP")
            .times(1)
            .returning(|symbol| {
                Ok(MarketTick {
                    symbol: symbol.to_string(),
                    price: 0.9,
                    change: 0.0,
                    timestamp: Utc::now(),
                })
            });

        let obs = ThresholdWatch::new("JUP", 0.01).observe(&source).await.unwrap();
        assert!(matches!(obs, Observation::Tick(ref t) if t.symbol == "JUP"));
    }
}
