//! Single-symbol threshold strategy.
//!
//! Watches one symbol's short-window change: a rise of at least the
//! threshold buys a small lot, a fall of at least the threshold exits the
//! whole position.

use rust_decimal::Decimal;

use super::order_size;
use crate::engine::portfolio::Portfolio;
use crate::types::{MarketTick, ProposedAction};

#[derive(Debug, Clone)]
pub struct ThresholdStrategy {
    /// Trigger as a fraction (0.01 = 1%).
    threshold: f64,
}

impl ThresholdStrategy {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Propose an action for `tick`. Returns `ActionKind::None` when the
    /// move is inside the band or there is nothing to sell.
    pub fn decide(&self, tick: &MarketTick, portfolio: &Portfolio) -> ProposedAction {
        let Some(price) = super::to_price(tick.price) else {
            return ProposedAction::none(&tick.symbol);
        };

        if tick.change >= self.threshold {
            let quantity = order_size(portfolio.cash(), price);
            if quantity > Decimal::ZERO {
                return ProposedAction::buy(&tick.symbol, price, quantity);
            }
            return ProposedAction::none(&tick.symbol);
        }

        if tick.change <= -self.threshold {
            let held = portfolio.position(&tick.symbol);
            if held > Decimal::ZERO {
                return ProposedAction::sell(&tick.symbol, price, held);
            }
        }

        ProposedAction::none(&tick.symbol)
    }
}

impl Default for ThresholdStrategy {
    fn default() -> Self {
        Self::new(0.01)
    }
}
