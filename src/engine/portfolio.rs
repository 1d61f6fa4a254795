//! In-memory paper portfolio.
//!
//! Cash and per-symbol quantities only; positions carry no price, so
//! valuation takes a caller-supplied price lookup. `apply_trade` is the
//! only mutator and keeps two invariants: cash never goes negative and no
//! symbol is stored with a quantity of zero or less.

use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::types::{ActionKind, ProposedAction};

#[derive(Debug, Clone, Serialize)]
pub struct Portfolio {
    cash: Decimal,
    /// symbol → quantity, ordered for stable status output.
    positions: BTreeMap<String, Decimal>,
}

impl Portfolio {
    pub fn new(starting_cash: Decimal) -> Self {
        Self {
            cash: starting_cash.max(Decimal::ZERO),
            positions: BTreeMap::new(),
        }
    }

    pub fn cash(&self) -> Decimal {
        self.cash
    }

    pub fn positions(&self) -> &BTreeMap<String, Decimal> {
        &self.positions
    }

    /// Quantity held for `symbol` (zero if none).
    pub fn position(&self, symbol: &str) -> Decimal {
        self.positions.get(symbol).copied().unwrap_or(Decimal::ZERO)
    }

    /// Cash plus every position valued through `price_lookup`. Symbols the
    /// lookup does not know count as zero.
    pub fn total_value<F>(&self, price_lookup: F) -> Decimal
    where
        F: Fn(&str) -> Option<Decimal>,
    {
        self.positions.iter().fold(self.cash, |total, (symbol, qty)| {
            let price = price_lookup(symbol).unwrap_or(Decimal::ZERO);
            total.saturating_add(qty.saturating_mul(price))
        })
    }

    /// Apply a buy or sell. Returns `false` and leaves the ledger untouched
    /// when the trade cannot be applied.
    pub fn apply_trade(&mut self, action: &ProposedAction) -> bool {
        if action.quantity <= Decimal::ZERO || action.price < Decimal::ZERO {
            return false;
        }

        match action.kind {
            ActionKind::Buy => {
                let cost = action.notional();
                if cost > self.cash {
                    return false;
                }
                self.cash -= cost;
                *self
                    .positions
                    .entry(action.symbol.clone())
                    .or_insert(Decimal::ZERO) += action.quantity;
                true
            }
            ActionKind::Sell => {
                let held = self.position(&action.symbol);
                if held <= Decimal::ZERO {
                    return false;
                }
                let quantity = action.quantity.min(held);
                let remaining = held - quantity;
                if remaining <= Decimal::ZERO {
                    self.positions.remove(&action.symbol);
                } else {
                    self.positions.insert(action.symbol.clone(), remaining);
                }
                self.cash = self.cash.saturating_add(quantity.saturating_mul(action.price));
                true
            }
            ActionKind::None => false,
        }
    }
}

impl fmt::Display for Portfolio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cash: ${:.2}", self.cash)?;
        for (symbol, qty) in &self.positions {
            write!(f, "\n{symbol}: {}", qty.normalize())?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
