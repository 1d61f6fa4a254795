//! Risk manager.
//!
//! Caps each buy at a fraction of total portfolio value and refuses
//! anything the ledger cannot cover: a buy worth more than free cash, or
//! a sell of a symbol that is not held.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::fmt;
use tracing::debug;

use crate::engine::portfolio::Portfolio;
use crate::types::{ActionKind, ProposedAction};

/// Decimal places kept on resized quantities.
pub const QUANTITY_DP: u32 = 8;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RiskConfig {
    /// Largest single buy as a fraction of total portfolio value.
    pub max_position_pct: Decimal,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_position_pct: dec!(0.05),
        }
    }
}

// ---------------------------------------------------------------------------
// Rejections
// ---------------------------------------------------------------------------

/// Why the risk manager refused an action.
#[derive(Debug, Clone, PartialEq)]
pub enum RejectionReason {
    NoAction,
    InvalidPrice,
    ZeroQuantity,
    InsufficientCash { needed: Decimal, available: Decimal },
    NoPosition,
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionReason::NoAction => write!(f, "no action proposed"),
            RejectionReason::InvalidPrice => write!(f, "price must be positive"),
            RejectionReason::ZeroQuantity => write!(f, "quantity rounds to zero"),
            RejectionReason::InsufficientCash { needed, available } => {
                write!(f, "needs ${needed:.2}, only ${available:.2} cash")
            }
            RejectionReason::NoPosition => write!(f, "no open position"),
        }
    }
}

// ---------------------------------------------------------------------------
// Risk manager
// ---------------------------------------------------------------------------

pub struct RiskManager {
    config: RiskConfig,
}

impl RiskManager {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Resize or reject `action` against the current portfolio.
    ///
    /// `marks` prices existing positions for the total-value cap; symbols
    /// it does not know are valued at zero.
    pub fn check<F>(
        &self,
        action: &ProposedAction,
        portfolio: &Portfolio,
        marks: F,
    ) -> Result<ProposedAction, RejectionReason>
    where
        F: Fn(&str) -> Option<Decimal>,
    {
        match action.kind {
            ActionKind::None => Err(RejectionReason::NoAction),
            ActionKind::Buy => self.check_buy(action, portfolio, marks),
            ActionKind::Sell => Self::check_sell(action, portfolio),
        }
    }

    fn check_buy<F>(
        &self,
        action: &ProposedAction,
        portfolio: &Portfolio,
        marks: F,
    ) -> Result<ProposedAction, RejectionReason>
    where
        F: Fn(&str) -> Option<Decimal>,
    {
        if action.price <= Decimal::ZERO {
            return Err(RejectionReason::InvalidPrice);
        }

        let mut sized = action.clone();
        let max_value = portfolio.total_value(marks) * self.config.max_position_pct;

        if sized.notional() > max_value {
            sized.quantity = max_value
                .checked_div(sized.price)
                .ok_or(RejectionReason::InvalidPrice)?
                .round_dp(QUANTITY_DP);
            debug!(
                symbol = %sized.symbol,
                requested = %action.quantity,
                resized = %sized.quantity,
                max_value = format!("${:.2}", max_value),
                "Buy resized to position cap"
            );
        }

        if sized.quantity <= Decimal::ZERO {
            return Err(RejectionReason::ZeroQuantity);
        }

        let value = sized.notional();
        if value > portfolio.cash() {
            return Err(RejectionReason::InsufficientCash {
                needed: value,
                available: portfolio.cash(),
            });
        }

        Ok(sized)
    }

    fn check_sell(action: &ProposedAction, portfolio: &Portfolio) -> Result<ProposedAction, RejectionReason> {
        let held = portfolio.position(&action.symbol);
        if held <= Decimal::ZERO {
            return Err(RejectionReason::NoPosition);
        }
        if action.quantity <= Decimal::ZERO {
            return Err(RejectionReason::ZeroQuantity);
        }

        let mut sized = action.clone();
        sized.quantity = sized.quantity.min(held);
        Ok(sized)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
