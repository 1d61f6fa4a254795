//! Trade executor.
//!
//! Runs every proposed action through the risk manager, hands the sized
//! order to a `Trader`, and keeps the trade history. Paper trading fills
//! against the in-memory portfolio; live execution is not wired up and
//! answers every order with a failed `TradeResult`.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{info, warn};

use super::portfolio::Portfolio;
use crate::strategy::risk::RiskManager;
use crate::types::{ActionKind, ExecutionMode, ProposedAction, TradeResult, TraderError};

// ---------------------------------------------------------------------------
// Traders
// ---------------------------------------------------------------------------

/// Execution backend. Every call returns a `TradeResult`, never an error:
/// a refused or failed order is a result with `success = false`.
#[async_trait]
pub trait Trader: Send + Sync {
    async fn buy(&self, portfolio: &mut Portfolio, order: &ProposedAction) -> TradeResult;

    async fn sell(&self, portfolio: &mut Portfolio, order: &ProposedAction) -> TradeResult;

    fn mode(&self) -> ExecutionMode;
}

/// Fills orders instantly at the quoted price against the paper ledger.
#[derive(Debug, Default)]
pub struct PaperTrader;

impl PaperTrader {
    fn fill(portfolio: &mut Portfolio, order: &ProposedAction) -> TradeResult {
        if portfolio.apply_trade(order) {
            TradeResult::new(order, ExecutionMode::Paper, true, "paper fill")
        } else {
            TradeResult::new(order, ExecutionMode::Paper, false, "portfolio refused the trade")
        }
    }
}

#[async_trait]
impl Trader for PaperTrader {
    async fn buy(&self, portfolio: &mut Portfolio, order: &ProposedAction) -> TradeResult {
        Self::fill(portfolio, order)
    }

    async fn sell(&self, portfolio: &mut Portfolio, order: &ProposedAction) -> TradeResult {
        Self::fill(portfolio, order)
    }

    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Paper
    }
}

/// Placeholder for on-chain execution. Holds the keypair path so the
/// configuration is validated, but never signs or sends anything.
#[derive(Debug)]
pub struct LiveTrader {
    keypair_path: PathBuf,
}

impl LiveTrader {
    pub fn new(keypair_path: PathBuf) -> Self {
        Self { keypair_path }
    }

    fn refuse(&self, order: &ProposedAction) -> TradeResult {
        let err = TraderError::Execution(format!(
            "live execution not available (keypair {})",
            self.keypair_path.display()
        ));
        warn!(symbol = %order.symbol, error = %err, "Live order refused");
        TradeResult::new(order, ExecutionMode::Live, false, &err.to_string())
    }
}

#[async_trait]
impl Trader for LiveTrader {
    async fn buy(&self, _portfolio: &mut Portfolio, order: &ProposedAction) -> TradeResult {
        self.refuse(order)
    }

    async fn sell(&self, _portfolio: &mut Portfolio, order: &ProposedAction) -> TradeResult {
        self.refuse(order)
    }

    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Live
    }
}

/// Build the trader for `mode`.
pub fn trader_for(
    mode: ExecutionMode,
    keypair_path: Option<PathBuf>,
) -> Result<Box<dyn Trader>, TraderError> {
    match mode {
        ExecutionMode::Paper => Ok(Box::new(PaperTrader)),
        ExecutionMode::Live => keypair_path
            .map(|path| Box::new(LiveTrader::new(path)) as Box<dyn Trader>)
            .ok_or_else(|| TraderError::Config("live mode requires WALLET_KEYPAIR_PATH".into())),
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

pub struct Executor {
    trader: Box<dyn Trader>,
    risk: RiskManager,
    portfolio: Portfolio,
    /// Last seen USD price per symbol, for valuing positions.
    marks: HashMap<String, Decimal>,
    history: Vec<TradeResult>,
}

impl Executor {
    pub fn new(trader: Box<dyn Trader>, risk: RiskManager, portfolio: Portfolio) -> Self {
        Self {
            trader,
            risk,
            portfolio,
            marks: HashMap::new(),
            history: Vec::new(),
        }
    }

    pub fn portfolio(&self) -> &Portfolio {
        &self.portfolio
    }

    pub fn mode(&self) -> ExecutionMode {
        self.trader.mode()
    }

    pub fn history(&self) -> &[TradeResult] {
        &self.history
    }

    pub fn trade_count(&self) -> usize {
        self.history.len()
    }

    pub fn mark(&self, symbol: &str) -> Option<Decimal> {
        self.marks.get(symbol).copied()
    }

    pub fn update_marks<I>(&mut self, marks: I)
    where
        I: IntoIterator<Item = (String, Decimal)>,
    {
        self.marks.extend(marks);
    }

    /// Portfolio value at the latest marks.
    pub fn total_value(&self) -> Decimal {
        self.portfolio.total_value(|s| self.mark(s))
    }

    /// Risk-check `action` and send the sized order to the trader.
    ///
    /// A risk rejection is returned as `RiskRejected` and never reaches
    /// the trader. Anything the trader answers, successful or not, is
    /// recorded in the history.
    pub async fn submit(&mut self, action: &ProposedAction) -> Result<TradeResult, TraderError> {
        let marks = &self.marks;
        let sized = self
            .risk
            .check(action, &self.portfolio, |s| marks.get(s).copied())
            .map_err(|reason| {
                info!(symbol = %action.symbol, kind = %action.kind, reason = %reason, "Risk rejected action");
                TraderError::RiskRejected {
                    symbol: action.symbol.clone(),
                    reason: reason.to_string(),
                }
            })?;

        let result = match sized.kind {
            ActionKind::Buy => self.trader.buy(&mut self.portfolio, &sized).await,
            ActionKind::Sell => self.trader.sell(&mut self.portfolio, &sized).await,
            // RiskManager never passes a `None` through.
            ActionKind::None => TradeResult::new(&sized, self.trader.mode(), false, "no action"),
        };

        if result.success {
            info!(
                id = %result.id,
                action = %result.action,
                symbol = %result.symbol,
                quantity = %result.quantity.normalize(),
                notional = format!("${:.2}", result.notional),
                cash = format!("${:.2}", self.portfolio.cash()),
                "Trade executed"
            );
        } else {
            warn!(symbol = %result.symbol, message = %result.message, "Trade failed");
        }

        self.history.push(result.clone());
        Ok(result)
    }

    /// Submit each action in order, dropping risk rejections.
    pub async fn submit_all(&mut self, actions: &[ProposedAction]) -> Vec<TradeResult> {
        let mut results = Vec::new();
        for action in actions {
            if let Ok(result) = self.submit(action).await {
                results.push(result);
            }
        }
        results
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::risk::RiskConfig;
    use rust_decimal_macros::dec;

    fn paper_executor(cash: Decimal) -> Executor {
        Executor::new(
            Box::new(PaperTrader),
            RiskManager::new(RiskConfig::default()),
            Portfolio::new(cash),
        )
    }

    #[tokio::test]
    async fn test_paper_buy_fills_and_is_recorded() {
        let mut executor = paper_executor(dec!(1000));
        let result = executor
            .submit(&ProposedAction::buy("SOL", dec!(20), dec!(2)))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.mode, ExecutionMode::Paper);
        assert!(result.id.starts_with("paper-"));
        assert_eq!(executor.portfolio().cash(), dec!(960));
        assert_eq!(executor.portfolio().position("SOL"), dec!(2));
        assert_eq!(executor.trade_count(), 1);
    }

    #[tokio::test]
    async fn test_oversized_buy_is_resized_before_fill() {
        let mut executor = paper_executor(dec!(1000));
        let result = executor
            .submit(&ProposedAction::buy("SOL", dec!(20), dec!(10)))
            .await
            .unwrap();
        assert_eq!(result.quantity, dec!(2.5));
        assert_eq!(executor.portfolio().cash(), dec!(950));
    }

    #[tokio::test]
    async fn test_rejection_never_reaches_trader() {
        let mut executor = paper_executor(dec!(1000));
        let err = executor
            .submit(&ProposedAction::sell("SOL", dec!(20), dec!(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, TraderError::RiskRejected { ref symbol, .. } if symbol == "SOL"));
        assert_eq!(executor.trade_count(), 0);
        assert_eq!(executor.portfolio().cash(), dec!(1000));
    }

    #[tokio::test]
    async fn test_sell_uses_position() {
        let mut executor = paper_executor(dec!(1000));
        executor
            .submit(&ProposedAction::buy("SOL", dec!(20), dec!(2)))
            .await
            .unwrap();
        let result = executor
            .submit(&ProposedAction::sell("SOL", dec!(25), dec!(9)))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.quantity, dec!(2));
        assert_eq!(executor.portfolio().cash(), dec!(1010));
        assert!(executor.portfolio().positions().is_empty());
    }

    #[tokio::test]
    async fn test_live_trader_refuses_without_touching_portfolio() {
        let mut executor = Executor::new(
            Box::new(LiveTrader::new(PathBuf::from("/tmp/id.json"))),
            RiskManager::new(RiskConfig::default()),
            Portfolio::new(dec!(1000)),
        );
        let result = executor
            .submit(&ProposedAction::buy("SOL", dec!(20), dec!(1)))
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.mode, ExecutionMode::Live);
        assert!(result.message.contains("live execution not available"));
        assert_eq!(executor.portfolio().cash(), dec!(1000));
        assert_eq!(executor.trade_count(), 1);
    }

    #[tokio::test]
    async fn test_marks_feed_the_risk_cap() {
        let mut executor = paper_executor(dec!(1000));
        executor
            .submit(&ProposedAction::buy("JUP", dec!(1), dec!(50)))
            .await
            .unwrap();
        executor.update_marks(vec![("JUP".to_string(), dec!(11))]);
        // cash 950 + 50 JUP × 11 = 1500 → cap 75
        assert_eq!(executor.total_value(), dec!(1500));
        let result = executor
            .submit(&ProposedAction::buy("SOL", dec!(10), dec!(100)))
            .await
            .unwrap();
        assert_eq!(result.notional, dec!(75));
    }

    #[tokio::test]
    async fn test_submit_all_drops_rejections() {
        let mut executor = paper_executor(dec!(1000));
        let results = executor
            .submit_all(&[
                ProposedAction::sell("WIF", dec!(2), dec!(1)),
                ProposedAction::buy("SOL", dec!(20), dec!(1)),
            ])
            .await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].symbol, "SOL");
    }

    #[test]
    fn test_trader_for_mode() {
        assert_eq!(trader_for(ExecutionMode::Paper, None).unwrap().mode(), ExecutionMode::Paper);
        assert!(matches!(
            trader_for(ExecutionMode::Live, None),
            Err(TraderError::Config(_))
        ));
        let live = trader_for(ExecutionMode::Live, Some(PathBuf::from("k.json"))).unwrap();
        assert_eq!(live.mode(), ExecutionMode::Live);
    }
}
