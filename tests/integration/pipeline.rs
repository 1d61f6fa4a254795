//! Full pipeline: fetch → score → risk → paper fill → compose → send.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_test::{assert_err, assert_ok};

use dexwatch::commands::{command_channel, Command};
use dexwatch::engine::executor::{trader_for, Executor, PaperTrader};
use dexwatch::engine::portfolio::Portfolio;
use dexwatch::engine::scan_loop::{LoopSettings, ScanLoop};
use dexwatch::market::MarketSource;
use dexwatch::notify::{chunk_message, MessageTransport, NotificationChannel, MAX_MESSAGE_CHARS};
use dexwatch::strategy::risk::{RiskConfig, RiskManager};
use dexwatch::strategy::{RankedScan, Strategy, ThresholdWatch};
use dexwatch::types::{ActionKind, ExecutionMode, ProposedAction, TraderError};

use crate::mock_market::{token, MockMarket, RecordingTransport};

const CHAT: &str = "-100200300";

fn settings(auto_trade: bool) -> LoopSettings {
    LoopSettings {
        interval: Duration::from_secs(300),
        fetch_timeout: Duration::from_secs(15),
        heartbeat: false,
        auto_trade,
        command_scan_limit: 30,
        command_top_k: 3,
    }
}

fn paper_executor(cash: Decimal) -> Executor {
    Executor::new(
        Box::new(PaperTrader),
        RiskManager::new(RiskConfig::default()),
        Portfolio::new(cash),
    )
}

fn scan_loop(
    strategy: Arc<dyn Strategy>,
    market: &MockMarket,
    chat: &RecordingTransport,
    settings: LoopSettings,
) -> (ScanLoop, dexwatch::commands::CommandSender) {
    let (commands, rx) = command_channel();
    let channel = NotificationChannel::new(
        Some(Arc::new(chat.clone()) as Arc<dyn MessageTransport>),
        Duration::ZERO,
    );
    let scan = ScanLoop::new(
        strategy,
        Arc::new(market.clone()) as Arc<dyn MarketSource>,
        paper_executor(dec!(1000)),
        channel,
        Some(CHAT.to_string()),
        settings,
        rx,
    );
    (scan, commands)
}

fn mixed_market() -> MockMarket {
    MockMarket::with_tokens(vec![
        token("WIF", 2.0, 60_000.0, 0.0, 0.0),           // 10, hold
        token("SOL", 20.0, 80_000.0, 150_000.0, 25.0),   // 45, buy
        token("RUG", 0.01, 1_000.0, 500.0, -60.0),       // -20, sell (not held)
        token("JUP", 1.0, 90_000.0, 200_000.0, 0.0),     // 30, hold
    ])
}

#[tokio::test]
async fn test_ranked_cycle_trades_and_reports() {
    let market = mixed_market();
    let chat = RecordingTransport::default();
    let (mut scan, _commands) = scan_loop(Arc::new(RankedScan::new(30, 5)), &market, &chat, settings(true));

    let report = assert_ok!(scan.run_cycle().await);
    assert_eq!(report.signals, 4);
    assert_eq!(report.trades, 1);
    assert!(report.sent);

    let portfolio = scan.executor().portfolio();
    assert_eq!(portfolio.position("SOL"), dec!(0.5));
    assert_eq!(portfolio.cash(), dec!(990));
    assert!(portfolio.cash() >= Decimal::ZERO);

    let sent = chat.sent();
    assert_eq!(sent.len(), 1);
    let (destination, text) = &sent[0];
    assert_eq!(destination, CHAT);
    assert!(text.starts_with("🚨 4 opportunities detected"));
    assert!(text.contains("🟢 Buy\n- SOL (SOL Token) score=45"));
    assert!(text.contains("🔴 Sell\n- RUG"));
    assert!(text.contains("   • sharp decline"));
    assert!(text.contains("💼 Trades"));
    assert!(text.contains("buy 0.5 SOL @ $20"));

    // Buy section ranks before hold, and holds keep score order.
    let jup = text.find("- JUP").unwrap();
    let wif = text.find("- WIF").unwrap();
    assert!(text.find("🟢 Buy").unwrap() < jup);
    assert!(jup < wif);
}

#[tokio::test]
async fn test_unchanged_market_is_sent_once() {
    let market = mixed_market();
    let chat = RecordingTransport::default();
    let (mut scan, _commands) = scan_loop(Arc::new(RankedScan::new(30, 5)), &market, &chat, settings(false));

    for _ in 0..3 {
        assert_ok!(scan.run_cycle().await);
    }
    assert_eq!(chat.sent().len(), 1);

    // A score change is a new batch.
    market.set_tokens(vec![token("SOL", 20.0, 80_000.0, 150_000.0, 0.0)]);
    let report = assert_ok!(scan.run_cycle().await);
    assert!(report.sent);
    assert_eq!(chat.sent().len(), 2);
}

#[tokio::test]
async fn test_delivery_failure_does_not_fail_cycle() {
    let market = mixed_market();
    let chat = RecordingTransport::default();
    chat.fail_next(1);
    let (mut scan, _commands) = scan_loop(Arc::new(RankedScan::new(30, 5)), &market, &chat, settings(false));

    let report = assert_ok!(scan.run_cycle().await);
    assert!(!report.sent);
    assert!(chat.sent().is_empty());

    // Not remembered, so the same batch goes out on the next cycle.
    let report = assert_ok!(scan.run_cycle().await);
    assert!(report.sent);
    assert_eq!(chat.sent().len(), 1);
}

#[tokio::test]
async fn test_market_outage_is_a_cycle_error() {
    let market = mixed_market();
    market.set_error("HTTP 503");
    let chat = RecordingTransport::default();
    let (mut scan, _commands) = scan_loop(Arc::new(RankedScan::new(30, 5)), &market, &chat, settings(true));

    let err = assert_err!(scan.run_cycle().await);
    assert_eq!(err, TraderError::DataUnavailable("HTTP 503".into()));
    assert!(chat.sent().is_empty());
    assert_eq!(scan.executor().portfolio().cash(), dec!(1000));
}

#[tokio::test]
async fn test_threshold_strategy_round_trip() {
    let market = MockMarket::default();
    let chat = RecordingTransport::default();
    let (mut scan, _commands) = scan_loop(
        Arc::new(ThresholdWatch::new("SOL", 0.01)),
        &market,
        &chat,
        settings(true),
    );

    // +1.5% over the hour: buy 1% of cash.
    market.set_tick("SOL", 20.0, 0.015);
    let report = assert_ok!(scan.run_cycle().await);
    assert_eq!(report.trades, 1);
    assert_eq!(scan.executor().portfolio().position("SOL"), dec!(0.5));

    // Inside the band: nothing to say.
    market.set_tick("SOL", 20.5, 0.002);
    let report = assert_ok!(scan.run_cycle().await);
    assert_eq!(report.trades, 0);
    assert!(!report.sent);

    // -3%: exit the whole position.
    market.set_tick("SOL", 22.0, -0.03);
    let report = assert_ok!(scan.run_cycle().await);
    assert_eq!(report.trades, 1);
    let portfolio = scan.executor().portfolio();
    assert!(portfolio.positions().is_empty());
    assert_eq!(portfolio.cash(), dec!(1001));

    let texts = chat.texts();
    assert_eq!(texts.len(), 2);
    assert!(texts[0].contains("buy 0.5 SOL"));
    assert!(texts[1].contains("sell 0.5 SOL @ $22"));
}

#[tokio::test(start_paused = true)]
async fn test_long_message_is_chunked_and_rate_limited() {
    let chat = RecordingTransport::default();
    let mut channel = NotificationChannel::new(
        Some(Arc::new(chat.clone()) as Arc<dyn MessageTransport>),
        Duration::from_secs(1),
    );

    let text: String = (0..150)
        .map(|i| format!("line {i:03} {}\n", "=".repeat(50)))
        .collect();
    assert!(text.chars().count() > 2 * MAX_MESSAGE_CHARS);

    let start = tokio::time::Instant::now();
    let chunks = assert_ok!(channel.send(CHAT, &text).await);
    assert_eq!(chunks, chunk_message(&text, MAX_MESSAGE_CHARS).len());
    assert_eq!(chunks, 3);
    assert_eq!(start.elapsed(), Duration::from_secs(2));

    let texts = chat.texts();
    assert!(texts.iter().all(|c| c.chars().count() <= MAX_MESSAGE_CHARS));
    assert_eq!(texts.concat(), text);
}

#[tokio::test]
async fn test_risk_invariants_over_mixed_orders() {
    let mut executor = paper_executor(dec!(500));
    executor.update_marks(vec![
        ("SOL".to_string(), dec!(20)),
        ("BONK".to_string(), dec!(0.00002)),
    ]);

    // Deterministic pseudo-random order flow.
    let mut seed: u64 = 0x5eed;
    let symbols = ["SOL", "BONK", "WIF"];
    for _ in 0..200 {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let symbol = symbols[(seed >> 33) as usize % symbols.len()];
        let price = Decimal::from((seed >> 20) % 50 + 1);
        let quantity = Decimal::from((seed >> 8) % 40);
        let order = if seed % 2 == 0 {
            ProposedAction::buy(symbol, price, quantity)
        } else {
            ProposedAction::sell(symbol, price, quantity)
        };

        let held_before = executor.portfolio().position(symbol);
        let cash_before = executor.portfolio().cash();
        match executor.submit(&order).await {
            Ok(result) => {
                assert!(result.success);
                match result.action {
                    ActionKind::Buy => assert!(result.notional <= cash_before),
                    ActionKind::Sell => assert!(result.quantity <= held_before),
                    ActionKind::None => panic!("none reached the trader"),
                }
            }
            Err(e) => assert!(matches!(e, TraderError::RiskRejected { .. })),
        }

        let portfolio = executor.portfolio();
        assert!(portfolio.cash() >= Decimal::ZERO);
        assert!(portfolio.positions().values().all(|q| *q > Decimal::ZERO));
    }
    assert!(executor.trade_count() > 0);
}

#[tokio::test]
async fn test_live_mode_never_touches_ledger() {
    let trader = assert_ok!(trader_for(ExecutionMode::Live, Some(PathBuf::from("wallet.json"))));
    let mut executor = Executor::new(
        trader,
        RiskManager::new(RiskConfig::default()),
        Portfolio::new(dec!(1000)),
    );

    let result = assert_ok!(executor.submit(&ProposedAction::buy("SOL", dec!(20), dec!(1))).await);
    assert!(!result.success);
    assert_eq!(result.mode, ExecutionMode::Live);
    assert_eq!(executor.portfolio().cash(), dec!(1000));
    assert!(executor.portfolio().positions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_loop_recovers_and_answers_chat_commands() {
    let market = mixed_market();
    market.set_error("connection reset");
    market.set_tick("JUP", 1.0, 0.0);
    let chat = RecordingTransport::default();
    let (scan, commands) = scan_loop(Arc::new(RankedScan::new(30, 5)), &market, &chat, settings(false));

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = tokio::spawn(scan.run(shutdown_rx));

    // First cycle fails at t=0 and backs off 2.1s.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(chat.sent().is_empty());
    market.clear_error();

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(chat.sent().len(), 1);

    assert_ok!(commands.forward(Ok(Command::Status), "777".into()).await);
    assert_ok!(
        commands
            .forward(
                Ok(Command::Trade {
                    side: ActionKind::Buy,
                    token: "JUP".into(),
                    amount: dec!(10),
                }),
                "777".into(),
            )
            .await
    );
    assert_ok!(commands.forward("/nonsense".parse(), "777".into()).await);
    tokio::time::sleep(Duration::from_secs(1)).await;

    let replies: Vec<String> = chat
        .sent()
        .into_iter()
        .filter(|(dest, _)| dest == "777")
        .map(|(_, text)| text)
        .collect();
    assert_eq!(replies.len(), 3);
    assert!(replies[0].contains("Cash: $1000.00"));
    assert!(replies[1].contains("buy 10 JUP"));
    assert!(replies[2].contains("unknown command"));

    shutdown_tx.send(()).unwrap();
    let scan = handle.await.unwrap();
    assert_eq!(scan.cycles(), 1);
    assert_eq!(scan.executor().portfolio().position("JUP"), dec!(10));
    assert_eq!(market.fetch_count(), 3);
}
