//! DEXWATCH — DexScreener signal scanner with Telegram alerts.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! wires the market source, strategy, paper ledger and notification
//! channel into the scan loop, and runs it until Ctrl+C.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

use dexwatch::commands::{command_channel, run_telegram_listener};
use dexwatch::config::{AppConfig, Credentials, StrategyKind, DEFAULT_CONFIG_FILE};
use dexwatch::dashboard;
use dexwatch::engine::executor::{trader_for, Executor};
use dexwatch::engine::portfolio::Portfolio;
use dexwatch::engine::scan_loop::{LoopSettings, ScanLoop};
use dexwatch::market::dexscreener::DexScreenerClient;
use dexwatch::market::MarketSource;
use dexwatch::notify::telegram::TelegramClient;
use dexwatch::notify::{MessageTransport, NotificationChannel};
use dexwatch::strategy::risk::{RiskConfig, RiskManager};
use dexwatch::strategy::{RankedScan, Strategy, ThresholdWatch};

const BANNER: &str = r#"
 ____  _______  ____        ___  _____ ____ _   _
|  _ \| ____\ \/ /\ \      / / \|_   _/ ___| | | |
| | | |  _|  \  /  \ \ /\ / / _ \ | || |   | |_| |
| |_| | |___ /  \   \ V  V / ___ \| || |___|  _  |
|____/|_____/_/\_\   \_/\_/_/   \_\_| \____|_| |_|

  DexScreener signals → Telegram, paper-traded
  v0.1.0
"#;

/// HTTP timeout for the bot client; must outlast the `getUpdates` long poll.
const TELEGRAM_HTTP_TIMEOUT: Duration = Duration::from_secs(45);

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path =
        std::env::var("DEXWATCH_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
    let cfg = AppConfig::load(&config_path)
        .with_context(|| format!("Failed to load configuration ({config_path})"))?;
    let Credentials {
        telegram_bot_token,
        wallet_keypair_path,
    } = Credentials::resolve(&cfg, |key| std::env::var(key).ok())
        .context("Credentials do not match configuration")?;

    init_logging();

    println!("{BANNER}");
    info!(
        strategy = ?cfg.strategy.kind,
        chain = %cfg.market.chain_id,
        interval_secs = cfg.watch.interval_secs,
        starting_cash = format!("${:.2}", cfg.portfolio.starting_cash),
        mode = %cfg.portfolio.execution_mode,
        "DEXWATCH starting up"
    );

    // -- Initialise components -------------------------------------------

    let source: Arc<dyn MarketSource> = Arc::new(
        DexScreenerClient::new(
            &cfg.market.chain_id,
            &cfg.market.search_query,
            Duration::from_secs(cfg.watch.fetch_timeout_secs),
        )
        .context("Failed to build DexScreener client")?,
    );

    let strategy = build_strategy(&cfg);

    let trader = trader_for(cfg.portfolio.execution_mode, wallet_keypair_path)?;
    let executor = Executor::new(
        trader,
        RiskManager::new(RiskConfig {
            max_position_pct: cfg.risk.max_position_pct,
        }),
        Portfolio::new(cfg.portfolio.starting_cash),
    );

    let telegram = match telegram_bot_token {
        Some(token) => Some(Arc::new(
            TelegramClient::new(token, TELEGRAM_HTTP_TIMEOUT)
                .context("Failed to build Telegram client")?,
        )),
        None => {
            warn!("No TELEGRAM_BOT_TOKEN configured — signals will only be logged");
            None
        }
    };
    if telegram.is_some() && cfg.telegram.chat_id.is_none() {
        warn!("No TELEGRAM_CHAT_ID configured — only command replies will be sent");
    }

    let channel = NotificationChannel::new(
        telegram
            .clone()
            .map(|client| client as Arc<dyn MessageTransport>),
        Duration::from_secs_f64(cfg.telegram.rate_limit_secs),
    );

    let (commands, command_rx) = command_channel();
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // -- Command surfaces ------------------------------------------------

    let dashboard_task = if cfg.dashboard.enabled {
        Some(
            dashboard::spawn_dashboard(commands.clone(), cfg.dashboard.port, shutdown_tx.subscribe())
                .await?,
        )
    } else {
        None
    };

    if cfg.telegram.commands_enabled {
        if let Some(client) = telegram.clone() {
            tokio::spawn(run_telegram_listener(
                client,
                commands.clone(),
                cfg.telegram.chat_id.clone(),
                shutdown_tx.subscribe(),
            ));
        }
    }
    drop(commands);

    // -- Main loop -------------------------------------------------------

    let scan_loop = ScanLoop::new(
        strategy,
        source,
        executor,
        channel,
        cfg.telegram.chat_id.clone(),
        LoopSettings::from_config(&cfg),
        command_rx,
    );
    let mut loop_task = tokio::spawn(scan_loop.run(shutdown_tx.subscribe()));

    info!(
        interval_secs = cfg.watch.interval_secs,
        "Entering main loop. Press Ctrl+C to stop."
    );

    let scan_loop = tokio::select! {
        joined = &mut loop_task => {
            warn!("Scan loop exited on its own");
            joined.context("Scan loop task failed")?
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl+C")?;
            info!("Shutdown signal received.");
            let _ = shutdown_tx.send(());
            loop_task.await.context("Scan loop task failed")?
        }
    };

    if let Some(task) = dashboard_task {
        let _ = task.await;
    }

    let executor = scan_loop.executor();
    info!(
        cycles = scan_loop.cycles(),
        trades = executor.trade_count(),
        cash = format!("${:.2}", executor.portfolio().cash()),
        positions = executor.portfolio().positions().len(),
        value = format!("${:.2}", executor.total_value()),
        "DEXWATCH shut down cleanly."
    );

    Ok(())
}

fn build_strategy(cfg: &AppConfig) -> Arc<dyn Strategy> {
    match cfg.strategy.kind {
        StrategyKind::Ranked => Arc::new(RankedScan::new(cfg.market.scan_limit, cfg.market.top_k)),
        StrategyKind::Threshold => Arc::new(ThresholdWatch::new(
            &cfg.strategy.symbol,
            cfg.strategy.threshold,
        )),
    }
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("dexwatch=info"));

    let json_logging = std::env::var("DEXWATCH_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
