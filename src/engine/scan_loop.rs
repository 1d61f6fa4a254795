//! The watch loop.
//!
//! One cycle: observe the market (spawned, bounded by the fetch timeout),
//! mark positions, decide, auto-trade, compose, de-duplicate, send. A
//! successful cycle sleeps until `start + interval`; a failed one backs
//! off exponentially. Interactive commands are answered while the loop
//! sleeps, so the portfolio is only ever touched from this task.

use rust_decimal::Decimal;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, error, info, warn};

use super::executor::Executor;
use crate::commands::{
    render_signals, render_status, render_trade, Command, CommandReply, CommandRequest, ReplyTo,
    HELP_TEXT,
};
use crate::config::AppConfig;
use crate::market::MarketSource;
use crate::notify::NotificationChannel;
use crate::strategy::risk::QUANTITY_DP;
use crate::strategy::scorer::SignalScorer;
use crate::strategy::{to_price, Observation, Strategy};
use crate::types::{ActionKind, ProposedAction, Signal, SignalAction, TradeResult, TraderError};

/// Longest backoff between failed cycles.
pub const MAX_BACKOFF_SECS: f64 = 300.0;
pub const HEARTBEAT_EVERY: Duration = Duration::from_secs(3600);
pub const HEARTBEAT_TEXT: &str = "💙 Watcher alive and monitoring the market.";
pub const SEND_TEST_TEXT: &str = "✅ Test message: DEXWATCH can reach this chat.";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LoopSettings {
    /// Period between cycle starts.
    pub interval: Duration,
    pub fetch_timeout: Duration,
    pub heartbeat: bool,
    pub auto_trade: bool,
    /// Sizes for the `scan` command.
    pub command_scan_limit: usize,
    pub command_top_k: usize,
}

impl LoopSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.watch.interval_secs),
            fetch_timeout: Duration::from_secs(config.watch.fetch_timeout_secs),
            heartbeat: config.watch.heartbeat,
            auto_trade: config.watch.auto_trade,
            command_scan_limit: config.market.scan_limit,
            command_top_k: config.market.command_top_k,
        }
    }
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Loop state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    Idle,
    Scanning,
    Composing,
    Sending,
    Sleeping,
    Backoff,
}

impl fmt::Display for LoopPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoopPhase::Idle => "idle",
            LoopPhase::Scanning => "scanning",
            LoopPhase::Composing => "composing",
            LoopPhase::Sending => "sending",
            LoopPhase::Sleeping => "sleeping",
            LoopPhase::Backoff => "backoff",
        };
        f.write_str(name)
    }
}

/// What one successful cycle did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub signals: usize,
    pub trades: usize,
    /// A message went out this cycle.
    pub sent: bool,
    /// The batch matched the last one sent and was skipped.
    pub duplicate: bool,
}

/// Aborts the fetch if the cycle is dropped or times out before it ends.
struct FetchTask(JoinHandle<Result<Observation, TraderError>>);

impl Drop for FetchTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

enum Wake {
    Shutdown,
    Deadline,
    Command(CommandRequest),
    QueueClosed,
}

pub struct ScanLoop {
    strategy: Arc<dyn Strategy>,
    source: Arc<dyn MarketSource>,
    scorer: SignalScorer,
    executor: Executor,
    channel: NotificationChannel,
    destination: String,
    settings: LoopSettings,
    commands: mpsc::Receiver<CommandRequest>,
    phase: LoopPhase,
    attempt: u32,
    cycles: u64,
}

impl ScanLoop {
    pub fn new(
        strategy: Arc<dyn Strategy>,
        source: Arc<dyn MarketSource>,
        executor: Executor,
        channel: NotificationChannel,
        destination: Option<String>,
        settings: LoopSettings,
        commands: mpsc::Receiver<CommandRequest>,
    ) -> Self {
        Self {
            strategy,
            source,
            scorer: SignalScorer::new(),
            executor,
            channel,
            destination: destination.unwrap_or_default(),
            settings,
            commands,
            phase: LoopPhase::Idle,
            attempt: 0,
            cycles: 0,
        }
    }

    pub fn phase(&self) -> LoopPhase {
        self.phase
    }

    /// Consecutive failed cycles.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Successful cycles so far.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    fn set_phase(&mut self, phase: LoopPhase) {
        if self.phase != phase {
            debug!(from = %self.phase, to = %phase, "Loop phase");
            self.phase = phase;
        }
    }

    // -----------------------------------------------------------------------
    // Driver
    // -----------------------------------------------------------------------

    /// Run cycles until `shutdown` fires (or its sender is dropped). The
    /// loop is handed back so callers can inspect the final state.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Self {
        info!(
            strategy = self.strategy.name(),
            source = self.source.name(),
            interval_secs = self.settings.interval.as_secs(),
            auto_trade = self.settings.auto_trade,
            mode = %self.executor.mode(),
            "Scan loop started"
        );

        loop {
            let started = Instant::now();

            let outcome = tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                outcome = self.run_cycle() => outcome,
            };

            let wake_at = match outcome {
                Ok(report) => {
                    self.attempt = 0;
                    self.cycles += 1;
                    info!(
                        cycle = self.cycles,
                        signals = report.signals,
                        trades = report.trades,
                        sent = report.sent,
                        duplicate = report.duplicate,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Cycle complete"
                    );
                    self.set_phase(LoopPhase::Sleeping);
                    started + self.settings.interval
                }
                Err(e) => {
                    self.attempt += 1;
                    let delay = backoff_delay(self.attempt);
                    error!(
                        attempt = self.attempt,
                        error = %e,
                        backoff = format!("{:.1}s", delay.as_secs_f64()),
                        "Cycle failed, backing off"
                    );
                    self.set_phase(LoopPhase::Backoff);
                    Instant::now() + delay
                }
            };

            if !self.wait_until(wake_at, &mut shutdown).await {
                break;
            }
            self.set_phase(LoopPhase::Idle);
        }

        self.set_phase(LoopPhase::Idle);
        info!(cycles = self.cycles, "Scan loop stopped");
        self
    }

    /// Sleep until `deadline`, answering commands meanwhile. Returns
    /// `false` if shutdown was requested.
    async fn wait_until(&mut self, deadline: Instant, shutdown: &mut broadcast::Receiver<()>) -> bool {
        loop {
            let wake = tokio::select! {
                biased;
                _ = shutdown.recv() => Wake::Shutdown,
                _ = sleep_until(deadline) => Wake::Deadline,
                request = self.commands.recv() => match request {
                    Some(request) => Wake::Command(request),
                    None => Wake::QueueClosed,
                },
            };

            match wake {
                Wake::Shutdown => return false,
                Wake::Deadline => return true,
                Wake::Command(request) => {
                    let answered = tokio::select! {
                        biased;
                        _ = shutdown.recv() => false,
                        _ = self.handle_request(request) => true,
                    };
                    if !answered {
                        info!("Shutdown while answering a command");
                        return false;
                    }
                }
                Wake::QueueClosed => {
                    return tokio::select! {
                        biased;
                        _ = shutdown.recv() => false,
                        _ = sleep_until(deadline) => true,
                    };
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Cycle
    // -----------------------------------------------------------------------

    /// Run one full cycle. Errors are the caller's to back off on.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, TraderError> {
        self.set_phase(LoopPhase::Scanning);
        let observation = self.observe().await?;
        if observation.is_empty() {
            debug!("Market source returned nothing");
        }

        self.executor.update_marks(observation.marks());
        let decision = self.strategy.decide(&observation, self.executor.portfolio());

        let executed: Vec<TradeResult> = if self.settings.auto_trade {
            self.executor
                .submit_all(&decision.actions)
                .await
                .into_iter()
                .filter(|t| t.success)
                .collect()
        } else {
            Vec::new()
        };

        let mut report = CycleReport {
            signals: decision.signals.len(),
            trades: executed.len(),
            ..CycleReport::default()
        };

        if decision.signals.is_empty() && executed.is_empty() {
            info!("No opportunities this cycle");
            self.maybe_send_heartbeat().await;
            return Ok(report);
        }

        self.set_phase(LoopPhase::Composing);
        let fp = fingerprint(&decision.signals, &executed);
        if self.channel.is_duplicate(&fp) {
            info!("Signals unchanged since last message, not sending");
            report.duplicate = true;
        } else {
            let text = compose_message(&decision.signals, &executed);
            self.set_phase(LoopPhase::Sending);
            match self.channel.send(&self.destination, &text).await {
                Ok(chunks) => {
                    self.channel.remember(fp);
                    report.sent = chunks > 0;
                }
                Err(e) => warn!(error = %e, "Signal message not delivered"),
            }
        }

        self.maybe_send_heartbeat().await;
        Ok(report)
    }

    /// Run the strategy's fetch as its own task under the fetch timeout.
    async fn observe(&self) -> Result<Observation, TraderError> {
        let strategy = Arc::clone(&self.strategy);
        let source = Arc::clone(&self.source);
        let mut task = FetchTask(tokio::spawn(async move {
            strategy.observe(source.as_ref()).await
        }));

        match timeout(self.settings.fetch_timeout, &mut task.0).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(TraderError::CycleAborted(format!(
                "market fetch task failed: {join_err}"
            ))),
            Err(_) => Err(TraderError::DataUnavailable(format!(
                "{} fetch timed out after {}s",
                self.source.name(),
                self.settings.fetch_timeout.as_secs()
            ))),
        }
    }

    async fn maybe_send_heartbeat(&mut self) {
        if !self.settings.heartbeat || !self.channel.heartbeat_due(HEARTBEAT_EVERY) {
            return;
        }
        self.channel.mark_heartbeat();
        if let Err(e) = self.channel.send(&self.destination, HEARTBEAT_TEXT).await {
            warn!(error = %e, "Heartbeat not delivered");
        }
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    async fn handle_request(&mut self, request: CommandRequest) {
        let reply = match request.command {
            // A chat sendtest without a configured destination answers in
            // the chat that asked.
            Ok(Command::SendTest) => {
                let origin = match &request.reply_to {
                    ReplyTo::Chat(chat_id) => Some(chat_id.as_str()),
                    ReplyTo::Caller(_) => None,
                };
                self.send_test(origin).await
            }
            Ok(command) => self.execute_command(command).await,
            Err(e) => CommandReply::error(&e),
        };

        match request.reply_to {
            ReplyTo::Caller(tx) => {
                if tx.send(reply).is_err() {
                    debug!("Command caller went away before the reply");
                }
            }
            ReplyTo::Chat(chat_id) => {
                if let Err(e) = self.channel.send(&chat_id, &reply.message).await {
                    warn!(chat_id = %chat_id, error = %e, "Command reply not delivered");
                }
            }
        }
    }

    /// Answer one command against the loop's own state.
    pub async fn execute_command(&mut self, command: Command) -> CommandReply {
        debug!(?command, "Executing command");
        match command {
            Command::Help => CommandReply::ok(HELP_TEXT),
            Command::Status => CommandReply::ok(render_status(&self.executor)),
            Command::SendTest => self.send_test(None).await,
            Command::Scan => match self.command_scan().await {
                Ok(signals) => CommandReply::ok(render_signals(&signals)),
                Err(e) => CommandReply::error(&e),
            },
            Command::Trade { side, token, amount } => {
                match self.command_trade(side, &token, amount).await {
                    Ok(result) => CommandReply {
                        ok: result.success,
                        message: render_trade(&result),
                    },
                    Err(e) => CommandReply::error(&e),
                }
            }
        }
    }

    /// Push a fixed message through the notification channel to the alert
    /// chat, or to `fallback` when none is configured.
    async fn send_test(&mut self, fallback: Option<&str>) -> CommandReply {
        let target = match (self.destination.as_str(), fallback) {
            ("", Some(chat_id)) => chat_id.to_string(),
            (destination, _) => destination.to_string(),
        };
        if target.is_empty() {
            return CommandReply::error(&TraderError::Config("no TELEGRAM_CHAT_ID configured".into()));
        }
        if !self.channel.is_enabled() {
            return CommandReply::error(&TraderError::DeliveryFailure(
                "no Telegram bot token configured".into(),
            ));
        }

        match self.channel.send(&target, SEND_TEST_TEXT).await {
            Ok(_) => {
                info!(chat_id = %target, "Test message delivered");
                CommandReply::ok(format!("Test message sent to {target}"))
            }
            Err(e) => CommandReply::error(&e),
        }
    }

    async fn command_scan(&mut self) -> Result<Vec<Signal>, TraderError> {
        let scan = self.scorer.scan(
            self.source.as_ref(),
            self.settings.command_scan_limit,
            self.settings.command_top_k,
        );
        let signals = timeout(self.settings.fetch_timeout, scan)
            .await
            .map_err(|_| TraderError::DataUnavailable("scan timed out".into()))??;

        self.executor.update_marks(
            signals
                .iter()
                .filter_map(|s| to_price(s.token.price).map(|p| (s.token.symbol.clone(), p))),
        );
        Ok(signals)
    }

    /// Convert a USD amount into a quantity at the current price and
    /// submit it through the executor.
    async fn command_trade(
        &mut self,
        side: ActionKind,
        token: &str,
        amount: Decimal,
    ) -> Result<TradeResult, TraderError> {
        let price = self.current_price(token).await?;
        let quantity = amount
            .checked_div(price)
            .ok_or_else(|| TraderError::InvalidCommand("amount too large".into()))?
            .round_dp(QUANTITY_DP);

        let action = match side {
            ActionKind::Buy => ProposedAction::buy(token, price, quantity),
            ActionKind::Sell => ProposedAction::sell(token, price, quantity),
            ActionKind::None => {
                return Err(TraderError::InvalidCommand("trade needs buy or sell".into()))
            }
        };

        self.executor.submit(&action).await
    }

    /// Fresh price for `symbol`, falling back to the last mark when the
    /// source cannot be reached.
    async fn current_price(&mut self, symbol: &str) -> Result<Decimal, TraderError> {
        let fetched = timeout(self.settings.fetch_timeout, self.source.fetch_tick(symbol))
            .await
            .map_err(|_| TraderError::DataUnavailable(format!("price lookup for {symbol} timed out")))
            .and_then(|r| r)
            .and_then(|tick| {
                to_price(tick.price)
                    .ok_or_else(|| TraderError::DataUnavailable(format!("no usable price for {symbol}")))
            });

        match fetched {
            Ok(price) => {
                self.executor.update_marks([(symbol.to_string(), price)]);
                Ok(price)
            }
            Err(e) => self.executor.mark(symbol).ok_or(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Delay before the next cycle after `attempt` consecutive failures:
/// `min(300, 2^attempt + 0.1 × attempt)` seconds.
pub fn backoff_delay(attempt: u32) -> Duration {
    let attempt = f64::from(attempt);
    let secs = (2f64.powf(attempt) + 0.1 * attempt).min(MAX_BACKOFF_SECS);
    Duration::from_secs_f64(secs)
}

/// Identity of a batch for de-duplication: every signal as
/// `symbol:score`, then every executed trade as `kind:symbol:quantity`.
pub fn fingerprint(signals: &[Signal], trades: &[TradeResult]) -> String {
    signals
        .iter()
        .map(|s| format!("{}:{:.3}", s.token.symbol, f64::from(s.score)))
        .chain(
            trades
                .iter()
                .map(|t| format!("{}:{}:{}", t.action, t.symbol, t.quantity.normalize())),
        )
        .collect::<Vec<_>>()
        .join("|")
}

/// Human-readable cycle summary.
pub fn compose_message(signals: &[Signal], trades: &[TradeResult]) -> String {
    let mut lines = Vec::new();

    if signals.is_empty() {
        lines.push(format!("🚨 {} paper trades executed", trades.len()));
    } else {
        lines.push(format!("🚨 {} opportunities detected", signals.len()));
    }
    lines.push(String::new());

    for (action, title) in [
        (SignalAction::Buy, "🟢 Buy"),
        (SignalAction::Sell, "🔴 Sell"),
        (SignalAction::Hold, "⚪ Hold"),
    ] {
        let group: Vec<&Signal> = signals.iter().filter(|s| s.action == action).collect();
        if group.is_empty() {
            continue;
        }
        lines.push(title.to_string());
        for s in group {
            lines.push(format!(
                "- {} ({}) score={} ${}",
                s.token.symbol, s.token.name, s.score, s.token.price
            ));
            for reason in &s.reasons {
                lines.push(format!("   • {reason}"));
            }
        }
        lines.push(String::new());
    }

    if !trades.is_empty() {
        lines.push("💼 Trades".to_string());
        lines.extend(trades.iter().map(render_trade));
    }

    lines.join("\n").trim_end().to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
