//! Interactive commands.
//!
//! Commands arrive from Telegram chat or the HTTP dashboard and are
//! queued to the scan loop, which owns the portfolio and answers them
//! between cycles. This module holds the command grammar, the queue
//! handle, the reply renderers and the Telegram polling task.

use rust_decimal::Decimal;
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::engine::executor::Executor;
use crate::notify::telegram::TelegramClient;
use crate::types::{ActionKind, Signal, TradeResult, TraderError};

/// Pending commands the loop will hold before callers wait.
pub const COMMAND_QUEUE_CAPACITY: usize = 32;

/// Server-side wait for one `getUpdates` long poll.
const POLL_TIMEOUT_SECS: u64 = 30;
/// Pause after a failed poll.
const POLL_RETRY: Duration = Duration::from_secs(5);

pub const HELP_TEXT: &str = "Commands:\n\
/status - cash, positions, trade count and mode\n\
/scan - score the market now and show the top signals\n\
/trade <buy|sell> <token> <usd> - paper trade through risk checks\n\
/sendtest - send a test message to the alert chat\n\
/help - this message";

// ---------------------------------------------------------------------------
// Grammar
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Status,
    Scan,
    /// `amount` is USD notional.
    Trade {
        side: ActionKind,
        token: String,
        amount: Decimal,
    },
    /// Delivery check to the alert chat.
    SendTest,
    Help,
}

impl FromStr for Command {
    type Err = TraderError;

    /// Parse `/name args…`. The leading slash and a `@botname` suffix on
    /// the command word are optional.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut words = s.split_whitespace();
        let head = words
            .next()
            .ok_or_else(|| TraderError::InvalidCommand("empty command".into()))?;
        let name = head
            .trim_start_matches('/')
            .split('@')
            .next()
            .unwrap_or_default()
            .to_lowercase();
        let args: Vec<&str> = words.collect();

        match name.as_str() {
            "status" => Ok(Command::Status),
            "scan" => Ok(Command::Scan),
            "sendtest" => Ok(Command::SendTest),
            "help" | "start" => Ok(Command::Help),
            "trade" => parse_trade(&args),
            other => Err(TraderError::InvalidCommand(format!(
                "unknown command '{other}', try /help"
            ))),
        }
    }
}

fn parse_trade(args: &[&str]) -> Result<Command, TraderError> {
    let [side, token, amount] = args else {
        return Err(TraderError::InvalidCommand(
            "usage: /trade <buy|sell> <token> <usd>".into(),
        ));
    };

    let side: ActionKind = side.parse()?;
    let amount = Decimal::from_str(amount)
        .map_err(|_| TraderError::InvalidCommand(format!("'{amount}' is not a number")))?;
    if amount <= Decimal::ZERO {
        return Err(TraderError::InvalidCommand("amount must be positive".into()));
    }

    Ok(Command::Trade {
        side,
        token: token.to_uppercase(),
        amount,
    })
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// Where the loop sends its answer.
#[derive(Debug)]
pub enum ReplyTo {
    /// In-process caller waiting on the answer (dashboard).
    Caller(oneshot::Sender<CommandReply>),
    /// Chat to answer through the notification channel.
    Chat(String),
}

#[derive(Debug)]
pub struct CommandRequest {
    /// A parse failure is carried through so the loop can answer it in
    /// the originating chat.
    pub command: Result<Command, TraderError>,
    pub reply_to: ReplyTo,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandReply {
    pub ok: bool,
    pub message: String,
}

impl CommandReply {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }

    pub fn error(err: &TraderError) -> Self {
        Self {
            ok: false,
            message: err.to_string(),
        }
    }
}

/// Cloneable handle for queueing commands to the loop.
#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: mpsc::Sender<CommandRequest>,
}

/// Create the command queue.
pub fn command_channel() -> (CommandSender, mpsc::Receiver<CommandRequest>) {
    let (tx, rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
    (CommandSender { tx }, rx)
}

impl CommandSender {
    /// Queue `command` and wait for the loop's answer.
    pub async fn ask(&self, command: Command) -> Result<CommandReply, TraderError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(CommandRequest {
                command: Ok(command),
                reply_to: ReplyTo::Caller(reply_tx),
            })
            .await
            .map_err(|_| loop_stopped())?;
        reply_rx.await.map_err(|_| loop_stopped())
    }

    /// Queue a chat command; the loop answers in `chat_id`.
    pub async fn forward(
        &self,
        command: Result<Command, TraderError>,
        chat_id: String,
    ) -> Result<(), TraderError> {
        self.tx
            .send(CommandRequest {
                command,
                reply_to: ReplyTo::Chat(chat_id),
            })
            .await
            .map_err(|_| loop_stopped())
    }
}

fn loop_stopped() -> TraderError {
    TraderError::CycleAborted("scan loop is not running".into())
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

pub fn render_status(executor: &Executor) -> String {
    let portfolio = executor.portfolio();
    let mut lines = vec![
        "📊 Portfolio status".to_string(),
        format!("Mode: {}", executor.mode()),
        format!("Cash: ${:.2}", portfolio.cash()),
    ];

    if portfolio.positions().is_empty() {
        lines.push("Positions: none".to_string());
    } else {
        lines.push("Positions:".to_string());
        for (symbol, qty) in portfolio.positions() {
            match executor.mark(symbol) {
                Some(price) => lines.push(format!(
                    "  {symbol}: {} (${:.2})",
                    qty.normalize(),
                    *qty * price
                )),
                None => lines.push(format!("  {symbol}: {}", qty.normalize())),
            }
        }
    }

    lines.push(format!("Trades: {}", executor.trade_count()));
    lines.push(format!("Value: ${:.2}", executor.total_value()));
    lines.join("\n")
}

pub fn render_signals(signals: &[Signal]) -> String {
    if signals.is_empty() {
        return "🔎 No signals right now.".to_string();
    }
    let mut lines = vec![format!("🔎 Top {} signals", signals.len())];
    for (i, signal) in signals.iter().enumerate() {
        lines.push(format!("{}. {signal}", i + 1));
    }
    lines.join("\n")
}

pub fn render_trade(result: &TradeResult) -> String {
    result.to_string()
}

// ---------------------------------------------------------------------------
// Telegram listener
// ---------------------------------------------------------------------------

/// Long-poll Telegram for chat commands and queue them to the loop until
/// shutdown. When `allowed_chat` is set, messages from any other chat are
/// ignored.
pub async fn run_telegram_listener(
    client: Arc<TelegramClient>,
    commands: CommandSender,
    allowed_chat: Option<String>,
    mut shutdown: broadcast::Receiver<()>,
) {
    info!("Telegram command listener started");
    let mut offset = 0_i64;

    loop {
        let updates = tokio::select! {
            _ = shutdown.recv() => break,
            result = client.get_updates(offset, POLL_TIMEOUT_SECS) => result,
        };

        let updates = match updates {
            Ok(updates) => updates,
            Err(e) => {
                warn!(error = %e, "Telegram poll failed");
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = tokio::time::sleep(POLL_RETRY) => continue,
                }
            }
        };

        for update in updates {
            offset = offset.max(update.update_id + 1);

            let Some(message) = update.message else { continue };
            let Some(text) = message.text.as_deref() else { continue };
            if !text.starts_with('/') {
                continue;
            }

            let chat_id = message.chat.id.to_string();
            if allowed_chat.as_deref().is_some_and(|allowed| allowed != chat_id) {
                debug!(chat_id = %chat_id, "Ignoring command from unknown chat");
                continue;
            }

            debug!(chat_id = %chat_id, text, "Chat command received");
            if commands.forward(text.parse(), chat_id).await.is_err() {
                info!("Scan loop gone, stopping Telegram listener");
                return;
            }
        }
    }

    info!("Telegram command listener stopped");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
