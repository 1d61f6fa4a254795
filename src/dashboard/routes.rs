//! Dashboard API route handlers.
//!
//! Every handler forwards a command to the scan loop and returns the
//! loop's `{ok, message}` answer as JSON.

use axum::{extract::State, http::StatusCode, Json};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::commands::{Command, CommandReply, CommandSender};
use crate::types::{ActionKind, TraderError};

pub type AppState = CommandSender;

#[derive(Debug, Clone, Deserialize)]
pub struct TradeRequest {
    pub side: String,
    pub token: String,
    /// USD notional.
    pub amount: Decimal,
}

type Reply = (StatusCode, Json<CommandReply>);

async fn forward(commands: &CommandSender, command: Command) -> Reply {
    match commands.ask(command).await {
        Ok(reply) => (StatusCode::OK, Json(reply)),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, Json(CommandReply::error(&e))),
    }
}

fn bad_request(e: &TraderError) -> Reply {
    (StatusCode::BAD_REQUEST, Json(CommandReply::error(e)))
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// GET /api/status
pub async fn get_status(State(commands): State<AppState>) -> Reply {
    forward(&commands, Command::Status).await
}

/// POST /api/scan
pub async fn post_scan(State(commands): State<AppState>) -> Reply {
    forward(&commands, Command::Scan).await
}

/// POST /api/sendtest
pub async fn post_send_test(State(commands): State<AppState>) -> Reply {
    forward(&commands, Command::SendTest).await
}

/// POST /api/trade
pub async fn post_trade(State(commands): State<AppState>, Json(req): Json<TradeRequest>) -> Reply {
    let side: ActionKind = match req.side.parse() {
        Ok(side) => side,
        Err(e) => return bad_request(&e),
    };
    if req.amount <= Decimal::ZERO {
        return bad_request(&TraderError::InvalidCommand("amount must be positive".into()));
    }
    let token = req.token.trim().to_uppercase();
    if token.is_empty() {
        return bad_request(&TraderError::InvalidCommand("token is required".into()));
    }

    forward(
        &commands,
        Command::Trade {
            side,
            token,
            amount: req.amount,
        },
    )
    .await
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
