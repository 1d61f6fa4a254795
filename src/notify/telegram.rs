//! Telegram Bot API client.
//!
//! Sends messages via `sendMessage` and long-polls `getUpdates` for chat
//! commands. The bot token is only exposed while building a request URL.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::MessageTransport;
use crate::types::TraderError;

const BASE_URL: &str = "https://api.telegram.org";

// ---------------------------------------------------------------------------
// API types
// ---------------------------------------------------------------------------

/// Envelope every Bot API method answers with.
#[derive(Debug, Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<ChatMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessage {
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct TelegramClient {
    http: Client,
    base_url: String,
    token: SecretString,
}

impl TelegramClient {
    pub fn new(token: SecretString, timeout: Duration) -> Result<Self, TraderError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TraderError::Config(format!("failed to build Telegram HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: BASE_URL.to_string(),
            token,
        })
    }

    /// Point the client at a different API host (tests, proxies).
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.token.expose_secret(), method)
    }

    pub async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), TraderError> {
        let resp = self
            .http
            .post(self.method_url("sendMessage"))
            .json(&SendMessageRequest { chat_id, text })
            .send()
            .await
            .map_err(|e| TraderError::DeliveryFailure(format!("sendMessage request failed: {}", e.without_url())))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| TraderError::DeliveryFailure(format!("sendMessage body unreadable: {}", e.without_url())))?;

        if !status.is_success() {
            return Err(TraderError::DeliveryFailure(format!(
                "sendMessage returned {status}: {}",
                truncate(&body, 200)
            )));
        }

        parse_send_response(&body)
    }

    /// Long-poll for updates after `offset`. `timeout_secs` is the server
    /// side wait; the HTTP client timeout must be longer.
    pub async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>, TraderError> {
        let resp = self
            .http
            .get(self.method_url("getUpdates"))
            .query(&[("offset", offset.to_string()), ("timeout", timeout_secs.to_string())])
            .send()
            .await
            .map_err(|e| TraderError::DataUnavailable(format!("getUpdates request failed: {}", e.without_url())))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| TraderError::DataUnavailable(format!("getUpdates body unreadable: {}", e.without_url())))?;

        if !status.is_success() {
            return Err(TraderError::DataUnavailable(format!("getUpdates returned {status}")));
        }

        let updates = parse_updates(&body)?;
        debug!(count = updates.len(), offset, "Telegram updates received");
        Ok(updates)
    }
}

#[async_trait]
impl MessageTransport for TelegramClient {
    async fn deliver(&self, destination: &str, text: &str) -> Result<(), TraderError> {
        self.send_message(destination, text).await
    }
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

fn parse_send_response(body: &str) -> Result<(), TraderError> {
    let parsed: TelegramResponse<serde_json::Value> = serde_json::from_str(body)
        .map_err(|e| TraderError::DeliveryFailure(format!("malformed sendMessage response: {e}")))?;

    if !parsed.ok {
        return Err(TraderError::DeliveryFailure(
            parsed.description.unwrap_or_else(|| "Telegram answered ok=false".into()),
        ));
    }
    Ok(())
}

pub fn parse_updates(body: &str) -> Result<Vec<Update>, TraderError> {
    let parsed: TelegramResponse<Vec<Update>> = serde_json::from_str(body)
        .map_err(|e| TraderError::DataUnavailable(format!("malformed getUpdates response: {e}")))?;

    if !parsed.ok {
        return Err(TraderError::DataUnavailable(
            parsed.description.unwrap_or_else(|| "Telegram answered ok=false".into()),
        ));
    }
    Ok(parsed.result.unwrap_or_default())
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
