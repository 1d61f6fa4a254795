//! Outbound notifications.
//!
//! `NotificationChannel` owns everything the loop remembers about what it
//! has sent: the time of the last delivery (for rate limiting), the
//! fingerprint of the last signal batch (for de-duplication) and the last
//! heartbeat. The wire side sits behind `MessageTransport`.

pub mod telegram;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::types::TraderError;

/// Largest chunk handed to the transport, in characters.
pub const MAX_MESSAGE_CHARS: usize = 3500;

/// Something that can deliver one text message to one destination.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageTransport: Send + Sync {
    async fn deliver(&self, destination: &str, text: &str) -> Result<(), TraderError>;
}

/// Per-loop send bookkeeping. Never persisted.
#[derive(Debug, Default, Clone)]
pub struct NotificationState {
    pub last_send: Option<Instant>,
    pub last_signal_fingerprint: Option<String>,
    pub last_heartbeat: Option<Instant>,
}

pub struct NotificationChannel {
    transport: Option<Arc<dyn MessageTransport>>,
    min_interval: Duration,
    max_chars: usize,
    state: NotificationState,
}

impl NotificationChannel {
    pub fn new(transport: Option<Arc<dyn MessageTransport>>, min_interval: Duration) -> Self {
        Self {
            transport,
            min_interval,
            max_chars: MAX_MESSAGE_CHARS,
            state: NotificationState::default(),
        }
    }

    /// A channel that drops everything. Used when no bot is configured.
    pub fn disabled() -> Self {
        Self::new(None, Duration::ZERO)
    }

    pub fn is_enabled(&self) -> bool {
        self.transport.is_some()
    }

    pub fn state(&self) -> &NotificationState {
        &self.state
    }

    /// Deliver `text` to `destination`, chunked and rate limited.
    ///
    /// Returns how many chunks went out. Without a transport or with an
    /// empty destination nothing is sent and `Ok(0)` is returned. The
    /// first failed chunk aborts the rest of the message.
    pub async fn send(&mut self, destination: &str, text: &str) -> Result<usize, TraderError> {
        let Some(transport) = self.transport.clone() else {
            debug!("No transport configured, message dropped");
            return Ok(0);
        };
        if destination.is_empty() {
            debug!("No destination configured, message dropped");
            return Ok(0);
        }

        let chunks = chunk_message(text, self.max_chars);
        let total = chunks.len();

        for (i, chunk) in chunks.iter().enumerate() {
            if let Some(last) = self.state.last_send {
                let wait = self.min_interval.saturating_sub(last.elapsed());
                if !wait.is_zero() {
                    tokio::time::sleep(wait).await;
                }
            }

            if let Err(e) = transport.deliver(destination, chunk).await {
                warn!(
                    chunk = i + 1,
                    total,
                    error = %e,
                    "Message delivery failed, dropping remaining chunks"
                );
                return Err(e);
            }
            self.state.last_send = Some(Instant::now());
        }

        debug!(chunks = total, chars = text.chars().count(), "Message delivered");
        Ok(total)
    }

    /// True if `fingerprint` matches the last batch that went out.
    pub fn is_duplicate(&self, fingerprint: &str) -> bool {
        self.state.last_signal_fingerprint.as_deref() == Some(fingerprint)
    }

    pub fn remember(&mut self, fingerprint: String) {
        self.state.last_signal_fingerprint = Some(fingerprint);
    }

    /// True when no heartbeat has gone out yet or the last one is at
    /// least `every` old.
    pub fn heartbeat_due(&self, every: Duration) -> bool {
        self.state
            .last_heartbeat
            .map_or(true, |last| last.elapsed() >= every)
    }

    pub fn mark_heartbeat(&mut self) {
        self.state.last_heartbeat = Some(Instant::now());
    }
}

/// Split `text` into chunks of at most `max_chars` characters.
///
/// Breaks only between lines, except for a single line longer than the
/// limit, which is cut at the limit. Concatenating the chunks gives back
/// `text` exactly.
pub fn chunk_message(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    if text.chars().count() <= max_chars {
        return if text.is_empty() { Vec::new() } else { vec![text.to_string()] };
    }

    let mut chunks = Vec::new();
    let mut buffer = String::new();
    let mut buffer_len = 0;

    for line in text.split_inclusive('\n') {
        let line_len = line.chars().count();

        if buffer_len + line_len <= max_chars {
            buffer.push_str(line);
            buffer_len += line_len;
            continue;
        }

        if !buffer.is_empty() {
            chunks.push(std::mem::take(&mut buffer));
            buffer_len = 0;
        }

        if line_len <= max_chars {
            buffer.push_str(line);
            buffer_len = line_len;
            continue;
        }

        // Over-long line: emit full-size pieces, carry the tail.
        let chars: Vec<char> = line.chars().collect();
        let mut pieces = chars.chunks(max_chars).peekable();
        while let Some(piece) = pieces.next() {
            if pieces.peek().is_some() {
                chunks.push(piece.iter().collect());
            } else {
                buffer = piece.iter().collect();
                buffer_len = piece.len();
            }
        }
    }

    if !buffer.is_empty() {
        chunks.push(buffer);
    }
    chunks
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
