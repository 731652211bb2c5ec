//! Message sink: one log record per received message
//!
//! Payloads are decoded as UTF-8 and logged as
//! `Topic: <topic> | QoS: <qos> | Message: <payload>`. A payload that is
//! not valid UTF-8 produces an error record instead; it never affects the
//! connection. Control characters are escaped so every record stays on
//! one line.

use crate::transport::mqtt::qos_level;
use crate::transport::InboundMessage;
use std::borrow::Cow;
use std::str::Utf8Error;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SinkError {
    #[error("payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] Utf8Error),
}

/// Snapshot of sink counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkStats {
    pub received: u64,
    pub decode_failures: u64,
}

#[derive(Debug, Default)]
struct SinkCounters {
    received: AtomicU64,
    decode_failures: AtomicU64,
}

/// Replace control characters (`\n`, `\r`, `\t`, ...) with escape sequences
pub fn escape_control(text: &str) -> Cow<'_, str> {
    if !text.chars().any(char::is_control) {
        return Cow::Borrowed(text);
    }

    let mut escaped = String::with_capacity(text.len() + 8);
    for c in text.chars() {
        if c.is_control() {
            escaped.extend(c.escape_default());
        } else {
            escaped.push(c);
        }
    }
    Cow::Owned(escaped)
}

/// Format a message as a single log line (pure function)
pub fn format_message(message: &InboundMessage) -> Result<String, SinkError> {
    let text = std::str::from_utf8(&message.payload)?;
    Ok(format!(
        "Topic: {} | QoS: {} | Message: {}",
        escape_control(&message.topic),
        qos_level(message.qos),
        escape_control(text)
    ))
}

/// Cloneable sink; clones share counters
#[derive(Debug, Clone, Default)]
pub struct MessageSink {
    counters: Arc<SinkCounters>,
}

impl MessageSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit exactly one record for the message
    pub fn on_message(&self, message: &InboundMessage) {
        self.counters.received.fetch_add(1, Ordering::Relaxed);

        match format_message(message) {
            Ok(line) => info!("{}", line),
            Err(e) => {
                self.counters.decode_failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    "Error processing message: {} (topic: {}, QoS: {}, {} bytes, received at {})",
                    e,
                    escape_control(&message.topic),
                    qos_level(message.qos),
                    message.payload.len(),
                    message.received_at.to_rfc3339()
                );
            }
        }
    }

    pub fn stats(&self) -> SinkStats {
        SinkStats {
            received: self.counters.received.load(Ordering::Relaxed),
            decode_failures: self.counters.decode_failures.load(Ordering::Relaxed),
        }
    }
}
