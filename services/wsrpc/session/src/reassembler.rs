//! Message reassembly over an unframed text stream.
//!
//! One transport delivery may hold several JSON messages, or only part of
//! one. The reassembler splits each delivery at message boundaries, joins
//! fragments that do not parse on their own with the preceding leftover, and
//! arms a stall timer while a partial message is outstanding.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use wsrpc_wire::split_frames;

/// Default time a partial message may wait for its remainder
pub const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(15);

/// Callback invoked when a partial message stalls
pub type StallCallback = Arc<dyn Fn() + Send + Sync>;

/// Stateful splitter/joiner for inbound text frames
pub struct MessageReassembler {
    leftover: Option<String>,
    stall_timer: Option<JoinHandle<()>>,
    stall_timeout: Duration,
    auto_reconnect: bool,
    on_stall: StallCallback,
}

impl MessageReassembler {
    /// Create a reassembler.
    ///
    /// `on_stall` runs when a partial message has waited `stall_timeout`
    /// without completing, unless `auto_reconnect` is set, in which case a
    /// stall is left for the reconnect policy to recover.
    pub fn new(stall_timeout: Duration, auto_reconnect: bool, on_stall: StallCallback) -> Self {
        Self {
            leftover: None,
            stall_timer: None,
            stall_timeout,
            auto_reconnect,
            on_stall,
        }
    }

    /// Feed one delivery and return every message it completed, in order.
    ///
    /// Arming the stall timer spawns a task, so this must run inside a Tokio
    /// runtime.
    pub fn parse(&mut self, data: &str) -> Vec<Value> {
        let mut messages = Vec::new();

        // Boundaries may straddle two deliveries, so the leftover is joined
        // before splitting rather than after.
        let input = match self.leftover.take() {
            Some(mut leftover) => {
                leftover.push_str(data);
                leftover
            }
            None => data.to_string(),
        };

        for fragment in split_frames(&input) {
            let candidate = match self.leftover.take() {
                Some(mut leftover) => {
                    leftover.push_str(&fragment);
                    leftover
                }
                None if fragment.trim().is_empty() => continue,
                None => fragment,
            };

            match serde_json::from_str::<Value>(&candidate) {
                Ok(value) => {
                    self.disarm();
                    if !is_falsy(&value) {
                        messages.push(value);
                    }
                }
                Err(e) => {
                    trace!("Buffering partial message ({} bytes): {}", candidate.len(), e);
                    self.leftover = Some(candidate);
                    self.arm();
                }
            }
        }

        messages
    }

    /// Whether a partial message is buffered
    pub fn has_leftover(&self) -> bool {
        self.leftover.is_some()
    }

    /// Whether the stall timer is armed
    pub fn stall_armed(&self) -> bool {
        self.stall_timer.is_some()
    }

    /// Drop any buffered fragment and cancel the stall timer
    pub fn clear(&mut self) {
        self.leftover = None;
        self.disarm();
    }

    fn arm(&mut self) {
        self.disarm();

        let timeout = self.stall_timeout;
        let auto_reconnect = self.auto_reconnect;
        let on_stall = self.on_stall.clone();
        self.stall_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if auto_reconnect {
                debug!("Partial message stalled for {:?}, leaving recovery to reconnect", timeout);
                return;
            }
            warn!("Partial message stalled for {:?}", timeout);
            on_stall();
        }));
    }

    fn disarm(&mut self) {
        if let Some(timer) = self.stall_timer.take() {
            timer.abort();
        }
    }
}

impl Drop for MessageReassembler {
    fn drop(&mut self) {
        self.disarm();
    }
}

/// `null`, `false`, zero and the empty string carry no message
fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}
