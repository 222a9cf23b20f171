//! Session configuration.

use std::time::Duration;

/// Configuration for a JSON-RPC session
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Reconnect automatically after an abnormal close
    pub auto_reconnect: bool,
    /// Wait before each reconnect attempt
    pub delay: Duration,
    /// Reconnect attempts before giving up
    pub max_attempts: u32,
    /// Period of the idle connection watchdog
    pub disconnect_check_interval: Duration,
    /// How long a partial message may wait for its remainder
    pub chunk_timeout: Duration,
    /// Optional per-request timeout
    pub request_timeout: Option<Duration>,
    /// Capacity of the event broadcast channel
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            delay: Duration::from_millis(5000),
            max_attempts: 5,
            disconnect_check_interval: Duration::from_millis(3000),
            chunk_timeout: Duration::from_secs(15),
            request_timeout: None,
            event_capacity: 256,
        }
    }
}
