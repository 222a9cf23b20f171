//! Configuration handling for the wsrpc client.
//!
//! Settings come from an optional YAML file, then `WSRPC_*` environment
//! variables, then command line flags, each layer overriding the previous.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};
use wsrpc_session::SessionConfig;

/// Client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// WebSocket endpoint to dial
    pub endpoint: String,
    /// Session behaviour
    pub session: SessionSettings,
}

/// Session settings as they appear in the config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Reconnect automatically after an abnormal close
    pub auto_reconnect: bool,
    /// Wait before each reconnect attempt (milliseconds)
    pub delay_ms: u64,
    /// Reconnect attempts before giving up
    pub max_attempts: u32,
    /// Idle watchdog period (milliseconds)
    pub disconnect_check_interval_ms: u64,
    /// Partial message stall timeout (milliseconds)
    pub chunk_timeout_ms: u64,
    /// Per-request timeout (milliseconds), none when absent
    pub request_timeout_ms: Option<u64>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        let defaults = SessionConfig::default();
        Self {
            auto_reconnect: defaults.auto_reconnect,
            delay_ms: defaults.delay.as_millis() as u64,
            max_attempts: defaults.max_attempts,
            disconnect_check_interval_ms: defaults.disconnect_check_interval.as_millis() as u64,
            chunk_timeout_ms: defaults.chunk_timeout.as_millis() as u64,
            request_timeout_ms: Some(30_000),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:8546".to_string(),
            session: SessionSettings::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let path = config_path.as_ref();
        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => match serde_yaml::from_str::<ClientConfig>(&content) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", path);
                    config
                }
                Err(e) => {
                    warn!("Failed to parse config file {:?} ({}), using defaults", path, e);
                    Self::default()
                }
            },
            Err(_) => {
                warn!("Config file {:?} not found, using defaults", path);
                Self::default()
            }
        };

        config.apply_overrides(|key| std::env::var(key).ok());

        info!(
            "Final client configuration: endpoint={}, auto_reconnect={}, max_attempts={}",
            config.endpoint, config.session.auto_reconnect, config.session.max_attempts
        );

        Ok(config)
    }

    /// Apply `WSRPC_*` overrides from `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = lookup("WSRPC_ENDPOINT") {
            info!("Endpoint overridden by environment: {}", endpoint);
            self.endpoint = endpoint;
        }

        if let Some(value) = lookup("WSRPC_AUTO_RECONNECT") {
            match value.to_lowercase().as_str() {
                "true" | "1" => self.session.auto_reconnect = true,
                "false" | "0" => self.session.auto_reconnect = false,
                other => warn!("Ignoring WSRPC_AUTO_RECONNECT={}", other),
            }
        }

        if let Some(delay) = lookup("WSRPC_DELAY_MS").and_then(|v| v.parse().ok()) {
            self.session.delay_ms = delay;
            info!("Reconnect delay overridden by environment: {}ms", delay);
        }

        if let Some(attempts) = lookup("WSRPC_MAX_ATTEMPTS").and_then(|v| v.parse().ok()) {
            self.session.max_attempts = attempts;
            info!("Max attempts overridden by environment: {}", attempts);
        }

        if let Some(interval) =
            lookup("WSRPC_DISCONNECT_CHECK_INTERVAL_MS").and_then(|v| v.parse().ok())
        {
            self.session.disconnect_check_interval_ms = interval;
            info!("Disconnect check interval overridden by environment: {}ms", interval);
        }

        if let Some(timeout) = lookup("WSRPC_REQUEST_TIMEOUT_MS").and_then(|v| v.parse::<u64>().ok()) {
            // 0 disables the timeout
            self.session.request_timeout_ms = (timeout > 0).then_some(timeout);
            info!("Request timeout overridden by environment: {}ms", timeout);
        }
    }

    /// Session configuration for the library
    pub fn session_config(&self) -> SessionConfig {
        let settings = &self.session;
        SessionConfig {
            auto_reconnect: settings.auto_reconnect,
            delay: Duration::from_millis(settings.delay_ms),
            max_attempts: settings.max_attempts,
            disconnect_check_interval: Duration::from_millis(settings.disconnect_check_interval_ms),
            chunk_timeout: Duration::from_millis(settings.chunk_timeout_ms),
            request_timeout: settings.request_timeout_ms.map(Duration::from_millis),
            ..SessionConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        let session = config.session_config();

        assert_eq!(config.endpoint, "ws://127.0.0.1:8546");
        assert!(session.auto_reconnect);
        assert_eq!(session.delay, Duration::from_millis(5000));
        assert_eq!(session.max_attempts, 5);
        assert_eq!(session.disconnect_check_interval, Duration::from_millis(3000));
        assert_eq!(session.chunk_timeout, Duration::from_secs(15));
    }

    #[test]
    fn test_load_from_file() {
        let yaml_content = r#"
endpoint: ws://node.example:8546
session:
  auto_reconnect: false
  delay_ms: 250
  max_attempts: 2
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let config = ClientConfig::load_from_file(temp_file.path()).unwrap();
        let session = config.session_config();

        assert_eq!(config.endpoint, "ws://node.example:8546");
        assert!(!session.auto_reconnect);
        assert_eq!(session.delay, Duration::from_millis(250));
        assert_eq!(session.max_attempts, 2);
        // Unset keys keep their defaults
        assert_eq!(session.disconnect_check_interval, Duration::from_millis(3000));
    }

    #[test]
    fn test_unparsable_file_falls_back() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"endpoint: [unterminated").unwrap();

        let config = ClientConfig::load_from_file(temp_file.path()).unwrap();
        assert_eq!(config.session, SessionSettings::default());
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("WSRPC_ENDPOINT", "wss://override:443"),
            ("WSRPC_AUTO_RECONNECT", "false"),
            ("WSRPC_MAX_ATTEMPTS", "9"),
            ("WSRPC_DELAY_MS", "not-a-number"),
            ("WSRPC_REQUEST_TIMEOUT_MS", "0"),
        ]
        .into_iter()
        .collect();

        let mut config = ClientConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.endpoint, "wss://override:443");
        assert!(!config.session.auto_reconnect);
        assert_eq!(config.session.max_attempts, 9);
        assert_eq!(config.session.delay_ms, 5000);
        assert_eq!(config.session.request_timeout_ms, None);
    }
}
