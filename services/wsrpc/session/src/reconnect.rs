//! Reconnect attempt accounting.

use tracing::{debug, warn};

/// Bookkeeping for the reactive reconnect policy
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconnectState {
    /// Attempts made since the last successful open or reset
    pub attempts: u32,
    /// A reconnect cycle is underway
    pub in_progress: bool,
    /// The attempt budget is spent; automatic reconnection is suspended
    pub exhausted: bool,
}

impl ReconnectState {
    /// Create a fresh state
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a reconnect cycle as started. Returns false if one already is.
    pub fn begin(&mut self) -> bool {
        if self.in_progress {
            return false;
        }
        self.in_progress = true;
        true
    }

    /// Claim the next attempt number, or `None` once `max_attempts` is reached
    pub fn next_attempt(&mut self, max_attempts: u32) -> Option<u32> {
        if self.attempts >= max_attempts {
            return None;
        }
        self.attempts += 1;
        debug!("Reconnect attempt {}/{}", self.attempts, max_attempts);
        Some(self.attempts)
    }

    /// Mark the current reconnect cycle as finished
    pub fn finish(&mut self) {
        self.in_progress = false;
    }

    /// Give up: no automatic reconnection until [`reset`](Self::reset)
    pub fn mark_exhausted(&mut self) {
        warn!("Reconnect attempts exhausted after {}", self.attempts);
        self.in_progress = false;
        self.exhausted = true;
    }

    /// Forget all attempts
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// A connection opened; the attempt budget starts over
    pub fn on_connected(&mut self) {
        self.attempts = 0;
        self.exhausted = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempt_budget() {
        let mut state = ReconnectState::new();

        assert!(state.begin());
        assert!(!state.begin());
        assert_eq!(state.next_attempt(2), Some(1));
        state.finish();

        assert!(state.begin());
        assert_eq!(state.next_attempt(2), Some(2));
        state.finish();

        assert!(state.begin());
        assert_eq!(state.next_attempt(2), None);
        state.mark_exhausted();

        assert!(state.exhausted);
        assert!(!state.in_progress);
    }

    #[test]
    fn test_connected_restores_budget() {
        let mut state = ReconnectState {
            attempts: 3,
            in_progress: true,
            exhausted: true,
        };
        state.on_connected();

        assert_eq!(state.attempts, 0);
        assert!(!state.exhausted);
        assert!(state.in_progress);

        state.reset();
        assert_eq!(state, ReconnectState::default());
    }

    #[test]
    fn test_zero_budget() {
        let mut state = ReconnectState::new();
        assert!(state.begin());
        assert_eq!(state.next_attempt(0), None);
    }
}
