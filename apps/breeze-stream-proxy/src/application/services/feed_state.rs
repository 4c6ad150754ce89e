//! Feed State Tracking
//!
//! Connection status of the shared Breeze feed, updated by the event pump
//! and read by the health endpoints.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

/// Connection state of the upstream feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No connection.
    Disconnected,
    /// Connected and authenticated.
    Connected,
    /// Reconnecting after a drop.
    Reconnecting,
    /// Last attempt ended in an error.
    Error,
}

/// Point-in-time view of [`FeedState`].
#[derive(Debug, Clone, Serialize)]
pub struct FeedStatus {
    /// Current connection state.
    pub state: ConnectionState,
    /// When the feed last connected.
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Last error reported by the feed.
    pub error_message: Option<String>,
    /// Reconnect attempts since the last successful connect.
    pub reconnect_attempts: u32,
    /// Ticks received since start.
    pub ticks_received: u64,
}

/// Tracks the state of the upstream feed connection.
#[derive(Debug)]
pub struct FeedState {
    state: RwLock<ConnectionState>,
    last_connected_at: RwLock<Option<DateTime<Utc>>>,
    error_message: RwLock<Option<String>>,
    reconnect_attempts: AtomicU32,
    ticks_received: AtomicU64,
}

impl Default for FeedState {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedState {
    /// Start disconnected.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: RwLock::new(ConnectionState::Disconnected),
            last_connected_at: RwLock::new(None),
            error_message: RwLock::new(None),
            reconnect_attempts: AtomicU32::new(0),
            ticks_received: AtomicU64::new(0),
        }
    }

    /// Set the connection state.
    pub fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
        if state == ConnectionState::Connected {
            *self.last_connected_at.write() = Some(Utc::now());
            self.reconnect_attempts.store(0, Ordering::Relaxed);
            *self.error_message.write() = None;
        }
    }

    /// Set an error state with message.
    pub fn set_error(&self, message: String) {
        *self.state.write() = ConnectionState::Error;
        *self.error_message.write() = Some(message);
    }

    /// Increment reconnect attempts.
    pub fn increment_reconnect_attempts(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment ticks received counter.
    pub fn increment_ticks(&self) {
        self.ticks_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current connection state.
    #[must_use]
    pub fn get_state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Get ticks received count.
    #[must_use]
    pub fn get_ticks_received(&self) -> u64 {
        self.ticks_received.load(Ordering::Relaxed)
    }

    /// Snapshot for health reporting.
    #[must_use]
    pub fn status(&self) -> FeedStatus {
        FeedStatus {
            state: self.get_state(),
            last_connected_at: *self.last_connected_at.read(),
            error_message: self.error_message.read().clone(),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            ticks_received: self.get_ticks_received(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_state_transitions() {
        let state = FeedState::new();

        assert_eq!(state.get_state(), ConnectionState::Disconnected);

        state.set_state(ConnectionState::Reconnecting);
        assert_eq!(state.get_state(), ConnectionState::Reconnecting);

        state.set_state(ConnectionState::Connected);
        assert_eq!(state.get_state(), ConnectionState::Connected);
        assert!(state.status().last_connected_at.is_some());

        state.set_error("auth failed".to_string());
        assert_eq!(state.get_state(), ConnectionState::Error);
        assert_eq!(state.status().error_message.as_deref(), Some("auth failed"));
    }

    #[test]
    fn connect_resets_reconnects_and_error() {
        let state = FeedState::new();

        state.increment_reconnect_attempts();
        state.increment_reconnect_attempts();
        state.set_error("dropped".to_string());
        assert_eq!(state.status().reconnect_attempts, 2);

        state.set_state(ConnectionState::Connected);
        let status = state.status();
        assert_eq!(status.reconnect_attempts, 0);
        assert!(status.error_message.is_none());
    }

    #[test]
    fn tick_counter() {
        let state = FeedState::new();
        state.increment_ticks();
        state.increment_ticks();
        assert_eq!(state.get_ticks_received(), 2);
    }

    #[test]
    fn status_serializes_state_snake_case() {
        let value = serde_json::to_value(FeedState::new().status()).unwrap();
        assert_eq!(value["state"], "disconnected");
    }
}
