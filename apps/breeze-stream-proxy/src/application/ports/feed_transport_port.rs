//! Feed Transport Port (Driven Port)
//!
//! Interface for the shared push-feed connection. Ticks are not returned
//! from these calls; the adapter emits them as [`FeedEvent`]s on the channel
//! it hands out at construction.

use async_trait::async_trait;

use crate::domain::session::{SessionScope, SessionToken};
use crate::domain::streaming::Tick;

/// Events emitted by the feed transport.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// Connected and authenticated.
    Connected,
    /// Connection lost.
    Disconnected,
    /// Reconnecting after an unexpected drop.
    Reconnecting {
        /// Attempt number, starting at 1.
        attempt: u32,
    },
    /// A market data tick.
    Tick(Tick),
    /// A non-fatal transport error.
    Error(String),
}

/// Feed session error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// No credential is available.
    #[error("no feed session is available")]
    Missing,

    /// The credential was refused.
    #[error("feed session rejected: {message}")]
    Rejected {
        /// Error details.
        message: String,
    },
}

/// Feed transport error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    /// The transport handshake failed.
    #[error("feed connection error: {message}")]
    Connection {
        /// Error details.
        message: String,
    },

    /// The feed refused the session during the handshake.
    #[error("feed authentication failed: {message}")]
    Unauthorized {
        /// Error details.
        message: String,
    },

    /// The transport is not connected.
    #[error("feed is not connected")]
    NotConnected,

    /// A subscribe or unsubscribe command failed.
    #[error("feed subscription error for {provider_code}: {message}")]
    Subscription {
        /// Provider code the command was for.
        provider_code: String,
        /// Error details.
        message: String,
    },

    /// No reply to a command in time; the bridge may still act on it.
    #[error("feed command for {provider_code} timed out")]
    Timeout {
        /// Provider code the command was for.
        provider_code: String,
    },

    /// The transport task is gone.
    #[error("feed transport closed")]
    Closed,
}

/// Port for the shared push-feed transport.
///
/// Mutating calls are serialized by the caller; `is_connected` may be called
/// from anywhere.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FeedTransportPort: Send + Sync {
    /// Confirm the credential a watch will use.
    ///
    /// A [`SessionScope::Shared`] token is installed for the next `connect`
    /// or reconnect. A [`SessionScope::Client`] key is rejected when it does
    /// not match the session of an open connection, and is never installed
    /// over it.
    async fn establish_session(
        &self,
        token: &SessionToken,
        scope: SessionScope,
    ) -> Result<(), SessionError>;

    /// Open the transport if it is not already open.
    async fn connect(&self) -> Result<(), FeedError>;

    /// Subscribe to a provider code.
    async fn subscribe(&self, provider_code: &str) -> Result<(), FeedError>;

    /// Unsubscribe from a provider code.
    async fn unsubscribe(&self, provider_code: &str) -> Result<(), FeedError>;

    /// Close the transport.
    async fn disconnect(&self) -> Result<(), FeedError>;

    /// Whether the transport is currently connected.
    fn is_connected(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_error_display() {
        let err = FeedError::Subscription {
            provider_code: "RELIND".to_string(),
            message: "unknown stock".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "feed subscription error for RELIND: unknown stock"
        );
        assert_eq!(FeedError::NotConnected.to_string(), "feed is not connected");
    }

    #[test]
    fn session_error_display() {
        assert_eq!(SessionError::Missing.to_string(), "no feed session is available");
    }
}
