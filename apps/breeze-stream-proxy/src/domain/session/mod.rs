//! Feed Session Types
//!
//! The brokerage issues one session token per trading day. It reaches the
//! proxy either from the environment at startup or through the admin
//! endpoint, and is shared by every watch that does not carry its own key.

use std::fmt;

use parking_lot::RwLock;

/// Opaque feed credential. `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    /// Wrap a raw token, trimming surrounding whitespace.
    ///
    /// Returns `None` for blank input.
    #[must_use]
    pub fn new(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    /// The raw token, for the wire.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken(<redacted>)")
    }
}

/// Where a watch's credential came from.
///
/// A shared token is the operator's daily session and may replace the one
/// the feed is using. A client key may only ride on a feed session that
/// already uses the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionScope {
    /// Token from the [`SessionStore`].
    Shared,
    /// Key carried by one client's request.
    Client,
}

/// Process-wide holder of the current daily session token.
#[derive(Debug, Default)]
pub struct SessionStore {
    token: RwLock<Option<SessionToken>>,
}

impl SessionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with a token.
    #[must_use]
    pub fn with_token(token: Option<SessionToken>) -> Self {
        Self {
            token: RwLock::new(token),
        }
    }

    /// Replace the current token.
    pub fn set(&self, token: SessionToken) {
        *self.token.write() = Some(token);
    }

    /// Current token, if any.
    #[must_use]
    pub fn current(&self) -> Option<SessionToken> {
        self.token.read().clone()
    }

    /// Whether a token is held.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.token.read().is_some()
    }
}
