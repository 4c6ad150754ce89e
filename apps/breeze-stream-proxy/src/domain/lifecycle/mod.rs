//! Watch Lifecycle Types
//!
//! The per-client state machine and the per-symbol outcomes a watch reports
//! back to its client.
//!
//! ```text
//! Idle ──► SessionPending ──► Connecting ──► Active ──► Draining ──► Closed
//!                │                 │  │                   ▲
//!                └──────► Closed ◄─┘  └───────────────────┘
//! ```

use serde::{Deserialize, Serialize};

use crate::domain::subscription::ClientId;

// =============================================================================
// Lifecycle State
// =============================================================================

/// State of one client's watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// No subscriptions yet.
    Idle,
    /// Feed credential not yet confirmed.
    SessionPending,
    /// Transport handshake and per-symbol subscribes in progress.
    Connecting,
    /// At least one symbol subscribed, ticks flowing.
    Active,
    /// Client gone, unsubscribes in progress.
    Draining,
    /// Terminal.
    Closed,
}

impl LifecycleState {
    /// Whether `self → next` is an allowed transition.
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::SessionPending)
                | (Self::SessionPending, Self::Connecting | Self::Closed)
                | (Self::Connecting, Self::Active | Self::Draining | Self::Closed)
                | (Self::Active, Self::Draining)
                | (Self::Draining, Self::Closed)
        )
    }

    /// Whether this is the terminal state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Lowercase name used in logs and client messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::SessionPending => "session_pending",
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Draining => "draining",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by the lifecycle state machine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    /// Transition not permitted from the current state.
    #[error("invalid lifecycle transition {from} -> {to}")]
    InvalidTransition {
        /// Current state.
        from: LifecycleState,
        /// Requested state.
        to: LifecycleState,
    },
}

/// Guarded lifecycle for one watch.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: LifecycleState,
    history: Vec<LifecycleState>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    /// Start in [`LifecycleState::Idle`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: LifecycleState::Idle,
            history: vec![LifecycleState::Idle],
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> LifecycleState {
        self.state
    }

    /// Every state visited, in order.
    #[must_use]
    pub fn history(&self) -> &[LifecycleState] {
        &self.history
    }

    /// Move to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidTransition`] if the transition is not
    /// allowed; the state is left unchanged.
    pub fn advance(&mut self, next: LifecycleState) -> Result<(), LifecycleError> {
        if !self.state.can_advance_to(next) {
            return Err(LifecycleError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::trace!(from = %self.state, to = %next, "Lifecycle transition");
        self.state = next;
        self.history.push(next);
        Ok(())
    }
}

// =============================================================================
// Outcomes
// =============================================================================

/// Result of subscribing one requested ticker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// This client opened the upstream subscription.
    Subscribed,
    /// The upstream subscription already existed for another client.
    Shared,
    /// The upstream subscribe failed.
    Failed {
        /// Reason reported by the transport.
        reason: String,
    },
    /// The ticker was rejected before reaching the transport.
    Rejected {
        /// Why the ticker was rejected.
        reason: String,
    },
}

impl OutcomeStatus {
    /// Whether ticks will flow for this ticker.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Subscribed | Self::Shared)
    }
}

/// Per-symbol subscription outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolOutcome {
    /// Ticker as the client sent it.
    pub ticker: String,
    /// Canonical symbol, once normalized.
    pub symbol: Option<String>,
    /// Provider code, once resolved.
    pub provider_code: Option<String>,
    /// What happened.
    #[serde(flatten)]
    pub status: OutcomeStatus,
}

impl SymbolOutcome {
    /// Outcome for a ticker that reached the transport.
    #[must_use]
    pub fn resolved(
        ticker: impl Into<String>,
        symbol: impl Into<String>,
        provider_code: impl Into<String>,
        status: OutcomeStatus,
    ) -> Self {
        Self {
            ticker: ticker.into(),
            symbol: Some(symbol.into()),
            provider_code: Some(provider_code.into()),
            status,
        }
    }

    /// Outcome for a ticker rejected before resolution.
    #[must_use]
    pub fn rejected(ticker: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            ticker: ticker.into(),
            symbol: None,
            provider_code: None,
            status: OutcomeStatus::Rejected {
                reason: reason.into(),
            },
        }
    }
}

/// Aggregate of per-symbol outcomes for one watch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeReport {
    /// Client the report belongs to.
    pub client_id: ClientId,
    /// One entry per distinct requested ticker, in request order.
    pub outcomes: Vec<SymbolOutcome>,
}

impl SubscribeReport {
    /// Empty report for a client.
    #[must_use]
    pub const fn new(client_id: ClientId) -> Self {
        Self {
            client_id,
            outcomes: Vec::new(),
        }
    }

    /// Record an outcome.
    pub fn push(&mut self, outcome: SymbolOutcome) {
        self.outcomes.push(outcome);
    }

    /// Number of tickers with ticks flowing.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.status.is_success()).count()
    }

    /// Number of tickers that failed or were rejected.
    #[must_use]
    pub fn unsuccessful(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    /// Whether at least one ticker succeeded.
    #[must_use]
    pub fn has_success(&self) -> bool {
        self.outcomes.iter().any(|o| o.status.is_success())
    }
}

// =============================================================================
// Tests
// =============================================================================
