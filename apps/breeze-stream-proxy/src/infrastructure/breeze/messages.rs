//! Breeze Push Bridge Message Types
//!
//! Frames exchanged with the Breeze push bridge.
//!
//! # Client Frames
//!
//! ```json
//! {"action":"auth","api_key":"...","session_token":"..."}
//! {"action":"subscribe","stock_code":"RELIND","exchange_code":"NSE"}
//! {"action":"unsubscribe","stock_code":"RELIND","exchange_code":"NSE"}
//! ```
//!
//! # Server Frames
//!
//! ```json
//! {"type":"success","message":"authenticated"}
//! {"type":"error","code":401,"message":"invalid session"}
//! [{"stock_code":"RELIND","last":"2890.5","close":"2870.0"}]
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::streaming::Tick;

// =============================================================================
// Client Frames
// =============================================================================

/// Command sent to the push bridge.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum BreezeCommand {
    /// Authenticate the connection.
    Auth {
        /// Application API key.
        api_key: String,
        /// Daily session token.
        session_token: String,
    },
    /// Start streaming a stock.
    Subscribe {
        /// Provider stock code.
        stock_code: String,
        /// Exchange code.
        exchange_code: String,
    },
    /// Stop streaming a stock.
    Unsubscribe {
        /// Provider stock code.
        stock_code: String,
        /// Exchange code.
        exchange_code: String,
    },
}

impl BreezeCommand {
    /// Build a subscribe command.
    #[must_use]
    pub fn subscribe(stock_code: &str, exchange_code: &str) -> Self {
        Self::Subscribe {
            stock_code: stock_code.to_string(),
            exchange_code: exchange_code.to_string(),
        }
    }

    /// Build an unsubscribe command.
    #[must_use]
    pub fn unsubscribe(stock_code: &str, exchange_code: &str) -> Self {
        Self::Unsubscribe {
            stock_code: stock_code.to_string(),
            exchange_code: exchange_code.to_string(),
        }
    }

    /// Stock code the command targets, if any.
    #[must_use]
    pub fn stock_code(&self) -> Option<&str> {
        match self {
            Self::Auth { .. } => None,
            Self::Subscribe { stock_code, .. } | Self::Unsubscribe { stock_code, .. } => {
                Some(stock_code)
            }
        }
    }
}

impl fmt::Debug for BreezeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auth { .. } => f
                .debug_struct("Auth")
                .field("api_key", &"[REDACTED]")
                .field("session_token", &"[REDACTED]")
                .finish(),
            Self::Subscribe {
                stock_code,
                exchange_code,
            } => f
                .debug_struct("Subscribe")
                .field("stock_code", stock_code)
                .field("exchange_code", exchange_code)
                .finish(),
            Self::Unsubscribe {
                stock_code,
                exchange_code,
            } => f
                .debug_struct("Unsubscribe")
                .field("stock_code", stock_code)
                .field("exchange_code", exchange_code)
                .finish(),
        }
    }
}

// =============================================================================
// Server Frames
// =============================================================================

/// Success acknowledgement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SuccessMessage {
    /// Optional detail text.
    #[serde(default)]
    pub message: Option<String>,
}

/// Error report.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ErrorMessage {
    /// Error code; the bridge sends either a number or a string.
    #[serde(default)]
    pub code: Option<Value>,
    /// Error text.
    #[serde(default)]
    pub message: String,
}

impl ErrorMessage {
    /// Error code rendered as text.
    #[must_use]
    pub fn code_text(&self) -> Option<String> {
        match &self.code {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        }
    }
}

/// A decoded server frame.
#[derive(Debug, Clone, PartialEq)]
pub enum BreezeMessage {
    /// Authentication accepted.
    Success(SuccessMessage),
    /// Error report.
    Error(ErrorMessage),
    /// Market data tick.
    Tick(Tick),
    /// Frame with an unrecognised `type`.
    Other(String),
}
