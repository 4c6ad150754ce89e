//! Push Bridge Authentication
//!
//! The bridge expects an `auth` frame carrying the API key and the daily
//! session token right after the socket opens, and answers with a single
//! `success` or `error` frame.

use thiserror::Error;

use super::messages::{BreezeCommand, BreezeMessage};
use crate::domain::session::SessionToken;
use crate::infrastructure::config::Secret;

/// Errors that can occur during authentication.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// No session token has been installed.
    #[error("no session token available")]
    MissingSession,

    /// The bridge refused the credentials.
    #[error("session rejected{}: {message}", .code.as_ref().map(|c| format!(" ({c})")).unwrap_or_default())]
    Rejected {
        /// Error code from the bridge.
        code: Option<String>,
        /// Error text from the bridge.
        message: String,
    },

    /// No answer arrived in time.
    #[error("authentication timed out")]
    Timeout,
}

/// Current state of authentication on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthState {
    /// Auth frame not yet sent.
    #[default]
    Pending,
    /// Auth frame sent, awaiting the answer.
    Sent,
    /// Accepted.
    Authenticated,
}

/// Build the auth frame for a connection.
#[must_use]
pub fn auth_command(api_key: &Secret, token: &SessionToken) -> BreezeCommand {
    BreezeCommand::Auth {
        api_key: api_key.expose().to_string(),
        session_token: token.expose().to_string(),
    }
}

/// Interpret a server frame received while authentication is pending.
///
/// Returns `None` for frames that do not answer the auth request.
#[must_use]
pub fn auth_outcome(message: &BreezeMessage) -> Option<Result<(), AuthError>> {
    match message {
        BreezeMessage::Success(_) => Some(Ok(())),
        BreezeMessage::Error(err) => Some(Err(AuthError::Rejected {
            code: err.code_text(),
            message: err.message.clone(),
        })),
        BreezeMessage::Tick(_) | BreezeMessage::Other(_) => None,
    }
}
