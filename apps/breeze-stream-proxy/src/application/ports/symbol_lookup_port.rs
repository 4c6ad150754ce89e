//! Symbol Lookup Port (Driven Port)
//!
//! Interface for the remote symbol-mapping table.

use async_trait::async_trait;

/// Symbol lookup error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LookupError {
    /// The lookup service could not be reached.
    #[error("symbol lookup transport error: {message}")]
    Transport {
        /// Error details.
        message: String,
    },

    /// The lookup service answered with a non-success status.
    #[error("symbol lookup returned status {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },

    /// The response body could not be decoded.
    #[error("symbol lookup response invalid: {message}")]
    InvalidResponse {
        /// Error details.
        message: String,
    },
}

/// Port for mapping canonical tickers to provider codes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SymbolLookupPort: Send + Sync {
    /// Look up the provider code for a canonical ticker.
    ///
    /// Returns `Ok(None)` when the table has no usable entry.
    async fn lookup(&self, canonical_ticker: &str) -> Result<Option<String>, LookupError>;
}

/// Lookup used when no mapping table is configured.
///
/// Always answers absent so every ticker maps to itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentitySymbolLookup;

#[async_trait]
impl SymbolLookupPort for IdentitySymbolLookup {
    async fn lookup(&self, _canonical_ticker: &str) -> Result<Option<String>, LookupError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_lookup_is_always_absent() {
        let lookup = IdentitySymbolLookup;
        for ticker in ["RELIANCE", "NIFTY", ""] {
            assert!(
                tokio_test::block_on(lookup.lookup(ticker))
                    .unwrap()
                    .is_none()
            );
        }
    }

    #[test]
    fn lookup_error_display() {
        let err = LookupError::Status { status: 503 };
        assert_eq!(err.to_string(), "symbol lookup returned status 503");
    }
}
