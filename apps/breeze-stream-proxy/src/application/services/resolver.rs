//! Symbol Resolver Service
//!
//! Maps client tickers to provider codes through the injectable cache,
//! falling back to the normalized ticker whenever the lookup cannot answer.

use std::sync::Arc;

use crate::application::ports::SymbolLookupPort;
use crate::domain::symbol::{
    CanonicalSymbol, IndexAliases, ProviderCode, SymbolCache, collapse_whitespace,
    strip_feed_token,
};
use crate::infrastructure::metrics::{self, LookupResult};

/// Errors from ticker resolution.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    /// The ticker was empty or whitespace.
    #[error("ticker must not be empty")]
    EmptyTicker,
}

/// A resolved ticker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Canonical symbol clients see.
    pub symbol: CanonicalSymbol,
    /// Code the feed understands.
    pub provider_code: ProviderCode,
}

/// Resolves tickers to provider codes.
pub struct SymbolResolver {
    lookup: Arc<dyn SymbolLookupPort>,
    cache: Arc<SymbolCache>,
    aliases: IndexAliases,
}

impl std::fmt::Debug for SymbolResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymbolResolver")
            .field("cached", &self.cache.len())
            .field("aliases", &self.aliases.len())
            .finish_non_exhaustive()
    }
}

impl SymbolResolver {
    /// Create a resolver with the default index aliases.
    #[must_use]
    pub fn new(lookup: Arc<dyn SymbolLookupPort>, cache: Arc<SymbolCache>) -> Self {
        Self {
            lookup,
            cache,
            aliases: IndexAliases::default(),
        }
    }

    /// Replace the index alias table.
    #[must_use]
    pub fn with_aliases(mut self, aliases: IndexAliases) -> Self {
        self.aliases = aliases;
        self
    }

    /// Normalize a raw ticker to its canonical form.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::EmptyTicker`] for blank input.
    pub fn canonical_ticker(&self, raw: &str) -> Result<CanonicalSymbol, ResolveError> {
        let normalized = collapse_whitespace(raw);
        if normalized.is_empty() {
            return Err(ResolveError::EmptyTicker);
        }
        Ok(self.aliases.apply(&normalized))
    }

    /// Resolve a ticker to its provider code.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::EmptyTicker`] for blank input. Lookup failures
    /// never surface; the canonical ticker is returned instead.
    pub async fn resolve(&self, ticker: &str) -> Result<ProviderCode, ResolveError> {
        Ok(self.resolve_full(ticker).await?.provider_code)
    }

    /// Resolve a ticker to both its canonical symbol and provider code.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::EmptyTicker`] for blank input.
    pub async fn resolve_full(&self, ticker: &str) -> Result<Resolution, ResolveError> {
        let symbol = self.canonical_ticker(ticker)?;

        if let Some(provider_code) = self.cache.provider_code(&symbol) {
            metrics::record_symbol_lookup(LookupResult::CacheHit);
            return Ok(Resolution {
                symbol,
                provider_code,
            });
        }

        let provider_code = match self.lookup.lookup(&symbol).await {
            Ok(Some(code)) if !code.trim().is_empty() => {
                metrics::record_symbol_lookup(LookupResult::Found);
                let code = collapse_whitespace(&code);
                self.cache.insert(&symbol, &code);
                tracing::debug!(symbol = %symbol, provider_code = %code, "Resolved symbol");
                code
            }
            Ok(_) => {
                metrics::record_symbol_lookup(LookupResult::Missing);
                tracing::debug!(symbol = %symbol, "No provider code, using ticker");
                symbol.clone()
            }
            Err(e) => {
                metrics::record_symbol_lookup(LookupResult::Error);
                tracing::warn!(symbol = %symbol, error = %e, "Symbol lookup failed, using ticker");
                symbol.clone()
            }
        };

        Ok(Resolution {
            symbol,
            provider_code,
        })
    }

    /// Canonical symbol for a provider code, or the code itself.
    #[must_use]
    pub fn canonical_for(&self, provider_code: &str) -> CanonicalSymbol {
        self.cache
            .canonical_symbol(provider_code)
            .unwrap_or_else(|| provider_code.to_string())
    }

    /// Normalize a feed-side instrument name to the registry key space.
    ///
    /// Drops provider-internal token prefixes, then applies the same
    /// normalization and aliases as client tickers.
    #[must_use]
    pub fn feed_code(&self, raw_feed_name: &str) -> ProviderCode {
        self.aliases
            .apply(&collapse_whitespace(strip_feed_token(raw_feed_name)))
    }

    /// Drop every cached mapping.
    pub fn reset(&self) {
        self.cache.reset();
    }

    /// The underlying cache.
    #[must_use]
    pub fn cache(&self) -> &SymbolCache {
        &self.cache
    }
}

// =============================================================================
// Tests
// =============================================================================
