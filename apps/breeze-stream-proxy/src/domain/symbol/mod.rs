//! Symbol Mapping Types
//!
//! Canonical tickers are what clients send and see. Provider codes are what
//! the push feed understands. This module owns the normalization rules and
//! the in-process cache that maps between the two.
//!
//! # Design
//!
//! The cache is an owned object handed to the resolver rather than process
//! global state, so tests and operators can [`SymbolCache::reset`] it.
//! Entries are never evicted on their own.

use std::collections::HashMap;

use parking_lot::RwLock;

// =============================================================================
// Types
// =============================================================================

/// Canonical, uppercased ticker.
pub type CanonicalSymbol = String;

/// Provider short code for an instrument.
pub type ProviderCode = String;

// =============================================================================
// Index Aliases
// =============================================================================

/// Spellings of index names that must collapse onto one internal symbol.
#[derive(Debug, Clone)]
pub struct IndexAliases {
    aliases: HashMap<String, CanonicalSymbol>,
}

impl Default for IndexAliases {
    fn default() -> Self {
        Self::empty()
            .with_alias("NIFTY 50", "NIFTY")
            .with_alias("NIFTY50", "NIFTY")
    }
}

impl IndexAliases {
    /// An alias table with no entries.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            aliases: HashMap::new(),
        }
    }

    /// Add an alias. Both sides are normalized before insertion.
    #[must_use]
    pub fn with_alias(mut self, spelling: &str, symbol: &str) -> Self {
        self.aliases
            .insert(collapse_whitespace(spelling), collapse_whitespace(symbol));
        self
    }

    /// Resolve an already-normalized name through the alias table.
    #[must_use]
    pub fn apply(&self, normalized: &str) -> CanonicalSymbol {
        self.aliases
            .get(normalized)
            .cloned()
            .unwrap_or_else(|| normalized.to_string())
    }

    /// Number of registered aliases.
    #[must_use]
    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}

// =============================================================================
// Normalization
// =============================================================================

/// Uppercase, trim and collapse internal whitespace runs to one space.
#[must_use]
pub fn collapse_whitespace(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

/// Drop a provider-internal token prefix such as `4.1!` from a feed name.
#[must_use]
pub fn strip_feed_token(raw: &str) -> &str {
    raw.rsplit_once('!').map_or(raw, |(_, name)| name)
}

// =============================================================================
// Symbol Cache
// =============================================================================

#[derive(Debug, Default)]
struct CacheState {
    /// Canonical ticker to provider code.
    forward: HashMap<CanonicalSymbol, ProviderCode>,
    /// Provider code back to the first canonical ticker that produced it.
    reverse: HashMap<ProviderCode, CanonicalSymbol>,
}

/// Process-wide cache of resolved symbol mappings.
///
/// Concurrent inserts for the same ticker are idempotent: the forward map is
/// overwritten with the same value and the reverse map keeps its first entry.
#[derive(Debug, Default)]
pub struct SymbolCache {
    state: RwLock<CacheState>,
}

impl SymbolCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached provider code for a canonical ticker.
    #[must_use]
    pub fn provider_code(&self, canonical: &str) -> Option<ProviderCode> {
        self.state.read().forward.get(canonical).cloned()
    }

    /// Cached canonical ticker for a provider code.
    #[must_use]
    pub fn canonical_symbol(&self, provider_code: &str) -> Option<CanonicalSymbol> {
        self.state.read().reverse.get(provider_code).cloned()
    }

    /// Record a successful lookup.
    pub fn insert(&self, canonical: &str, provider_code: &str) {
        let mut state = self.state.write();
        state
            .forward
            .insert(canonical.to_string(), provider_code.to_string());
        state
            .reverse
            .entry(provider_code.to_string())
            .or_insert_with(|| canonical.to_string());
    }

    /// Drop every cached mapping.
    pub fn reset(&self) {
        let mut state = self.state.write();
        state.forward.clear();
        state.reverse.clear();
    }

    /// Number of forward mappings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().forward.len()
    }

    /// Whether the cache holds no mappings.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.read().forward.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case("reliance", "RELIANCE" ; "lowercase")]
    #[test_case("  tcs ", "TCS" ; "padded")]
    #[test_case("nifty   50", "NIFTY 50" ; "internal whitespace")]
    #[test_case("Nifty\t50", "NIFTY 50" ; "tab")]
    fn collapse_whitespace_normalizes(raw: &str, expected: &str) {
        assert_eq!(collapse_whitespace(raw), expected);
    }

    #[test_case("4.1!NIFTY 50", "NIFTY 50" ; "token prefix")]
    #[test_case("NIFTY 50", "NIFTY 50" ; "no token")]
    #[test_case("a!b!RELIND", "RELIND" ; "last separator wins")]
    fn strip_feed_token_drops_prefix(raw: &str, expected: &str) {
        assert_eq!(strip_feed_token(raw), expected);
    }

    #[test]
    fn default_aliases_map_nifty_spellings() {
        let aliases = IndexAliases::default();
        assert_eq!(aliases.apply("NIFTY 50"), "NIFTY");
        assert_eq!(aliases.apply("NIFTY50"), "NIFTY");
        assert_eq!(aliases.apply("NIFTY"), "NIFTY");
        assert_eq!(aliases.apply("RELIANCE"), "RELIANCE");
    }

    #[test]
    fn custom_alias_is_normalized() {
        let aliases = IndexAliases::empty().with_alias("nifty  bank", "banknifty");
        assert_eq!(aliases.apply("NIFTY BANK"), "BANKNIFTY");
        assert_eq!(aliases.len(), 1);
    }

    #[test]
    fn cache_insert_and_lookup() {
        let cache = SymbolCache::new();
        cache.insert("RELIANCE", "RELIND");

        assert_eq!(cache.provider_code("RELIANCE").as_deref(), Some("RELIND"));
        assert_eq!(cache.canonical_symbol("RELIND").as_deref(), Some("RELIANCE"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn cache_reverse_keeps_first_entry() {
        let cache = SymbolCache::new();
        cache.insert("NIFTY", "NIFTY");
        cache.insert("NIFTYIDX", "NIFTY");

        assert_eq!(cache.canonical_symbol("NIFTY").as_deref(), Some("NIFTY"));
        assert_eq!(cache.provider_code("NIFTYIDX").as_deref(), Some("NIFTY"));
    }

    #[test]
    fn cache_reset_clears_both_directions() {
        let cache = SymbolCache::new();
        cache.insert("RELIANCE", "RELIND");
        cache.reset();

        assert!(cache.is_empty());
        assert!(cache.provider_code("RELIANCE").is_none());
        assert!(cache.canonical_symbol("RELIND").is_none());
    }

    #[test]
    fn cache_concurrent_inserts_are_idempotent() {
        use std::sync::Arc;
        use std::thread;

        let cache = Arc::new(SymbolCache::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let c = Arc::clone(&cache);
                thread::spawn(move || c.insert("INFOSYS", "INFTEC"))
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.provider_code("INFOSYS").as_deref(), Some("INFTEC"));
    }
}
