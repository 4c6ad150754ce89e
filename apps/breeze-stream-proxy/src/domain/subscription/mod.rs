//! Subscription Management Types
//!
//! Domain types for tracking which watchlist clients want which provider
//! codes on the shared feed transport.
//!
//! # Design
//!
//! The registry tracks:
//! - Which `(providerCode, canonicalSymbol)` pairs each client holds
//! - Which clients hold each provider code (the fan-out set)
//!
//! This allows multiple clients to watch the same instrument while the
//! transport carries only one upstream subscription. A provider code needs
//! an upstream subscribe when its first holder arrives and an upstream
//! unsubscribe when its last holder leaves.

use std::collections::{BTreeMap, HashMap, HashSet};

use parking_lot::RwLock;
use serde::Serialize;

use crate::domain::symbol::{CanonicalSymbol, ProviderCode};

// =============================================================================
// Types
// =============================================================================

/// Unique identifier for a watchlist client connection.
pub type ClientId = u64;

/// Allocate a fresh random client identifier.
#[must_use]
pub fn new_client_id() -> ClientId {
    uuid::Uuid::new_v4().as_u64_pair().0
}

// =============================================================================
// Subscription Set
// =============================================================================

/// The `(providerCode, canonicalSymbol)` pairs held by one client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionSet {
    entries: BTreeMap<ProviderCode, CanonicalSymbol>,
}

impl SubscriptionSet {
    /// Add a pair. Returns `false` if the provider code was already held.
    pub fn insert(&mut self, provider_code: ProviderCode, symbol: CanonicalSymbol) -> bool {
        if self.entries.contains_key(&provider_code) {
            return false;
        }
        self.entries.insert(provider_code, symbol);
        true
    }

    /// Remove a provider code, returning its canonical symbol.
    pub fn remove(&mut self, provider_code: &str) -> Option<CanonicalSymbol> {
        self.entries.remove(provider_code)
    }

    /// Whether the set holds a provider code.
    #[must_use]
    pub fn contains(&self, provider_code: &str) -> bool {
        self.entries.contains_key(provider_code)
    }

    /// Canonical symbol held for a provider code.
    #[must_use]
    pub fn symbol_for(&self, provider_code: &str) -> Option<&str> {
        self.entries.get(provider_code).map(String::as_str)
    }

    /// Provider codes in sorted order.
    #[must_use]
    pub fn provider_codes(&self) -> Vec<ProviderCode> {
        self.entries.keys().cloned().collect()
    }

    /// Number of pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// Subscription Changes
// =============================================================================

/// Upstream work left behind by a departing client.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionChanges {
    /// Provider codes that lost their last holder.
    pub unsubscribe: HashSet<ProviderCode>,
}

// =============================================================================
// Registry State
// =============================================================================

#[derive(Debug, Default)]
struct RegistryState {
    /// Attached clients and the pairs they hold.
    client_sets: HashMap<ClientId, SubscriptionSet>,
    /// Fan-out set per provider code.
    code_clients: HashMap<ProviderCode, HashSet<ClientId>>,
}

impl RegistryState {
    /// Returns `true` when this is the first holder of the code (0→1).
    fn add(&mut self, client: ClientId, code: &str, symbol: &str) -> bool {
        let set = self.client_sets.entry(client).or_default();
        if !set.insert(code.to_string(), symbol.to_string()) {
            return false;
        }

        let holders = self.code_clients.entry(code.to_string()).or_default();
        holders.insert(client);
        holders.len() == 1
    }

    /// Returns `true` when the last holder of the code left (1→0).
    fn remove(&mut self, client: ClientId, code: &str) -> bool {
        let Some(set) = self.client_sets.get_mut(&client) else {
            return false;
        };

        if set.remove(code).is_none() {
            return false;
        }

        self.release(client, code)
    }

    /// Detach a client entirely.
    ///
    /// Returns provider codes that lost their last holder.
    fn remove_client(&mut self, client: ClientId) -> Vec<ProviderCode> {
        let Some(set) = self.client_sets.remove(&client) else {
            return vec![];
        };

        set.provider_codes()
            .into_iter()
            .filter(|code| self.release(client, code))
            .collect()
    }

    fn release(&mut self, client: ClientId, code: &str) -> bool {
        let Some(holders) = self.code_clients.get_mut(code) else {
            return false;
        };

        holders.remove(&client);
        if holders.is_empty() {
            self.code_clients.remove(code);
            return true;
        }
        false
    }
}

// =============================================================================
// Subscription Registry
// =============================================================================

/// Thread-safe registry mapping provider codes to interested clients.
///
/// Reads (fan-out lookups) take a shared lock; writes happen only when a
/// client subscribes or drains.
///
/// # Example
///
/// ```rust
/// use breeze_stream_proxy::domain::subscription::SubscriptionRegistry;
///
/// let registry = SubscriptionRegistry::new();
///
/// // Client 1 watches RELIANCE (provider code RELIND)
/// assert!(registry.add(1, "RELIND", "RELIANCE"));
///
/// // Client 2 also watches it - no upstream change needed
/// assert!(!registry.add(2, "RELIND", "RELIANCE"));
/// assert_eq!(registry.holders_of("RELIND").len(), 2);
///
/// // Client 1 leaves - still held by Client 2
/// assert!(registry.client_disconnected(1).unsubscribe.is_empty());
///
/// // Client 2 leaves - now unsubscribe upstream
/// assert!(registry.client_disconnected(2).unsubscribe.contains("RELIND"));
/// ```
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    state: RwLock<RegistryState>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a client with an empty subscription set.
    ///
    /// An attached client counts towards [`Self::has_clients`] even before it
    /// holds any provider code.
    pub fn attach(&self, client: ClientId) {
        self.state.write().client_sets.entry(client).or_default();
    }

    /// Add one pair for a client.
    ///
    /// Returns `true` if the provider code needs an upstream subscribe.
    pub fn add(&self, client: ClientId, provider_code: &str, symbol: &str) -> bool {
        self.state.write().add(client, provider_code, symbol)
    }

    /// Remove one provider code for a client.
    ///
    /// Returns `true` if the provider code needs an upstream unsubscribe.
    pub fn remove(&self, client: ClientId, provider_code: &str) -> bool {
        self.state.write().remove(client, provider_code)
    }

    /// Handle client disconnection.
    ///
    /// Detaches the client and returns the provider codes that no longer
    /// have any holder.
    pub fn client_disconnected(&self, client: ClientId) -> SubscriptionChanges {
        SubscriptionChanges {
            unsubscribe: self.state.write().remove_client(client).into_iter().collect(),
        }
    }

    /// Holders of a provider code with the canonical symbol each one asked for.
    #[must_use]
    pub fn holders_of(&self, provider_code: &str) -> Vec<(ClientId, CanonicalSymbol)> {
        let state = self.state.read();
        let Some(holders) = state.code_clients.get(provider_code) else {
            return vec![];
        };

        holders
            .iter()
            .filter_map(|client| {
                state
                    .client_sets
                    .get(client)
                    .and_then(|set| set.symbol_for(provider_code))
                    .map(|symbol| (*client, symbol.to_string()))
            })
            .collect()
    }

    /// Whether a client currently holds a provider code.
    #[must_use]
    pub fn is_subscribed(&self, client: ClientId, provider_code: &str) -> bool {
        self.state
            .read()
            .client_sets
            .get(&client)
            .is_some_and(|set| set.contains(provider_code))
    }

    /// Whether any client is attached.
    #[must_use]
    pub fn has_clients(&self) -> bool {
        !self.state.read().client_sets.is_empty()
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        let state = self.state.read();
        SubscriptionStats {
            code_count: state.code_clients.len(),
            client_count: state.client_sets.len(),
            entry_count: state.client_sets.values().map(SubscriptionSet::len).sum(),
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Registry statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SubscriptionStats {
    /// Number of distinct upstream provider codes.
    pub code_count: usize,
    /// Number of attached clients.
    pub client_count: usize,
    /// Sum of all clients' subscription set sizes.
    pub entry_count: usize,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn holder_ids(registry: &SubscriptionRegistry, code: &str) -> Vec<ClientId> {
        let mut ids: Vec<_> = registry
            .holders_of(code)
            .into_iter()
            .map(|(client, _)| client)
            .collect();
        ids.sort_unstable();
        ids
    }

    #[test]
    fn first_holder_needs_upstream() {
        let registry = SubscriptionRegistry::new();

        assert!(registry.add(1, "RELIND", "RELIANCE"));
        assert!(!registry.add(2, "RELIND", "RELIANCE"));
        assert_eq!(holder_ids(&registry, "RELIND"), vec![1, 2]);
    }

    #[test]
    fn add_duplicate_for_same_client() {
        let registry = SubscriptionRegistry::new();

        assert!(registry.add(1, "TCS", "TCS"));
        assert!(!registry.add(1, "TCS", "TCS"));
        assert_eq!(holder_ids(&registry, "TCS"), vec![1]);
        assert_eq!(registry.stats().entry_count, 1);
    }

    #[test]
    fn remove_with_remaining_clients() {
        let registry = SubscriptionRegistry::new();

        registry.add(1, "INFTEC", "INFY");
        registry.add(2, "INFTEC", "INFY");

        assert!(!registry.remove(1, "INFTEC"));
        assert_eq!(holder_ids(&registry, "INFTEC"), vec![2]);
    }

    #[test]
    fn remove_last_holder_needs_upstream() {
        let registry = SubscriptionRegistry::new();

        registry.add(1, "INFTEC", "INFY");

        assert!(registry.remove(1, "INFTEC"));
        assert!(registry.holders_of("INFTEC").is_empty());
    }

    #[test]
    fn remove_keeps_client_attached() {
        let registry = SubscriptionRegistry::new();

        registry.add(1, "INFTEC", "INFY");
        registry.remove(1, "INFTEC");

        assert!(registry.has_clients());
        assert!(!registry.is_subscribed(1, "INFTEC"));
        assert_eq!(registry.stats().entry_count, 0);
    }

    #[test]
    fn remove_unknown_pairs_is_noop() {
        let registry = SubscriptionRegistry::new();
        registry.add(1, "TCS", "TCS");

        assert!(!registry.remove(1, "WIPRO"));
        assert!(!registry.remove(2, "TCS"));
        assert_eq!(holder_ids(&registry, "TCS"), vec![1]);
    }

    #[test]
    fn client_disconnected_cleans_up() {
        let registry = SubscriptionRegistry::new();

        for code in ["A", "B", "C"] {
            registry.add(1, code, code);
        }

        let changes = registry.client_disconnected(1);

        assert_eq!(changes.unsubscribe.len(), 3);
        assert!(changes.unsubscribe.contains("A"));
        assert!(changes.unsubscribe.contains("B"));
        assert!(changes.unsubscribe.contains("C"));
        assert!(!registry.has_clients());
        assert_eq!(registry.stats(), SubscriptionStats::default());
    }

    #[test]
    fn client_disconnected_preserves_other_clients() {
        let registry = SubscriptionRegistry::new();

        registry.add(1, "X", "X");
        registry.add(1, "Y", "Y");
        registry.add(2, "X", "X");

        let changes = registry.client_disconnected(1);

        assert!(changes.unsubscribe.contains("Y"));
        assert!(!changes.unsubscribe.contains("X"));
        assert_eq!(holder_ids(&registry, "X"), vec![2]);
    }

    #[test]
    fn attach_counts_without_subscriptions() {
        let registry = SubscriptionRegistry::new();

        registry.attach(7);
        assert!(registry.has_clients());
        assert_eq!(registry.stats().client_count, 1);

        let changes = registry.client_disconnected(7);
        assert!(changes.unsubscribe.is_empty());
        assert!(!registry.has_clients());
    }

    #[test]
    fn client_disconnected_unknown_client_no_changes() {
        let registry = SubscriptionRegistry::new();

        registry.add(1, "TCS", "TCS");

        assert!(registry.client_disconnected(2).unsubscribe.is_empty());
        assert_eq!(registry.stats().code_count, 1);
    }

    #[test]
    fn is_subscribed_is_per_client() {
        let registry = SubscriptionRegistry::new();

        registry.add(1, "RELIND", "RELIANCE");
        registry.add(1, "NIFTY", "NIFTY");

        assert!(registry.is_subscribed(1, "NIFTY"));
        assert!(registry.is_subscribed(1, "RELIND"));
        assert!(!registry.is_subscribed(2, "NIFTY"));
    }

    #[test]
    fn holders_of_reports_requested_symbols() {
        let registry = SubscriptionRegistry::new();

        registry.add(1, "NIFTY", "NIFTY");
        registry.add(2, "NIFTY", "NIFTYIDX");

        let mut holders = registry.holders_of("NIFTY");
        holders.sort();

        assert_eq!(
            holders,
            vec![(1, "NIFTY".to_string()), (2, "NIFTYIDX".to_string())]
        );
        assert!(registry.holders_of("TCS").is_empty());
    }

    #[test]
    fn stats_are_accurate() {
        let registry = SubscriptionRegistry::new();

        registry.add(1, "A", "A");
        registry.add(1, "B", "B");
        registry.add(2, "A", "A");

        let stats = registry.stats();

        assert_eq!(stats.code_count, 2);
        assert_eq!(stats.client_count, 2);
        assert_eq!(stats.entry_count, 3);
    }

    #[test]
    fn subscription_set_keeps_first_symbol() {
        let mut set = SubscriptionSet::default();

        assert!(set.insert("NIFTY".to_string(), "NIFTY".to_string()));
        assert!(!set.insert("NIFTY".to_string(), "NIFTY 50".to_string()));
        assert_eq!(set.symbol_for("NIFTY"), Some("NIFTY"));
        assert_eq!(set.remove("NIFTY"), Some("NIFTY".to_string()));
        assert!(set.is_empty());
    }

    #[test]
    fn new_client_ids_differ() {
        assert_ne!(new_client_id(), new_client_id());
    }

    #[test]
    fn thread_safety_concurrent_subscriptions() {
        use std::sync::Arc;
        use std::thread;

        let registry = Arc::new(SubscriptionRegistry::new());
        let mut handles = vec![];

        for i in 0..10u64 {
            let r = Arc::clone(&registry);
            handles.push(thread::spawn(move || {
                r.add(i, &format!("SYM{i}"), "S");
                r.add(i, "SHARED", "SHARED")
            }));
        }

        let first_holders = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|first| *first)
            .count();

        let stats = registry.stats();
        assert_eq!(stats.client_count, 10);
        // SYM0-SYM9 plus SHARED
        assert_eq!(stats.code_count, 11);
        assert_eq!(first_holders, 1);
        assert_eq!(registry.holders_of("SHARED").len(), 10);
    }

    #[test]
    fn thread_safety_concurrent_disconnects() {
        use std::sync::Arc;
        use std::thread;

        let registry = Arc::new(SubscriptionRegistry::new());

        for i in 0..10u64 {
            registry.add(i, "SHARED", "SHARED");
        }

        let handles: Vec<_> = (0..10u64)
            .map(|i| {
                let r = Arc::clone(&registry);
                thread::spawn(move || r.client_disconnected(i))
            })
            .collect();

        let released: usize = handles
            .into_iter()
            .map(|h| h.join().unwrap().unsubscribe.len())
            .sum();

        // Exactly one disconnect observed the last holder leaving
        assert_eq!(released, 1);
        assert_eq!(registry.stats(), SubscriptionStats::default());
    }
}
