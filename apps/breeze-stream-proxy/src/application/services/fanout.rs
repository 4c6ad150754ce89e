//! Quote Fan-Out
//!
//! Routes each feed tick to every client holding its provider code. Delivery
//! never blocks: each client has a bounded channel and a full channel drops
//! the quote. A client removed concurrently with a dispatch is skipped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::feed_state::{ConnectionState, FeedState};
use super::resolver::SymbolResolver;
use super::watchlist::WatchError;
use crate::application::ports::FeedEvent;
use crate::domain::lifecycle::{LifecycleState, SubscribeReport};
use crate::domain::streaming::{NormalizedQuote, Tick, normalize};
use crate::domain::subscription::{
    ClientId, SubscriptionChanges, SubscriptionRegistry, new_client_id,
};
use crate::infrastructure::metrics;

// =============================================================================
// Client Channel
// =============================================================================

/// Messages delivered to one watchlist client.
#[derive(Debug, Clone)]
pub enum ClientMessage {
    /// A normalized quote.
    Quote(NormalizedQuote),
    /// Per-symbol outcomes once the watch is active.
    Subscribed(SubscribeReport),
    /// A watch-level error.
    Error(WatchError),
    /// The watch reached its terminal state.
    Closed(LifecycleState),
}

/// Result of a non-blocking delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued.
    Sent,
    /// Channel full, message dropped.
    Dropped,
    /// Client gone.
    Closed,
}

/// Sending half of a client's channel plus its identity.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    id: ClientId,
    sender: mpsc::Sender<ClientMessage>,
}

impl ClientHandle {
    /// Create a handle with a fresh client id.
    #[must_use]
    pub fn new(sender: mpsc::Sender<ClientMessage>) -> Self {
        Self::with_id(new_client_id(), sender)
    }

    /// Create a handle with a given client id.
    #[must_use]
    pub const fn with_id(id: ClientId, sender: mpsc::Sender<ClientMessage>) -> Self {
        Self { id, sender }
    }

    /// Client identifier.
    #[must_use]
    pub const fn id(&self) -> ClientId {
        self.id
    }

    /// Whether the client is still reading its channel.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }

    /// Deliver without waiting.
    pub fn try_deliver(&self, message: ClientMessage) -> Delivery {
        match self.sender.try_send(message) {
            Ok(()) => Delivery::Sent,
            Err(TrySendError::Full(_)) => Delivery::Dropped,
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    /// Deliver, waiting for channel capacity. Returns `false` if the client
    /// is gone.
    pub async fn send(&self, message: ClientMessage) -> bool {
        self.sender.send(message).await.is_ok()
    }
}

// =============================================================================
// Fan-Out
// =============================================================================

/// Counts from one dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Quotes queued.
    pub delivered: u64,
    /// Quotes dropped on full channels.
    pub dropped: u64,
}

/// Fan-out of feed ticks to watchlist clients.
pub struct QuoteFanOut {
    registry: Arc<SubscriptionRegistry>,
    resolver: Arc<SymbolResolver>,
    clients: RwLock<HashMap<ClientId, ClientHandle>>,
}

impl std::fmt::Debug for QuoteFanOut {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuoteFanOut")
            .field("clients", &self.clients.read().len())
            .field("registry", &self.registry.stats())
            .finish_non_exhaustive()
    }
}

impl QuoteFanOut {
    /// Create a fan-out over a registry.
    #[must_use]
    pub fn new(registry: Arc<SubscriptionRegistry>, resolver: Arc<SymbolResolver>) -> Self {
        Self {
            registry,
            resolver,
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// The subscription registry.
    #[must_use]
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// The resolver used to route feed names.
    #[must_use]
    pub fn resolver(&self) -> &SymbolResolver {
        &self.resolver
    }

    /// Attach a client so it counts as present and can receive quotes.
    pub fn attach(&self, client: &ClientHandle) {
        self.clients.write().insert(client.id(), client.clone());
        self.registry.attach(client.id());
        metrics::set_clients(self.client_count());
    }

    /// Detach a client. Further deliveries to it are no-ops.
    ///
    /// Returns provider codes that lost their last holder.
    pub fn detach(&self, client: ClientId) -> SubscriptionChanges {
        self.clients.write().remove(&client);
        let changes = self.registry.client_disconnected(client);
        metrics::set_clients(self.client_count());
        changes
    }

    /// Number of attached clients.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.read().len()
    }

    /// Route one tick to every interested client.
    pub fn dispatch(&self, tick: &Tick) -> DispatchOutcome {
        let mut names = tick.routing_names().peekable();
        if names.peek().is_none() {
            metrics::record_tick_discarded("unrouted");
            tracing::trace!("Tick without instrument name dropped");
            return DispatchOutcome::default();
        }

        let routed = names.find_map(|name| {
            let provider_code = self.resolver.feed_code(name);
            let holders = self.registry.holders_of(&provider_code);
            (!holders.is_empty()).then_some((provider_code, holders))
        });
        let Some((provider_code, holders)) = routed else {
            metrics::record_tick_discarded("no_subscribers");
            return DispatchOutcome::default();
        };

        let mut outcome = DispatchOutcome::default();
        let mut quotes: Vec<NormalizedQuote> = Vec::with_capacity(1);
        let clients = self.clients.read();

        for (client_id, symbol) in holders {
            let Some(client) = clients.get(&client_id) else {
                continue;
            };

            let quote = match quotes.iter().find(|q| q.symbol == symbol) {
                Some(quote) => quote.clone(),
                None => {
                    let quote = normalize(tick, &symbol);
                    quotes.push(quote.clone());
                    quote
                }
            };

            match client.try_deliver(ClientMessage::Quote(quote)) {
                Delivery::Sent => outcome.delivered += 1,
                Delivery::Dropped => {
                    outcome.dropped += 1;
                    tracing::debug!(client_id, provider_code = %provider_code, "Client lagging, quote dropped");
                }
                Delivery::Closed => {}
            }
        }
        drop(clients);

        if outcome.delivered > 0 {
            metrics::record_quotes_delivered(outcome.delivered);
        }
        if outcome.dropped > 0 {
            metrics::record_quotes_dropped(outcome.dropped);
        }
        outcome
    }
}

// =============================================================================
// Event Pump
// =============================================================================

/// Drain feed events, tracking feed state and fanning ticks out.
pub async fn pump_feed_events(
    mut rx: mpsc::Receiver<FeedEvent>,
    fanout: Arc<QuoteFanOut>,
    feed_state: Arc<FeedState>,
) {
    while let Some(event) = rx.recv().await {
        match event {
            FeedEvent::Connected => {
                feed_state.set_state(ConnectionState::Connected);
                tracing::info!("Breeze feed connected");
            }
            FeedEvent::Disconnected => {
                feed_state.set_state(ConnectionState::Disconnected);
                tracing::warn!("Breeze feed disconnected");
            }
            FeedEvent::Reconnecting { attempt } => {
                feed_state.set_state(ConnectionState::Reconnecting);
                feed_state.increment_reconnect_attempts();
                metrics::record_reconnect();
                tracing::info!(attempt, "Breeze feed reconnecting");
            }
            FeedEvent::Tick(tick) => {
                feed_state.increment_ticks();
                metrics::record_tick_received();
                let start = Instant::now();
                fanout.dispatch(&tick);
                metrics::record_dispatch_duration(start.elapsed());
            }
            FeedEvent::Error(msg) => {
                tracing::error!(error = %msg, "Breeze feed error");
                feed_state.set_error(msg);
            }
        }
    }
    tracing::debug!("Feed event channel closed");
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::application::ports::IdentitySymbolLookup;
    use crate::domain::symbol::SymbolCache;

    fn fanout() -> QuoteFanOut {
        let resolver = SymbolResolver::new(
            Arc::new(IdentitySymbolLookup),
            Arc::new(SymbolCache::new()),
        );
        QuoteFanOut::new(Arc::new(SubscriptionRegistry::new()), Arc::new(resolver))
    }

    fn client(id: ClientId, capacity: usize) -> (ClientHandle, mpsc::Receiver<ClientMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        (ClientHandle::with_id(id, tx), rx)
    }

    fn tick(value: serde_json::Value) -> Tick {
        Tick::from_value(value).unwrap()
    }

    fn expect_quote(rx: &mut mpsc::Receiver<ClientMessage>) -> NormalizedQuote {
        match rx.try_recv().unwrap() {
            ClientMessage::Quote(quote) => quote,
            other => panic!("expected quote, got {other:?}"),
        }
    }

    #[test]
    fn one_tick_reaches_every_holder() {
        let fanout = fanout();
        let (a, mut rx_a) = client(1, 8);
        let (b, mut rx_b) = client(2, 8);
        fanout.attach(&a);
        fanout.attach(&b);
        fanout.registry().add(1, "X", "X");
        fanout.registry().add(2, "X", "X");

        let outcome = fanout.dispatch(&tick(json!({"stock_code": "X", "last": "10"})));

        assert_eq!(outcome.delivered, 2);
        assert_eq!(expect_quote(&mut rx_a).last_price, 10.0);
        assert_eq!(expect_quote(&mut rx_b).symbol, "X");
    }

    #[test]
    fn detached_client_does_not_affect_others() {
        let fanout = fanout();
        let (a, mut rx_a) = client(1, 8);
        let (b, mut rx_b) = client(2, 8);
        fanout.attach(&a);
        fanout.attach(&b);
        fanout.registry().add(1, "X", "X");
        fanout.registry().add(2, "X", "X");

        let changes = fanout.detach(1);
        assert!(changes.unsubscribe.is_empty());

        let outcome = fanout.dispatch(&tick(json!({"stock_code": "X", "last": 11})));

        assert_eq!(outcome.delivered, 1);
        assert!(rx_a.try_recv().is_err());
        assert_eq!(expect_quote(&mut rx_b).last_price, 11.0);
    }

    #[test]
    fn quote_carries_holder_symbol_not_feed_name() {
        let fanout = fanout();
        let (a, mut rx) = client(1, 8);
        fanout.attach(&a);
        fanout.registry().add(1, "NIFTY", "NIFTY");

        fanout.dispatch(&tick(json!({"stock_name": "4.1!NIFTY 50", "last": 22000})));

        assert_eq!(expect_quote(&mut rx).symbol, "NIFTY");
    }

    #[test]
    fn token_symbol_falls_through_to_stock_name() {
        let fanout = fanout();
        let (a, mut rx) = client(1, 8);
        fanout.attach(&a);
        fanout.registry().add(1, "NIFTY", "NIFTY");

        let outcome = fanout.dispatch(&tick(json!({
            "symbol": "4.1!2885",
            "stock_name": "NIFTY 50",
            "last": 1,
        })));

        assert_eq!(outcome.delivered, 1);
        assert_eq!(expect_quote(&mut rx).symbol, "NIFTY");
    }

    #[test]
    fn full_channel_drops_quote() {
        let fanout = fanout();
        let (a, mut rx) = client(1, 1);
        fanout.attach(&a);
        fanout.registry().add(1, "X", "X");

        let t = tick(json!({"stock_code": "X", "last": 1}));
        assert_eq!(fanout.dispatch(&t).delivered, 1);
        let second = fanout.dispatch(&t);

        assert_eq!(second.dropped, 1);
        assert_eq!(second.delivered, 0);
        expect_quote(&mut rx);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn closed_channel_is_noop() {
        let fanout = fanout();
        let (a, rx) = client(1, 4);
        fanout.attach(&a);
        fanout.registry().add(1, "X", "X");
        drop(rx);

        assert!(!a.is_connected());
        let outcome = fanout.dispatch(&tick(json!({"stock_code": "X"})));
        assert_eq!(outcome, DispatchOutcome::default());
    }

    #[test]
    fn unrouted_and_unknown_ticks_are_discarded() {
        let fanout = fanout();
        let (a, mut rx) = client(1, 4);
        fanout.attach(&a);
        fanout.registry().add(1, "X", "X");

        fanout.dispatch(&tick(json!({"last": 5})));
        fanout.dispatch(&tick(json!({"stock_code": "Y", "last": 5})));

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn pump_tracks_state_and_dispatches() {
        let fanout = Arc::new(fanout());
        let feed_state = Arc::new(FeedState::new());
        let (a, mut rx) = client(1, 4);
        fanout.attach(&a);
        fanout.registry().add(1, "X", "X");

        let (tx, events) = mpsc::channel(8);
        tx.send(FeedEvent::Connected).await.unwrap();
        tx.send(FeedEvent::Tick(tick(json!({"stock_code": "X", "last": 3}))))
            .await
            .unwrap();
        tx.send(FeedEvent::Reconnecting { attempt: 1 }).await.unwrap();
        drop(tx);

        pump_feed_events(events, Arc::clone(&fanout), Arc::clone(&feed_state)).await;

        assert_eq!(feed_state.get_state(), ConnectionState::Reconnecting);
        assert_eq!(feed_state.get_ticks_received(), 1);
        assert_eq!(expect_quote(&mut rx).last_price, 3.0);
    }
}
