//! Watchlist Lifecycle Service
//!
//! Runs one watch per client connection through the lifecycle state machine:
//! session check, shared-transport connect, per-symbol subscribe, liveness
//! polling and drain.
//!
//! All transport mutations, together with the registry changes they go with,
//! happen under one async mutex. Tick fan-out never takes that lock.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::fanout::{ClientHandle, ClientMessage, QuoteFanOut};
use crate::application::ports::{FeedError, FeedTransportPort, SessionError};
use crate::domain::lifecycle::{
    Lifecycle, LifecycleState, OutcomeStatus, SubscribeReport, SymbolOutcome,
};
use crate::domain::session::{SessionScope, SessionStore, SessionToken};
use crate::domain::subscription::ClientId;
use crate::domain::symbol::ProviderCode;
use crate::infrastructure::metrics;

// =============================================================================
// Configuration
// =============================================================================

/// Default interval between client liveness checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Watchlist service settings.
#[derive(Debug, Clone, Copy)]
pub struct WatchlistConfig {
    /// Interval between client liveness checks while active.
    pub poll_interval: Duration,
}

impl Default for WatchlistConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

// =============================================================================
// Request / Report Types
// =============================================================================

/// A client's request to watch a list of tickers.
#[derive(Debug, Clone, Default)]
pub struct WatchRequest {
    /// Tickers in request order; duplicates are collapsed.
    pub symbols: Vec<String>,
    /// Per-client feed credential. Falls back to the shared session.
    pub feed_key: Option<String>,
}

impl WatchRequest {
    /// Request using the shared session.
    #[must_use]
    pub fn new<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            symbols: symbols.into_iter().map(Into::into).collect(),
            feed_key: None,
        }
    }

    /// Attach a per-client feed key.
    #[must_use]
    pub fn with_feed_key(mut self, feed_key: impl Into<String>) -> Self {
        self.feed_key = Some(feed_key.into());
        self
    }
}

/// Client-visible watch errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WatchError {
    /// No usable feed session.
    #[error("{0}")]
    Session(String),

    /// The shared transport could not be opened.
    #[error("{0}")]
    Transport(String),

    /// Every requested ticker failed.
    #[error("none of the requested symbols could be subscribed")]
    NoSymbols,

    /// The client message was malformed.
    #[error("{0}")]
    Request(String),
}

impl WatchError {
    /// Stable error kind for clients.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Session(_) => "session",
            Self::Transport(_) => "transport",
            Self::NoSymbols => "no_symbols",
            Self::Request(_) => "request",
        }
    }
}

impl From<SessionError> for WatchError {
    fn from(err: SessionError) -> Self {
        Self::Session(err.to_string())
    }
}

impl From<FeedError> for WatchError {
    fn from(err: FeedError) -> Self {
        match err {
            FeedError::Unauthorized { .. } => Self::Session(err.to_string()),
            other => Self::Transport(other.to_string()),
        }
    }
}

/// How a watch ended.
#[derive(Debug, Clone)]
pub struct WatchReport {
    /// Client the watch belonged to.
    pub client_id: ClientId,
    /// Final lifecycle state.
    pub final_state: LifecycleState,
    /// States visited.
    pub history: Vec<LifecycleState>,
    /// Per-symbol subscribe outcomes.
    pub subscribe: SubscribeReport,
    /// Provider codes given an upstream unsubscribe attempt during drain.
    pub unsubscribed: Vec<ProviderCode>,
    /// Whether a transport disconnect was attempted during drain.
    pub disconnect_attempted: bool,
    /// Fatal error reported to the client, if any.
    pub error: Option<WatchError>,
}

/// Running watch spawned by [`WatchlistService::spawn_watch`].
#[derive(Debug)]
pub struct WatchHandle {
    client_id: ClientId,
    cancel: CancellationToken,
    task: JoinHandle<WatchReport>,
}

impl WatchHandle {
    /// Client the watch belongs to.
    #[must_use]
    pub const fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// Ask the watch to drain.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Whether the watch task has ended.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the watch to end on its own.
    pub async fn join(self) -> Option<WatchReport> {
        self.task.await.ok()
    }

    /// Stop the watch and wait for its report.
    pub async fn finish(self) -> Option<WatchReport> {
        self.cancel.cancel();
        self.join().await
    }
}

// =============================================================================
// Service
// =============================================================================

/// Runs client watches against the shared feed transport.
pub struct WatchlistService {
    transport: Arc<dyn FeedTransportPort>,
    fanout: Arc<QuoteFanOut>,
    sessions: Arc<SessionStore>,
    config: WatchlistConfig,
    transport_lock: Mutex<()>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for WatchlistService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchlistService")
            .field("config", &self.config)
            .field("fanout", &self.fanout)
            .finish_non_exhaustive()
    }
}

impl WatchlistService {
    /// Create the service.
    #[must_use]
    pub fn new(
        transport: Arc<dyn FeedTransportPort>,
        fanout: Arc<QuoteFanOut>,
        sessions: Arc<SessionStore>,
        config: WatchlistConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            transport,
            fanout,
            sessions,
            config,
            transport_lock: Mutex::new(()),
            shutdown,
        }
    }

    /// The fan-out this service registers clients with.
    #[must_use]
    pub fn fanout(&self) -> &Arc<QuoteFanOut> {
        &self.fanout
    }

    /// The session store consulted when a request has no feed key.
    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Whether the shared transport is connected.
    #[must_use]
    pub fn transport_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Spawn a watch that stops on [`WatchHandle::stop`] or service shutdown.
    #[must_use]
    pub fn spawn_watch(
        self: &Arc<Self>,
        client: ClientHandle,
        request: WatchRequest,
    ) -> WatchHandle {
        let cancel = self.shutdown.child_token();
        let client_id = client.id();
        let service = Arc::clone(self);
        let token = cancel.clone();
        let task = tokio::spawn(async move { service.run_watch(client, request, token).await });

        WatchHandle {
            client_id,
            cancel,
            task,
        }
    }

    /// Run one watch to completion.
    ///
    /// Returns once the client disconnects, `cancel` fires, or the watch
    /// fails before becoming active.
    #[tracing::instrument(skip_all, fields(client_id = client.id()))]
    pub async fn run_watch(
        &self,
        client: ClientHandle,
        request: WatchRequest,
        cancel: CancellationToken,
    ) -> WatchReport {
        let mut watch = Watch::new(client.id());

        // Held from session check through connect so no other watch can
        // install a different credential in between.
        let guard = self.transport_lock.lock().await;

        watch.advance(LifecycleState::SessionPending);
        if let Err(err) = self.establish_session(&request).await {
            drop(guard);
            metrics::record_session_error();
            tracing::warn!(error = %err, "Watch rejected");
            return self.fail(watch, &client, err).await;
        }

        watch.advance(LifecycleState::Connecting);
        let connected = self.attach_and_connect(&client).await;
        drop(guard);
        if let Err(err) = connected {
            if matches!(err, WatchError::Session(_)) {
                metrics::record_session_error();
            }
            tracing::warn!(error = %err, "Feed connect failed");
            self.release(&mut watch).await;
            return self.fail(watch, &client, err).await;
        }

        for ticker in dedupe(&request.symbols) {
            let outcome = self.subscribe_one(client.id(), &ticker).await;
            watch.subscribe.push(outcome);
        }
        self.update_gauges();

        if watch.subscribe.has_success() {
            watch.advance(LifecycleState::Active);
            tracing::info!(
                subscribed = watch.subscribe.succeeded(),
                failed = watch.subscribe.unsuccessful(),
                "Watch active"
            );
            client
                .send(ClientMessage::Subscribed(watch.subscribe.clone()))
                .await;
            self.await_departure(&client, &cancel).await;
        } else {
            tracing::warn!("No symbols subscribed");
            watch.error = Some(WatchError::NoSymbols);
            client.send(ClientMessage::Error(WatchError::NoSymbols)).await;
        }

        watch.advance(LifecycleState::Draining);
        self.release(&mut watch).await;
        watch.advance(LifecycleState::Closed);
        client.try_deliver(ClientMessage::Closed(LifecycleState::Closed));

        tracing::info!(
            unsubscribed = watch.unsubscribed.len(),
            disconnect_attempted = watch.disconnect_attempted,
            "Watch closed"
        );
        watch.finish()
    }

    /// Caller holds `transport_lock`.
    async fn establish_session(&self, request: &WatchRequest) -> Result<(), WatchError> {
        let (token, scope) = match request.feed_key.as_deref().and_then(SessionToken::new) {
            Some(key) => (key, SessionScope::Client),
            None => (
                self.sessions.current().ok_or(SessionError::Missing)?,
                SessionScope::Shared,
            ),
        };

        self.transport.establish_session(&token, scope).await?;
        Ok(())
    }

    /// Caller holds `transport_lock`.
    async fn attach_and_connect(&self, client: &ClientHandle) -> Result<(), WatchError> {
        self.fanout.attach(client);
        if !self.transport.is_connected() {
            self.transport.connect().await?;
        }
        Ok(())
    }

    async fn subscribe_one(&self, client: ClientId, ticker: &str) -> SymbolOutcome {
        let resolution = match self.fanout.resolver().resolve_full(ticker).await {
            Ok(resolution) => resolution,
            Err(e) => return SymbolOutcome::rejected(ticker, e.to_string()),
        };
        let code = resolution.provider_code;
        let symbol = resolution.symbol;

        let _guard = self.transport_lock.lock().await;
        let registry = self.fanout.registry();

        if registry.is_subscribed(client, &code) {
            return SymbolOutcome::resolved(ticker, symbol, code, OutcomeStatus::Shared);
        }
        if !registry.add(client, &code, &symbol) {
            tracing::debug!(provider_code = %code, "Sharing upstream subscription");
            return SymbolOutcome::resolved(ticker, symbol, code, OutcomeStatus::Shared);
        }

        match self.transport.subscribe(&code).await {
            Ok(()) => {
                tracing::debug!(provider_code = %code, symbol = %symbol, "Subscribed");
                SymbolOutcome::resolved(ticker, symbol, code, OutcomeStatus::Subscribed)
            }
            Err(e) => {
                registry.remove(client, &code);
                metrics::record_subscribe_failure();
                tracing::warn!(provider_code = %code, error = %e, "Subscribe failed, skipping");
                SymbolOutcome::resolved(
                    ticker,
                    symbol,
                    code,
                    OutcomeStatus::Failed {
                        reason: e.to_string(),
                    },
                )
            }
        }
    }

    async fn await_departure(&self, client: &ClientHandle, cancel: &CancellationToken) {
        let mut poll = tokio::time::interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!("Watch cancelled");
                    return;
                }
                _ = poll.tick() => {
                    if !client.is_connected() {
                        tracing::debug!("Client gone");
                        return;
                    }
                }
            }
        }
    }

    /// Detach the client, unsubscribe codes it held last, and disconnect the
    /// transport when nobody is left.
    async fn release(&self, watch: &mut Watch) {
        let _guard = self.transport_lock.lock().await;

        let changes = self.fanout.detach(watch.client_id);
        let mut codes: Vec<_> = changes.unsubscribe.into_iter().collect();
        codes.sort();

        for code in codes {
            if let Err(e) = self.transport.unsubscribe(&code).await {
                metrics::record_unsubscribe_failure();
                tracing::warn!(provider_code = %code, error = %e, "Unsubscribe failed");
            }
            watch.unsubscribed.push(code);
        }

        if !self.fanout.registry().has_clients() {
            watch.disconnect_attempted = true;
            if let Err(e) = self.transport.disconnect().await {
                tracing::warn!(error = %e, "Feed disconnect failed");
            }
        }
        self.update_gauges();
    }

    async fn fail(&self, mut watch: Watch, client: &ClientHandle, err: WatchError) -> WatchReport {
        client.send(ClientMessage::Error(err.clone())).await;
        watch.error = Some(err);
        watch.advance(LifecycleState::Closed);
        client.try_deliver(ClientMessage::Closed(LifecycleState::Closed));
        self.update_gauges();
        watch.finish()
    }

    fn update_gauges(&self) {
        let stats = self.fanout.registry().stats();
        metrics::set_upstream_subscriptions(stats.code_count);
        metrics::set_clients(stats.client_count);
    }
}

// =============================================================================
// Watch Bookkeeping
// =============================================================================

struct Watch {
    client_id: ClientId,
    lifecycle: Lifecycle,
    subscribe: SubscribeReport,
    unsubscribed: Vec<ProviderCode>,
    disconnect_attempted: bool,
    error: Option<WatchError>,
}

impl Watch {
    fn new(client_id: ClientId) -> Self {
        Self {
            client_id,
            lifecycle: Lifecycle::new(),
            subscribe: SubscribeReport::new(client_id),
            unsubscribed: Vec::new(),
            disconnect_attempted: false,
            error: None,
        }
    }

    fn advance(&mut self, next: LifecycleState) {
        if let Err(e) = self.lifecycle.advance(next) {
            tracing::error!(error = %e, "Lifecycle violation");
        }
    }

    fn finish(self) -> WatchReport {
        WatchReport {
            client_id: self.client_id,
            final_state: self.lifecycle.state(),
            history: self.lifecycle.history().to_vec(),
            subscribe: self.subscribe,
            unsubscribed: self.unsubscribed,
            disconnect_attempted: self.disconnect_attempted,
            error: self.error,
        }
    }
}

/// Collapse repeated tickers, ignoring case and spacing, keeping first order.
fn dedupe(symbols: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    symbols
        .iter()
        .filter(|s| seen.insert(s.split_whitespace().collect::<Vec<_>>().join(" ").to_uppercase()))
        .cloned()
        .collect()
}

// =============================================================================
// Tests
// =============================================================================
