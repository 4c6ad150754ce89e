//! Shared fakes for integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use breeze_stream_proxy::{
    ClientMessage, FeedError, FeedTransportPort, LookupError, QuoteFanOut, SessionError,
    SessionScope, SessionStore, SessionToken, SubscriptionRegistry, SymbolCache, SymbolLookupPort,
    SymbolResolver, WatchlistConfig, WatchlistService,
};

/// A call observed by [`FakeTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Session(String),
    Connect,
    Subscribe(String),
    Unsubscribe(String),
    Disconnect,
}

/// In-memory feed transport that records every call.
///
/// Keeps an installed and an active session the way the real client does:
/// `connect` activates the installed token, and a client key that differs
/// from the active one is rejected.
#[derive(Default)]
pub struct FakeTransport {
    calls: Mutex<Vec<Call>>,
    connected: AtomicBool,
    installed: Mutex<Option<String>>,
    active: Mutex<Option<String>>,
    failing_codes: Mutex<HashSet<String>>,
    reject_sessions: AtomicBool,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_subscribe(&self, code: &str) {
        self.failing_codes.lock().insert(code.to_string());
    }

    pub fn reject_sessions(&self) {
        self.reject_sessions.store(true, Ordering::SeqCst);
    }

    pub fn active_session(&self) -> Option<String> {
        self.active.lock().clone()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls.lock().iter().filter(|c| *c == call).count()
    }

    pub fn count_where(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }
}

#[async_trait]
impl FeedTransportPort for FakeTransport {
    async fn establish_session(
        &self,
        token: &SessionToken,
        scope: SessionScope,
    ) -> Result<(), SessionError> {
        let token = token.expose().to_string();
        self.calls.lock().push(Call::Session(token.clone()));
        if self.reject_sessions.load(Ordering::SeqCst) {
            return Err(SessionError::Rejected {
                message: "session expired".to_string(),
            });
        }
        let active = self.active.lock().clone();
        if scope == SessionScope::Client && active.is_some_and(|active| active != token) {
            return Err(SessionError::Rejected {
                message: "feed key does not match the active feed session".to_string(),
            });
        }
        *self.installed.lock() = Some(token);
        Ok(())
    }

    async fn connect(&self) -> Result<(), FeedError> {
        self.calls.lock().push(Call::Connect);
        *self.active.lock() = self.installed.lock().clone();
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn subscribe(&self, provider_code: &str) -> Result<(), FeedError> {
        self.calls.lock().push(Call::Subscribe(provider_code.to_string()));
        if self.failing_codes.lock().contains(provider_code) {
            return Err(FeedError::Subscription {
                provider_code: provider_code.to_string(),
                message: "unknown stock".to_string(),
            });
        }
        Ok(())
    }

    async fn unsubscribe(&self, provider_code: &str) -> Result<(), FeedError> {
        self.calls.lock().push(Call::Unsubscribe(provider_code.to_string()));
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), FeedError> {
        self.calls.lock().push(Call::Disconnect);
        *self.active.lock() = None;
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Symbol table lookup that counts calls.
pub struct CountingLookup {
    table: HashMap<String, String>,
    calls: AtomicUsize,
}

impl CountingLookup {
    pub fn new(entries: &[(&str, &str)]) -> Arc<Self> {
        Arc::new(Self {
            table: entries
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SymbolLookupPort for CountingLookup {
    async fn lookup(&self, canonical_ticker: &str) -> Result<Option<String>, LookupError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.table.get(canonical_ticker).cloned())
    }
}

/// Service wired to fakes.
pub struct Harness {
    pub transport: Arc<FakeTransport>,
    pub lookup: Arc<CountingLookup>,
    pub fanout: Arc<QuoteFanOut>,
    pub sessions: Arc<SessionStore>,
    pub service: Arc<WatchlistService>,
    pub shutdown: CancellationToken,
}

pub const MAPPINGS: &[(&str, &str)] = &[
    ("RELIANCE", "RELIND"),
    ("TCS", "TCS"),
    ("INFY", "INFTEC"),
    ("HDFCBANK", "HDFBAN"),
];

pub fn harness(poll_interval: Duration) -> Harness {
    harness_with_sessions(
        poll_interval,
        SessionStore::with_token(SessionToken::new("daily-token")),
    )
}

pub fn harness_with_sessions(poll_interval: Duration, sessions: SessionStore) -> Harness {
    let transport = FakeTransport::new();
    let lookup = CountingLookup::new(MAPPINGS);
    let resolver = Arc::new(SymbolResolver::new(
        Arc::clone(&lookup) as Arc<dyn SymbolLookupPort>,
        Arc::new(SymbolCache::new()),
    ));
    let fanout = Arc::new(QuoteFanOut::new(
        Arc::new(SubscriptionRegistry::new()),
        resolver,
    ));
    let sessions = Arc::new(sessions);
    let shutdown = CancellationToken::new();
    let service = Arc::new(WatchlistService::new(
        Arc::clone(&transport) as Arc<dyn FeedTransportPort>,
        Arc::clone(&fanout),
        Arc::clone(&sessions),
        WatchlistConfig { poll_interval },
        shutdown.clone(),
    ));

    Harness {
        transport,
        lookup,
        fanout,
        sessions,
        service,
        shutdown,
    }
}

/// Next message on a client channel, failing the test after two seconds.
pub async fn next_message(rx: &mut mpsc::Receiver<ClientMessage>) -> ClientMessage {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for client message")
        .expect("client channel closed")
}
