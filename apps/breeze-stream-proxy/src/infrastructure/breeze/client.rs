//! Breeze Push Bridge Client
//!
//! Holds the single shared WebSocket connection to the Breeze push bridge and
//! implements [`FeedTransportPort`] on top of it.
//!
//! # Connection Lifecycle
//!
//! 1. `connect` spawns a connection task and waits until it has opened the
//!    socket and authenticated, or failed doing so.
//! 2. While connected, subscribe and unsubscribe commands are written by the
//!    task; ticks are forwarded as [`FeedEvent::Tick`].
//! 3. After an unexpected drop the task reconnects with backoff, re-authenticates
//!    with the current session token and re-subscribes every held code.
//! 4. `disconnect` cancels the task and forgets all codes.
//!
//! The session a connection authenticated with is kept as the confirmed
//! session until the task ends. A client key that differs from it is
//! rejected, so it can never reach a reconnect.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

use super::auth::{AuthError, AuthState, auth_command, auth_outcome};
use super::codec::{CodecError, JsonCodec};
use super::messages::{BreezeCommand, BreezeMessage};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::{FeedError, FeedEvent, FeedTransportPort, SessionError};
use crate::domain::session::{SessionScope, SessionToken};
use crate::infrastructure::config::{BreezeSettings, Secret, WebSocketSettings};
use crate::infrastructure::metrics;

// =============================================================================
// Error Type
// =============================================================================

/// Errors raised inside the connection task.
#[derive(Debug, thiserror::Error)]
pub enum BreezeClientError {
    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// Authentication failed.
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// Codec error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Opening the socket took too long.
    #[error("connection timed out")]
    ConnectTimeout,

    /// Maximum reconnection attempts exceeded.
    #[error("maximum reconnection attempts exceeded")]
    MaxReconnectAttemptsExceeded,

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,
}

impl From<BreezeClientError> for FeedError {
    fn from(err: BreezeClientError) -> Self {
        match err {
            BreezeClientError::Auth(auth) => Self::Unauthorized {
                message: auth.to_string(),
            },
            other => Self::Connection {
                message: other.to_string(),
            },
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Client configuration.
#[derive(Debug, Clone)]
pub struct BreezeClientConfig {
    /// Push bridge URL.
    pub url: String,
    /// Application API key.
    pub api_key: Secret,
    /// Exchange code sent with subscriptions.
    pub exchange_code: String,
    /// Time allowed to open and authenticate, and to write one command.
    pub auth_timeout: Duration,
    /// Reconnection backoff.
    pub reconnect: ReconnectConfig,
}

impl BreezeClientConfig {
    /// Build from loaded settings.
    #[must_use]
    pub fn from_settings(breeze: &BreezeSettings, websocket: &WebSocketSettings) -> Self {
        Self {
            url: breeze.feed_url.clone(),
            api_key: breeze.api_key.clone(),
            exchange_code: breeze.exchange_code.clone(),
            auth_timeout: websocket.auth_timeout,
            reconnect: ReconnectConfig::from_websocket_settings(websocket),
        }
    }
}

// =============================================================================
// Client
// =============================================================================

struct Command {
    frame: BreezeCommand,
    reply: oneshot::Sender<Result<(), String>>,
}

struct Connection {
    commands: mpsc::Sender<Command>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Connection {
    fn is_alive(&self) -> bool {
        !self.task.is_finished()
    }

    async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Feed connection task ended abnormally");
        }
    }
}

struct Inner {
    config: BreezeClientConfig,
    codec: JsonCodec,
    event_tx: mpsc::Sender<FeedEvent>,
    shutdown: CancellationToken,
    session: parking_lot::RwLock<Option<SessionToken>>,
    confirmed: parking_lot::RwLock<Option<SessionToken>>,
    subscriptions: parking_lot::RwLock<BTreeSet<String>>,
    connected: AtomicBool,
}

/// Shared connection to the Breeze push bridge.
pub struct BreezeFeedClient {
    inner: Arc<Inner>,
    connection: Mutex<Option<Connection>>,
}

impl BreezeFeedClient {
    /// Create a client. Nothing is opened until `connect`.
    #[must_use]
    pub fn new(
        config: BreezeClientConfig,
        event_tx: mpsc::Sender<FeedEvent>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                codec: JsonCodec::new(),
                event_tx,
                shutdown,
                session: parking_lot::RwLock::new(None),
                confirmed: parking_lot::RwLock::new(None),
                subscriptions: parking_lot::RwLock::new(BTreeSet::new()),
                connected: AtomicBool::new(false),
            }),
            connection: Mutex::new(None),
        }
    }

    /// Codes that will be re-subscribed after a reconnect.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<String> {
        self.inner.subscriptions.read().iter().cloned().collect()
    }

    async fn send_command(&self, frame: BreezeCommand) -> Result<(), FeedError> {
        let commands = self.command_sender().await?;
        let code = frame.stock_code().unwrap_or_default().to_string();
        let timeout = self.inner.config.auth_timeout;

        let (reply_tx, reply_rx) = oneshot::channel();
        let command = Command {
            frame,
            reply: reply_tx,
        };
        match commands.send_timeout(command, timeout).await {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(_)) => {
                return Err(FeedError::Subscription {
                    provider_code: code,
                    message: "feed command queue is full".to_string(),
                });
            }
            Err(SendTimeoutError::Closed(_)) => return Err(FeedError::Closed),
        }

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(message))) => Err(FeedError::Subscription {
                provider_code: code,
                message,
            }),
            Ok(Err(_)) => Err(FeedError::Closed),
            Err(_) => Err(FeedError::Timeout {
                provider_code: code,
            }),
        }
    }

    async fn command_sender(&self) -> Result<mpsc::Sender<Command>, FeedError> {
        let guard = self.connection.lock().await;
        match guard.as_ref() {
            Some(conn) if conn.is_alive() => Ok(conn.commands.clone()),
            _ => Err(FeedError::NotConnected),
        }
    }

    /// Queue an unsubscribe behind a subscribe whose reply never came.
    ///
    /// The queue is ordered, so if the bridge does get the subscribe it gets
    /// the unsubscribe after it.
    async fn retract(&self, provider_code: &str) {
        let Ok(commands) = self.command_sender().await else {
            return;
        };
        let (reply, _) = oneshot::channel();
        let frame = BreezeCommand::unsubscribe(provider_code, &self.inner.config.exchange_code);
        if commands.try_send(Command { frame, reply }).is_err() {
            tracing::warn!(provider_code, "Could not queue retraction for timed-out subscribe");
        } else {
            tracing::debug!(provider_code, "Retracting timed-out subscribe");
        }
    }
}

#[async_trait]
impl FeedTransportPort for BreezeFeedClient {
    async fn establish_session(
        &self,
        token: &SessionToken,
        scope: SessionScope,
    ) -> Result<(), SessionError> {
        let confirmed = self.inner.confirmed.read().clone();
        if let Some(confirmed) = confirmed {
            if &confirmed == token {
                return Ok(());
            }
            if scope == SessionScope::Client {
                tracing::warn!("Client feed key does not match the active feed session");
                return Err(SessionError::Rejected {
                    message: "feed key does not match the active feed session".to_string(),
                });
            }
        }

        let mut session = self.inner.session.write();
        if session.as_ref() != Some(token) {
            tracing::info!(?scope, "Feed session token installed");
            *session = Some(token.clone());
        }
        Ok(())
    }

    async fn connect(&self) -> Result<(), FeedError> {
        let mut guard = self.connection.lock().await;

        if guard.as_ref().is_some_and(Connection::is_alive) {
            return Ok(());
        }
        if let Some(stale) = guard.take() {
            stale.shutdown().await;
        }

        let (commands_tx, commands_rx) = mpsc::channel(64);
        let (ready_tx, ready_rx) = oneshot::channel();
        let cancel = self.inner.shutdown.child_token();
        let task = tokio::spawn(Arc::clone(&self.inner).run(
            commands_rx,
            cancel.clone(),
            ready_tx,
        ));

        match ready_rx.await {
            Ok(Ok(())) => {
                *guard = Some(Connection {
                    commands: commands_tx,
                    cancel,
                    task,
                });
                Ok(())
            }
            Ok(Err(e)) => {
                cancel.cancel();
                let _ = task.await;
                Err(e.into())
            }
            Err(_) => {
                cancel.cancel();
                let _ = task.await;
                Err(FeedError::Closed)
            }
        }
    }

    async fn subscribe(&self, provider_code: &str) -> Result<(), FeedError> {
        {
            let guard = self.connection.lock().await;
            if !guard.as_ref().is_some_and(Connection::is_alive) {
                return Err(FeedError::NotConnected);
            }
        }

        let inserted = self
            .inner
            .subscriptions
            .write()
            .insert(provider_code.to_string());

        if !self.inner.connected.load(Ordering::Acquire) {
            tracing::debug!(provider_code, "Feed reconnecting, subscription deferred");
            return Ok(());
        }

        let frame = BreezeCommand::subscribe(provider_code, &self.inner.config.exchange_code);
        let result = self.send_command(frame).await;
        if result.is_err() && inserted {
            self.inner.subscriptions.write().remove(provider_code);
        }
        if matches!(result, Err(FeedError::Timeout { .. })) {
            self.retract(provider_code).await;
        }
        result
    }

    async fn unsubscribe(&self, provider_code: &str) -> Result<(), FeedError> {
        self.inner.subscriptions.write().remove(provider_code);

        if !self.inner.connected.load(Ordering::Acquire) {
            return Ok(());
        }

        let frame = BreezeCommand::unsubscribe(provider_code, &self.inner.config.exchange_code);
        match self.send_command(frame).await {
            Err(FeedError::NotConnected) => Ok(()),
            other => other,
        }
    }

    async fn disconnect(&self) -> Result<(), FeedError> {
        let connection = self.connection.lock().await.take();
        self.inner.subscriptions.write().clear();

        if let Some(conn) = connection {
            tracing::info!("Closing feed connection");
            conn.shutdown().await;
        }
        self.inner.connected.store(false, Ordering::Release);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }
}

// =============================================================================
// Connection Task
// =============================================================================

impl Inner {
    async fn run(
        self: Arc<Self>,
        commands: mpsc::Receiver<Command>,
        cancel: CancellationToken,
        ready: oneshot::Sender<Result<(), BreezeClientError>>,
    ) {
        self.supervise(commands, &cancel, ready).await;
        self.connected.store(false, Ordering::Release);
        *self.confirmed.write() = None;
    }

    async fn supervise(
        &self,
        mut commands: mpsc::Receiver<Command>,
        cancel: &CancellationToken,
        ready: oneshot::Sender<Result<(), BreezeClientError>>,
    ) {
        let mut ready = Some(ready);
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());

        loop {
            let result = self
                .connect_and_run(&mut commands, cancel, &mut ready, &mut policy)
                .await;
            self.connected.store(false, Ordering::Release);

            match result {
                Ok(()) => {
                    tracing::info!("Feed connection closed");
                    let _ = self.event_tx.send(FeedEvent::Disconnected).await;
                    return;
                }
                Err(e) => {
                    if let Some(tx) = ready.take() {
                        tracing::warn!(error = %e, "Feed connection failed");
                        let _ = tx.send(Err(e));
                        return;
                    }

                    tracing::warn!(error = %e, "Feed connection lost");
                    let _ = self.event_tx.send(FeedEvent::Disconnected).await;

                    let Some(delay) = policy.next_delay() else {
                        let e = BreezeClientError::MaxReconnectAttemptsExceeded;
                        tracing::error!(error = %e, "Giving up on feed connection");
                        let _ = self.event_tx.send(FeedEvent::Error(e.to_string())).await;
                        return;
                    };

                    let attempt = policy.attempt_count();
                    tracing::info!(
                        attempt,
                        delay_ms = delay.as_millis(),
                        "Reconnecting to feed"
                    );
                    let _ = self.event_tx.send(FeedEvent::Reconnecting { attempt }).await;

                    if !Self::wait_for_retry(&mut commands, cancel, delay).await {
                        tracing::info!("Feed client cancelled during reconnect delay");
                        let _ = self.event_tx.send(FeedEvent::Disconnected).await;
                        return;
                    }
                }
            }
        }
    }

    /// Sleep out the backoff. Commands arriving meanwhile are acknowledged;
    /// the held code set already reflects them and is replayed on reconnect.
    ///
    /// Returns `false` if cancelled.
    async fn wait_for_retry(
        commands: &mut mpsc::Receiver<Command>,
        cancel: &CancellationToken,
        delay: Duration,
    ) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                () = cancel.cancelled() => return false,
                () = &mut sleep => return true,
                Some(cmd) = commands.recv() => {
                    let _ = cmd.reply.send(Ok(()));
                }
            }
        }
    }

    async fn connect_and_run(
        &self,
        commands: &mut mpsc::Receiver<Command>,
        cancel: &CancellationToken,
        ready: &mut Option<oneshot::Sender<Result<(), BreezeClientError>>>,
        policy: &mut ReconnectPolicy,
    ) -> Result<(), BreezeClientError> {
        let token = self
            .session
            .read()
            .clone()
            .ok_or(AuthError::MissingSession)?;

        tracing::info!(url = %self.config.url, "Connecting to feed");

        let (ws_stream, _response) = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            result = tokio::time::timeout(
                self.config.auth_timeout,
                tokio_tungstenite::connect_async(&self.config.url),
            ) => result.map_err(|_| BreezeClientError::ConnectTimeout)??,
        };

        let (mut write, mut read) = ws_stream.split();

        let auth = auth_command(&self.config.api_key, &token);
        write
            .send(Message::Text(self.codec.encode(&auth)?.into()))
            .await?;

        let authenticated = tokio::time::timeout(
            self.config.auth_timeout,
            self.await_auth(&mut write, &mut read),
        );
        tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            result = authenticated => result.map_err(|_| AuthError::Timeout)??,
        }

        tracing::info!("Feed authenticated");
        *self.confirmed.write() = Some(token);
        self.connected.store(true, Ordering::Release);
        policy.reset();
        if let Some(tx) = ready.take() {
            let _ = tx.send(Ok(()));
        }
        let _ = self.event_tx.send(FeedEvent::Connected).await;

        let held: Vec<String> = self.subscriptions.read().iter().cloned().collect();
        if !held.is_empty() {
            tracing::info!(count = held.len(), "Restoring feed subscriptions");
        }
        for code in held {
            let frame = BreezeCommand::subscribe(&code, &self.config.exchange_code);
            write
                .send(Message::Text(self.codec.encode(&frame)?.into()))
                .await?;
        }

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                cmd = commands.recv() => {
                    let Some(Command { frame, reply }) = cmd else {
                        return Ok(());
                    };
                    tracing::debug!(command = ?frame, "Sending feed command");
                    match self.codec.encode(&frame) {
                        Ok(text) => {
                            if let Err(e) = write.send(Message::Text(text.into())).await {
                                let _ = reply.send(Err(e.to_string()));
                                return Err(e.into());
                            }
                            let _ = reply.send(Ok(()));
                        }
                        Err(e) => {
                            let _ = reply.send(Err(e.to_string()));
                        }
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.handle_text_message(&text).await,
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) => {
                            tracing::info!("Feed sent close frame");
                            return Err(BreezeClientError::ConnectionClosed);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            tracing::info!("Feed stream ended");
                            return Err(BreezeClientError::ConnectionClosed);
                        }
                    }
                }
            }
        }
    }

    async fn await_auth<W, R>(&self, write: &mut W, read: &mut R) -> Result<(), BreezeClientError>
    where
        W: Sink<Message, Error = tungstenite::Error> + Unpin,
        R: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
    {
        let mut state = AuthState::Sent;

        while state != AuthState::Authenticated {
            match read.next().await {
                Some(Ok(Message::Text(text))) => {
                    let messages = match self.codec.decode(&text) {
                        Ok(messages) => messages,
                        Err(e) => {
                            tracing::warn!(error = %e, "Undecodable frame during authentication");
                            continue;
                        }
                    };
                    for message in &messages {
                        match auth_outcome(message) {
                            Some(Ok(())) => state = AuthState::Authenticated,
                            Some(Err(e)) => return Err(e.into()),
                            None => tracing::trace!("Ignoring frame before authentication"),
                        }
                    }
                }
                Some(Ok(Message::Ping(data))) => write.send(Message::Pong(data)).await?,
                Some(Ok(Message::Close(_))) | None => {
                    return Err(BreezeClientError::ConnectionClosed);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            }
        }

        Ok(())
    }

    async fn handle_text_message(&self, text: &str) {
        let messages = match self.codec.decode(text) {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping undecodable feed frame");
                metrics::record_tick_discarded("undecodable");
                return;
            }
        };

        for message in messages {
            match message {
                BreezeMessage::Tick(tick) => {
                    if self.event_tx.send(FeedEvent::Tick(tick)).await.is_err() {
                        tracing::debug!("Feed event receiver dropped");
                        return;
                    }
                }
                BreezeMessage::Error(err) => {
                    tracing::warn!(code = ?err.code_text(), msg = %err.message, "Feed error");
                    let _ = self.event_tx.send(FeedEvent::Error(err.message)).await;
                }
                BreezeMessage::Success(success) => {
                    tracing::debug!(message = ?success.message, "Feed acknowledgement");
                }
                BreezeMessage::Other(kind) => {
                    tracing::trace!(kind = %kind, "Ignoring feed frame");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> (BreezeFeedClient, mpsc::Receiver<FeedEvent>) {
        let (tx, rx) = mpsc::channel(16);
        let config = BreezeClientConfig {
            url: "ws://127.0.0.1:9".to_string(),
            api_key: Secret::new("key".to_string()),
            exchange_code: "NSE".to_string(),
            auth_timeout: Duration::from_millis(200),
            reconnect: ReconnectConfig::default().without_jitter(),
        };
        (
            BreezeFeedClient::new(config, tx, CancellationToken::new()),
            rx,
        )
    }

    #[test]
    fn auth_error_maps_to_unauthorized() {
        let err: FeedError = BreezeClientError::Auth(AuthError::Timeout).into();
        assert!(matches!(err, FeedError::Unauthorized { .. }));

        let err: FeedError = BreezeClientError::ConnectionClosed.into();
        assert_eq!(
            err,
            FeedError::Connection {
                message: "connection closed".to_string()
            }
        );
    }

    #[tokio::test]
    async fn subscribe_before_connect_is_not_connected() {
        let (client, _rx) = client();
        assert_eq!(
            client.subscribe("RELIND").await,
            Err(FeedError::NotConnected)
        );
        assert!(client.subscriptions().is_empty());
    }

    #[tokio::test]
    async fn connect_without_session_is_unauthorized() {
        let (client, _rx) = client();
        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, FeedError::Unauthorized { .. }));
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn unsubscribe_while_disconnected_is_noop() {
        let (client, _rx) = client();
        assert_eq!(client.unsubscribe("RELIND").await, Ok(()));
        assert_eq!(client.disconnect().await, Ok(()));
    }

    #[tokio::test]
    async fn establish_session_installs_token_while_idle() {
        let (client, _rx) = client();
        let token = SessionToken::new("daily").unwrap();
        assert_eq!(
            client.establish_session(&token, SessionScope::Client).await,
            Ok(())
        );
        assert_eq!(client.inner.session.read().as_ref(), Some(&token));
    }

    #[tokio::test]
    async fn client_key_must_match_confirmed_session() {
        let (client, _rx) = client();
        let daily = SessionToken::new("daily").unwrap();
        client
            .establish_session(&daily, SessionScope::Shared)
            .await
            .unwrap();
        *client.inner.confirmed.write() = Some(daily.clone());

        let bogus = SessionToken::new("bogus").unwrap();
        assert!(matches!(
            client.establish_session(&bogus, SessionScope::Client).await,
            Err(SessionError::Rejected { .. })
        ));
        assert_eq!(
            client.establish_session(&daily, SessionScope::Client).await,
            Ok(())
        );
        assert_eq!(client.inner.session.read().as_ref(), Some(&daily));
    }

    #[tokio::test]
    async fn shared_token_replaces_confirmed_session_for_next_connect() {
        let (client, _rx) = client();
        *client.inner.confirmed.write() = SessionToken::new("day-1");

        let next = SessionToken::new("day-2").unwrap();
        assert_eq!(
            client.establish_session(&next, SessionScope::Shared).await,
            Ok(())
        );
        assert_eq!(client.inner.session.read().as_ref(), Some(&next));
    }

    #[tokio::test]
    async fn timed_out_subscribe_is_retracted() {
        let (client, _rx) = client();
        let (commands, mut queued) = mpsc::channel(8);
        *client.connection.lock().await = Some(Connection {
            commands,
            cancel: CancellationToken::new(),
            task: tokio::spawn(std::future::pending::<()>()),
        });
        client.inner.connected.store(true, Ordering::Release);

        let err = client.subscribe("RELIND").await.unwrap_err();

        assert_eq!(
            err,
            FeedError::Timeout {
                provider_code: "RELIND".to_string()
            }
        );
        assert!(client.subscriptions().is_empty());
        assert_eq!(
            queued.recv().await.unwrap().frame,
            BreezeCommand::subscribe("RELIND", "NSE")
        );
        assert_eq!(
            queued.recv().await.unwrap().frame,
            BreezeCommand::unsubscribe("RELIND", "NSE")
        );
    }
}
