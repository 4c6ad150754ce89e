//! Client-Facing HTTP and WebSocket Server
//!
//! # Endpoints
//!
//! - `GET /ws` - Watchlist WebSocket
//! - `POST /breeze/admin/api-session` - Install the daily session token
//! - `GET /breeze/health` - Session and feed summary
//!
//! # WebSocket Events
//!
//! Inbound:
//!
//! ```json
//! {"event":"subscribe_to_watchlist","stocks":["RELIANCE","TCS"],"proxy_key":"..."}
//! {"event":"unsubscribe_from_watchlist"}
//! ```
//!
//! Outbound: `watchlist_update`, `watchlist_subscribed`, `watchlist_error`,
//! `watchlist_closed`, each carrying its payload under `data`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::services::{
    ClientHandle, ClientMessage, WatchError, WatchHandle, WatchRequest, WatchlistService,
};
use crate::domain::lifecycle::{LifecycleState, SubscribeReport};
use crate::domain::session::SessionToken;
use crate::domain::streaming::NormalizedQuote;
use crate::infrastructure::config::Secret;

/// Header carrying the admin key.
pub const ADMIN_KEY_HEADER: &str = "x-proxy-admin-key";

// =============================================================================
// Wire Events
// =============================================================================

/// Events accepted from watchlist clients.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum InboundEvent {
    /// Start (or replace) the connection's watch.
    SubscribeToWatchlist {
        /// Tickers to watch.
        #[serde(default)]
        stocks: Vec<String>,
        /// Optional per-client feed session key.
        #[serde(default)]
        proxy_key: Option<String>,
    },
    /// Drain the connection's watch.
    UnsubscribeFromWatchlist,
}

/// Error payload sent to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorPayload {
    /// Stable error kind.
    pub kind: String,
    /// Human-readable message.
    pub message: String,
}

impl From<&WatchError> for ErrorPayload {
    fn from(err: &WatchError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// Events sent to watchlist clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum OutboundEvent {
    /// A normalized quote.
    WatchlistUpdate(NormalizedQuote),
    /// Per-symbol subscribe outcomes.
    WatchlistSubscribed(SubscribeReport),
    /// A watch or request error.
    WatchlistError(ErrorPayload),
    /// The watch has closed.
    WatchlistClosed {
        /// Final lifecycle state.
        state: LifecycleState,
    },
}

impl From<ClientMessage> for OutboundEvent {
    fn from(message: ClientMessage) -> Self {
        match message {
            ClientMessage::Quote(quote) => Self::WatchlistUpdate(quote),
            ClientMessage::Subscribed(report) => Self::WatchlistSubscribed(report),
            ClientMessage::Error(err) => Self::WatchlistError(ErrorPayload::from(&err)),
            ClientMessage::Closed(state) => Self::WatchlistClosed { state },
        }
    }
}

// =============================================================================
// Server State
// =============================================================================

/// Shared state for the client server.
pub struct ServerState {
    watchlist: Arc<WatchlistService>,
    admin_key: Option<Secret>,
    client_buffer: usize,
    shutdown: CancellationToken,
}

impl ServerState {
    /// Create server state.
    #[must_use]
    pub fn new(
        watchlist: Arc<WatchlistService>,
        admin_key: Option<Secret>,
        client_buffer: usize,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            watchlist,
            admin_key,
            client_buffer: client_buffer.max(1),
            shutdown,
        }
    }
}

/// Build the client router.
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/breeze/admin/api-session", post(admin_session_handler))
        .route("/breeze/health", get(breeze_health_handler))
        .with_state(state)
}

// =============================================================================
// Server
// =============================================================================

/// Client HTTP and WebSocket server.
pub struct StreamServer {
    port: u16,
    state: Arc<ServerState>,
    cancel: CancellationToken,
}

impl StreamServer {
    /// Create a new server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<ServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Bind and serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `ServerError` if binding fails or the server stops abnormally.
    pub async fn run(self) -> Result<(), ServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Stream server listening");
        serve(listener, self.state, self.cancel).await
    }
}

/// Serve the client router on an already-bound listener until cancelled.
///
/// # Errors
///
/// Returns `ServerError::ServerFailed` if the server stops abnormally.
pub async fn serve(
    listener: TcpListener,
    state: Arc<ServerState>,
    cancel: CancellationToken,
) -> Result<(), ServerError> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .map_err(|e| ServerError::ServerFailed(e.to_string()))?;

    tracing::info!("Stream server stopped");
    Ok(())
}

// =============================================================================
// WebSocket
// =============================================================================

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

struct ActiveWatch {
    handle: WatchHandle,
    forwarder: JoinHandle<()>,
}

async fn handle_socket(socket: WebSocket, state: Arc<ServerState>) {
    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<OutboundEvent>(state.client_buffer);
    let mut active: Option<ActiveWatch> = None;

    tracing::debug!("Watchlist socket opened");

    loop {
        tokio::select! {
            () = state.shutdown.cancelled() => break,
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<InboundEvent>(text.as_str()) {
                            Ok(event) => on_event(event, &state, &out_tx, &mut active).await,
                            Err(e) => {
                                tracing::debug!(error = %e, "Malformed client frame");
                                let err = WatchError::Request(format!("invalid message: {e}"));
                                let _ = out_tx.try_send(OutboundEvent::WatchlistError((&err).into()));
                            }
                        }
                    }
                    Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
            Some(event) = out_rx.recv() => {
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to encode client event");
                        continue;
                    }
                };
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
        }
    }

    if let Some(watch) = active.take() {
        watch.handle.stop();
        watch.forwarder.abort();
    }
    tracing::debug!("Watchlist socket closed");
}

async fn on_event(
    event: InboundEvent,
    state: &Arc<ServerState>,
    out_tx: &mpsc::Sender<OutboundEvent>,
    active: &mut Option<ActiveWatch>,
) {
    match event {
        InboundEvent::SubscribeToWatchlist { stocks, proxy_key } => {
            if stocks.iter().all(|s| s.trim().is_empty()) {
                let err = WatchError::Request("stocks must not be empty".to_string());
                let _ = out_tx.try_send(OutboundEvent::WatchlistError((&err).into()));
                return;
            }

            // The old watch's events stop here and its drain completes before
            // the new watch subscribes.
            if let Some(previous) = active.take() {
                tracing::debug!(client_id = previous.handle.client_id(), "Replacing watch");
                previous.forwarder.abort();
                if let Some(report) = previous.handle.finish().await {
                    tracing::debug!(final_state = ?report.final_state, "Previous watch drained");
                }
            }

            let mut request = WatchRequest::new(stocks);
            if let Some(key) = proxy_key {
                request = request.with_feed_key(key);
            }

            let (tx, rx) = mpsc::channel(state.client_buffer);
            let handle = state.watchlist.spawn_watch(ClientHandle::new(tx), request);
            let forwarder = tokio::spawn(forward(rx, out_tx.clone()));
            *active = Some(ActiveWatch { handle, forwarder });
        }
        InboundEvent::UnsubscribeFromWatchlist => {
            if let Some(watch) = active.take() {
                watch.handle.stop();
            }
        }
    }
}

async fn forward(mut rx: mpsc::Receiver<ClientMessage>, out_tx: mpsc::Sender<OutboundEvent>) {
    while let Some(message) = rx.recv().await {
        if out_tx.send(message.into()).await.is_err() {
            break;
        }
    }
}

// =============================================================================
// Breeze HTTP Handlers
// =============================================================================

#[derive(Debug, Deserialize)]
struct AdminSessionRequest {
    #[serde(default)]
    api_session: Option<String>,
}

#[derive(Debug, Serialize)]
struct StatusBody {
    status: &'static str,
    message: String,
}

impl StatusBody {
    fn error(status: StatusCode, message: &str) -> (StatusCode, Json<Self>) {
        (
            status,
            Json(Self {
                status: "error",
                message: message.to_string(),
            }),
        )
    }
}

async fn admin_session_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<StatusBody>) {
    let provided = headers
        .get(ADMIN_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim);

    let authorized = match (&state.admin_key, provided) {
        (Some(expected), Some(provided)) => {
            constant_time_eq(expected.expose().as_bytes(), provided.as_bytes())
        }
        _ => false,
    };
    if !authorized {
        tracing::warn!("Rejected admin session request");
        return StatusBody::error(StatusCode::UNAUTHORIZED, "invalid admin key");
    }

    let token = serde_json::from_slice::<AdminSessionRequest>(&body)
        .ok()
        .and_then(|req| req.api_session)
        .and_then(|raw| SessionToken::new(&raw));
    let Some(token) = token else {
        return StatusBody::error(StatusCode::BAD_REQUEST, "api_session is required");
    };

    state.watchlist.sessions().set(token);
    tracing::info!("Breeze session token updated");

    (
        StatusCode::OK,
        Json(StatusBody {
            status: "success",
            message: "Breeze session updated".to_string(),
        }),
    )
}

/// Byte comparison whose timing does not depend on where the inputs differ.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Body of `GET /breeze/health`.
#[derive(Debug, Clone, Serialize)]
pub struct BreezeHealth {
    /// Always `"ok"` when the server answers.
    pub status: &'static str,
    /// Whether a shared session token is installed.
    pub session_active: bool,
    /// Whether the upstream feed is connected.
    pub feed_connected: bool,
    /// Attached watchlist clients.
    pub clients: usize,
    /// Upstream provider codes subscribed.
    pub subscriptions: usize,
}

async fn breeze_health_handler(State(state): State<Arc<ServerState>>) -> Json<BreezeHealth> {
    let watchlist = &state.watchlist;
    let stats = watchlist.fanout().registry().stats();

    Json(BreezeHealth {
        status: "ok",
        session_active: watchlist.sessions().is_active(),
        feed_connected: watchlist.transport_connected(),
        clients: stats.client_count,
        subscriptions: stats.code_count,
    })
}

// =============================================================================
// Errors
// =============================================================================

/// Client server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
