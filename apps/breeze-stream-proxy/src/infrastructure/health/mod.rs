//! Operational HTTP Endpoints
//!
//! Served on their own port so probes and scrapes never share a listener
//! with watchlist clients.
//!
//! | Route      | Purpose                                   |
//! |------------|-------------------------------------------|
//! | `/health`  | JSON report: feed, session, registry      |
//! | `/healthz` | Liveness, always `OK` while the process runs |
//! | `/readyz`  | Readiness, fails only when unhealthy      |
//! | `/metrics` | Prometheus text exposition                |
//!
//! The feed connects on demand, so an idle proxy with no clients and no
//! feed connection is healthy.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::{ConnectionState, FeedState, FeedStatus, WatchlistService};
use crate::domain::subscription::SubscriptionStats;
use crate::infrastructure::metrics::get_metrics_handle;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

// =============================================================================
// Report
// =============================================================================

/// Proxy health rollup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Feed connected, or nobody is waiting on it.
    Healthy,
    /// Clients attached while the feed recovers.
    Degraded,
    /// Clients attached and the feed has given up.
    Unhealthy,
}

impl HealthStatus {
    /// Roll feed state and client count into one status.
    #[must_use]
    pub const fn assess(feed: ConnectionState, clients: usize) -> Self {
        match (feed, clients) {
            (ConnectionState::Connected, _) | (_, 0) => Self::Healthy,
            (ConnectionState::Reconnecting | ConnectionState::Disconnected, _) => Self::Degraded,
            (ConnectionState::Error, _) => Self::Unhealthy,
        }
    }

    /// Status code for `/health`.
    #[must_use]
    pub const fn http_status(self) -> StatusCode {
        match self {
            Self::Healthy | Self::Degraded => StatusCode::OK,
            Self::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Rolled-up status.
    pub status: HealthStatus,
    /// Crate version.
    pub version: String,
    /// Seconds since the health server state was created.
    pub uptime_secs: u64,
    /// Report time.
    pub current_time: DateTime<Utc>,
    /// Upstream feed status.
    pub feed: FeedStatus,
    /// Whether a shared session token is installed.
    pub session_active: bool,
    /// Registry statistics.
    pub subscriptions: SubscriptionStats,
}

// =============================================================================
// Server
// =============================================================================

/// Shared state for the operational endpoints.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    feed_state: Arc<FeedState>,
    watchlist: Arc<WatchlistService>,
}

impl HealthServerState {
    /// Create state; uptime counts from here.
    #[must_use]
    pub fn new(
        version: String,
        feed_state: Arc<FeedState>,
        watchlist: Arc<WatchlistService>,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            feed_state,
            watchlist,
        }
    }

    fn report(&self) -> HealthReport {
        let feed = self.feed_state.status();
        let subscriptions = self.watchlist.fanout().registry().stats();

        HealthReport {
            status: HealthStatus::assess(feed.state, subscriptions.client_count),
            version: self.version.clone(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            current_time: Utc::now(),
            feed,
            session_active: self.watchlist.sessions().is_active(),
            subscriptions,
        }
    }
}

/// Operational HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a server for `port`.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
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
    /// Returns `HealthServerError` if the port cannot be bound or the server
    /// stops abnormally.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], self.port)))
            .await
            .map_err(|e| HealthServerError::Bind {
                port: self.port,
                message: e.to_string(),
            })?;

        tracing::info!(port = self.port, "Health server listening");
        serve(listener, self.state, self.cancel).await
    }
}

/// Serve the operational router on a bound listener until cancelled.
///
/// # Errors
///
/// Returns `HealthServerError::Serve` if the server stops abnormally.
pub async fn serve(
    listener: TcpListener,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
) -> Result<(), HealthServerError> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .map_err(|e| HealthServerError::Serve(e.to_string()))?;

    tracing::info!("Health server stopped");
    Ok(())
}

/// Operational router.
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(report))
        .route("/healthz", get(|| async { "OK" }))
        .route("/readyz", get(readiness))
        .route("/metrics", get(prometheus))
        .with_state(state)
}

async fn report(State(state): State<Arc<HealthServerState>>) -> Response {
    let report = state.report();
    (report.status.http_status(), Json(report)).into_response()
}

async fn readiness(State(state): State<Arc<HealthServerState>>) -> Response {
    match state.report().status {
        HealthStatus::Unhealthy => {
            (StatusCode::SERVICE_UNAVAILABLE, "NOT READY: feed failed").into_response()
        }
        HealthStatus::Healthy | HealthStatus::Degraded => "READY".into_response(),
    }
}

async fn prometheus() -> Response {
    let Some(handle) = get_metrics_handle() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response();
    };
    (
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        handle.render(),
    )
        .into_response()
}

/// Operational server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// The port could not be bound.
    #[error("failed to bind health port {port}: {message}")]
    Bind {
        /// Requested port.
        port: u16,
        /// Underlying I/O error.
        message: String,
    },

    /// The server stopped abnormally.
    #[error("health server failed: {0}")]
    Serve(String),
}
