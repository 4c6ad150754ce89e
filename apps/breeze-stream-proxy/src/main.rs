//! Breeze Stream Proxy Binary
//!
//! Starts the watchlist stream proxy.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin breeze-stream-proxy
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `BREEZE_API_KEY`: Breeze application API key
//!
//! ## Optional
//! - `BREEZE_SESSION_TOKEN`: Daily session token (may be set later via the admin endpoint)
//! - `BREEZE_PROXY_ADMIN_KEY`: Key for `POST /breeze/admin/api-session`
//! - `BREEZE_FEED_URL`, `BREEZE_EXCHANGE_CODE`
//! - `SUPABASE_URL`, `SUPABASE_SERVICE_ROLE_KEY`, `SUPABASE_SYMBOL_TABLE`
//! - `WATCHLIST_POLL_INTERVAL_SECS`, `WATCHLIST_CLIENT_BUFFER`
//! - `STREAM_PROXY_PORT`: Client server port (default: 8081)
//! - `STREAM_PROXY_HEALTH_PORT`: Health check HTTP port (default: 8082)
//! - `OTEL_ENABLED`, `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use breeze_stream_proxy::application::ports::{
    FeedTransportPort, IdentitySymbolLookup, SymbolLookupPort,
};
use breeze_stream_proxy::application::services::{
    FeedState, QuoteFanOut, SymbolResolver, WatchlistConfig, WatchlistService, pump_feed_events,
};
use breeze_stream_proxy::domain::session::SessionStore;
use breeze_stream_proxy::domain::subscription::SubscriptionRegistry;
use breeze_stream_proxy::domain::symbol::SymbolCache;
use breeze_stream_proxy::infrastructure::breeze::{BreezeClientConfig, BreezeFeedClient};
use breeze_stream_proxy::infrastructure::health::{HealthServer, HealthServerState};
use breeze_stream_proxy::infrastructure::server::{ServerState, StreamServer};
use breeze_stream_proxy::infrastructure::supabase::SupabaseSymbolLookup;
use breeze_stream_proxy::infrastructure::telemetry;
use breeze_stream_proxy::{ProxyConfig, init_metrics};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Upper bound on draining watches and closing the feed after a signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Feed event channel capacity.
const FEED_EVENT_BUFFER: usize = 4096;

#[tokio::main]
#[allow(clippy::expect_used, clippy::too_many_lines)]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Breeze Stream Proxy");

    let _metrics_handle = init_metrics();

    let config = ProxyConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Symbol resolution
    let lookup: Arc<dyn SymbolLookupPort> = match &config.supabase {
        Some(settings) => Arc::new(
            SupabaseSymbolLookup::new(settings).context("failed to build symbol lookup client")?,
        ),
        None => {
            tracing::warn!("SUPABASE_URL not set, tickers map to themselves");
            Arc::new(IdentitySymbolLookup)
        }
    };
    let resolver = Arc::new(SymbolResolver::new(lookup, Arc::new(SymbolCache::new())));

    // Fan-out and feed
    let registry = Arc::new(SubscriptionRegistry::new());
    let fanout = Arc::new(QuoteFanOut::new(registry, resolver));
    let feed_state = Arc::new(FeedState::new());

    let (feed_tx, feed_rx) = mpsc::channel(FEED_EVENT_BUFFER);
    let feed_client: Arc<dyn FeedTransportPort> = Arc::new(BreezeFeedClient::new(
        BreezeClientConfig::from_settings(&config.breeze, &config.websocket),
        feed_tx,
        shutdown_token.clone(),
    ));

    let pump = tokio::spawn(pump_feed_events(
        feed_rx,
        Arc::clone(&fanout),
        Arc::clone(&feed_state),
    ));

    // Watchlist service
    let sessions = Arc::new(SessionStore::with_token(config.breeze.session_token.clone()));
    let watchlist = Arc::new(WatchlistService::new(
        Arc::clone(&feed_client),
        Arc::clone(&fanout),
        sessions,
        WatchlistConfig {
            poll_interval: config.watchlist.poll_interval,
        },
        shutdown_token.clone(),
    ));

    // Health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&feed_state),
        Arc::clone(&watchlist),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    let health = tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    // Client server
    let server_state = Arc::new(ServerState::new(
        Arc::clone(&watchlist),
        config.breeze.admin_key.clone(),
        config.watchlist.client_buffer,
        shutdown_token.clone(),
    ));
    let stream_server = StreamServer::new(config.server.port, server_state, shutdown_token.clone());
    let server = tokio::spawn(async move {
        if let Err(e) = stream_server.run().await {
            tracing::error!(error = %e, "Stream server error");
        }
    });

    tracing::info!("Stream proxy ready");

    let signal_name = shutdown_signal().await;
    tracing::info!(
        signal = signal_name,
        timeout_secs = DRAIN_TIMEOUT.as_secs(),
        "Draining watches"
    );
    shutdown_token.cancel();

    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        let _ = server.await;
        let _ = health.await;
        if let Err(e) = feed_client.disconnect().await {
            tracing::warn!(error = %e, "Feed disconnect failed during shutdown");
        }
    })
    .await;
    if drained.is_err() {
        tracing::warn!("Drain timed out, exiting anyway");
    }
    pump.abort();

    tracing::info!("Stream proxy stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &ProxyConfig) {
    tracing::info!(
        port = config.server.port,
        health_port = config.server.health_port,
        exchange = %config.breeze.exchange_code,
        session_preloaded = config.breeze.session_token.is_some(),
        admin_enabled = config.breeze.admin_key.is_some(),
        symbol_lookup = config.supabase.is_some(),
        poll_interval_secs = config.watchlist.poll_interval.as_secs(),
        "Configuration loaded"
    );
    tracing::debug!(feed_url = %config.breeze.feed_url, "Feed endpoint");
}

/// Load the first `.env` found walking up from the working directory.
fn load_dotenv() {
    let Ok(cwd) = std::env::current_dir() else {
        return;
    };
    if let Some(path) = cwd
        .ancestors()
        .map(|dir| dir.join(".env"))
        .find(|path| path.is_file())
    {
        let _ = dotenvy::from_path(&path);
    }
}

/// Resolve on Ctrl-C or SIGTERM, naming the signal received.
#[allow(clippy::expect_used)]
async fn shutdown_signal() -> &'static str {
    let interrupt = async {
        signal::ctrl_c()
            .await
            .expect("failed to listen for Ctrl-C");
        "SIGINT"
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
        "SIGTERM"
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<&'static str>();

    tokio::select! {
        name = interrupt => name,
        name = terminate => name,
    }
}
