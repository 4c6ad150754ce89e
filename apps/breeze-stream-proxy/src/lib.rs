#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Breeze Stream Proxy - Watchlist Feed Multiplexer
//!
//! A WebSocket proxy that keeps one authenticated connection to the Breeze
//! push feed and fans normalized quotes out to many watchlist clients, each
//! holding its own subscription set.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure watchlist types and rules
//!   - `symbol`: Ticker normalization, index aliases, mapping cache
//!   - `streaming`: Raw ticks, normalized quotes, the normalizer
//!   - `subscription`: Per-client sets and the provider code registry
//!   - `lifecycle`: Watch state machine and per-symbol outcomes
//!   - `session`: The daily feed session token
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Symbol lookup and feed transport interfaces
//!   - `services`: Resolver, fan-out, watch lifecycle, feed state
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `breeze`: Push feed WebSocket client
//!   - `supabase`: Symbol-mapping table client
//!   - `server`: Client WebSocket and Breeze admin endpoints
//!   - `config`, `health`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//!                      subscribe / unsubscribe
//!   Breeze push feed ◄──────────────────────────── WatchlistService ◄── /ws client 1
//!          │                                              ▲          ◄── /ws client 2
//!          │ ticks                                        │ registry
//!          ▼                                              │
//!   pump_feed_events ──► QuoteFanOut ──► normalize ──► per-client channels
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core watchlist types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::lifecycle::{LifecycleState, OutcomeStatus, SubscribeReport, SymbolOutcome};
pub use domain::session::{SessionScope, SessionStore, SessionToken};
pub use domain::streaming::{NormalizedQuote, Tick, normalize};
pub use domain::subscription::{ClientId, SubscriptionRegistry, SubscriptionStats};
pub use domain::symbol::{IndexAliases, SymbolCache};

// Ports
pub use application::ports::{
    FeedError, FeedEvent, FeedTransportPort, IdentitySymbolLookup, LookupError, SessionError,
    SymbolLookupPort,
};

// Services
pub use application::services::{
    ClientHandle, ClientMessage, FeedState, QuoteFanOut, SymbolResolver, WatchError, WatchHandle,
    WatchReport, WatchRequest, WatchlistConfig, WatchlistService, pump_feed_events,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, ProxyConfig, ServerSettings, WebSocketSettings};

// Adapters
pub use infrastructure::breeze::{BreezeClientConfig, BreezeFeedClient};
pub use infrastructure::supabase::SupabaseSymbolLookup;

// Servers
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};
pub use infrastructure::server::{ServerError, ServerState, StreamServer};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
