//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `SymbolResolver`: Maps client tickers to provider codes
//! - `QuoteFanOut`: Routes feed ticks to interested clients
//! - `WatchlistService`: Runs each client's watch lifecycle
//! - `FeedState`: Tracks the shared feed connection for health checks

mod fanout;
mod feed_state;
mod resolver;
mod watchlist;

pub use fanout::{
    ClientHandle, ClientMessage, Delivery, DispatchOutcome, QuoteFanOut, pump_feed_events,
};
pub use feed_state::{ConnectionState, FeedState, FeedStatus};
pub use resolver::{Resolution, ResolveError, SymbolResolver};
pub use watchlist::{
    DEFAULT_POLL_INTERVAL, WatchError, WatchHandle, WatchReport, WatchRequest, WatchlistConfig,
    WatchlistService,
};
