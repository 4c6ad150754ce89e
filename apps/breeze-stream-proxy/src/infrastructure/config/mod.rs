//! Configuration Module
//!
//! Configuration loading for the proxy service.

mod settings;

pub use settings::{
    BreezeSettings, ConfigError, DEFAULT_EXCHANGE_CODE, DEFAULT_FEED_URL, DEFAULT_SYMBOL_TABLE,
    ProxyConfig, Secret, ServerSettings, SupabaseSettings, WatchlistSettings, WebSocketSettings,
};
