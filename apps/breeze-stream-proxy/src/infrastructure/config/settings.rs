//! Proxy Configuration Settings
//!
//! Configuration types for the stream proxy, loaded from environment variables.

use std::time::Duration;

use crate::domain::session::SessionToken;

/// Default Breeze push-feed endpoint.
pub const DEFAULT_FEED_URL: &str = "wss://livestream.icicidirect.com/breeze";

/// Default exchange code sent with subscribe frames.
pub const DEFAULT_EXCHANGE_CODE: &str = "NSE";

/// Default symbol-mapping table.
pub const DEFAULT_SYMBOL_TABLE: &str = "nse_master_list";

/// A secret string. `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    /// Wrap a value.
    #[must_use]
    pub const fn new(value: String) -> Self {
        Self(value)
    }

    /// Get the raw value.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Breeze feed settings.
#[derive(Debug, Clone)]
pub struct BreezeSettings {
    /// Application API key.
    pub api_key: Secret,
    /// Push-feed WebSocket URL.
    pub feed_url: String,
    /// Exchange code for subscriptions.
    pub exchange_code: String,
    /// Daily session token known at startup.
    pub session_token: Option<SessionToken>,
    /// Key required by the admin session endpoint.
    pub admin_key: Option<Secret>,
}

/// Supabase symbol-mapping settings.
#[derive(Debug, Clone)]
pub struct SupabaseSettings {
    /// Project URL.
    pub url: String,
    /// Service role key.
    pub service_key: Secret,
    /// Mapping table name.
    pub table: String,
    /// Request timeout.
    pub timeout: Duration,
}

/// Watchlist behaviour settings.
#[derive(Debug, Clone, Copy)]
pub struct WatchlistSettings {
    /// Interval between client liveness checks.
    pub poll_interval: Duration,
    /// Per-client outbound channel capacity.
    pub client_buffer: usize,
}

impl Default for WatchlistSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            client_buffer: 256,
        }
    }
}

/// Feed WebSocket connection settings.
#[derive(Debug, Clone)]
pub struct WebSocketSettings {
    /// Time allowed for connect plus authentication.
    pub auth_timeout: Duration,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            auth_timeout: Duration::from_secs(10),
            reconnect_delay_initial: Duration::from_millis(500),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            max_reconnect_attempts: 0, // Unlimited
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Client WebSocket and Breeze HTTP port.
    pub port: u16,
    /// Health check and metrics HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: 8081,
            health_port: 8082,
        }
    }
}

/// Complete proxy configuration.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Breeze feed settings.
    pub breeze: BreezeSettings,
    /// Symbol-mapping settings; `None` uses identity mapping.
    pub supabase: Option<SupabaseSettings>,
    /// Watchlist behaviour.
    pub watchlist: WatchlistSettings,
    /// Server port settings.
    pub server: ServerSettings,
    /// Feed WebSocket connection settings.
    pub websocket: WebSocketSettings,
}

impl ProxyConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if required values are missing or empty.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);

        let breeze = BreezeSettings {
            api_key: Secret::new(env.required("BREEZE_API_KEY")?),
            feed_url: env.string("BREEZE_FEED_URL", DEFAULT_FEED_URL),
            exchange_code: env.string("BREEZE_EXCHANGE_CODE", DEFAULT_EXCHANGE_CODE),
            session_token: env
                .optional("BREEZE_SESSION_TOKEN")
                .and_then(|raw| SessionToken::new(&raw)),
            admin_key: env.optional("BREEZE_PROXY_ADMIN_KEY").map(Secret::new),
        };

        let supabase = match env.optional("SUPABASE_URL") {
            Some(url) => Some(SupabaseSettings {
                url: url.trim_end_matches('/').to_string(),
                service_key: Secret::new(env.required("SUPABASE_SERVICE_ROLE_KEY")?),
                table: env.string("SUPABASE_SYMBOL_TABLE", DEFAULT_SYMBOL_TABLE),
                timeout: env.secs("SUPABASE_TIMEOUT_SECS", Duration::from_secs(10)),
            }),
            None => None,
        };

        let watchlist_defaults = WatchlistSettings::default();
        let watchlist = WatchlistSettings {
            poll_interval: env.secs(
                "WATCHLIST_POLL_INTERVAL_SECS",
                watchlist_defaults.poll_interval,
            ),
            client_buffer: env
                .parse("WATCHLIST_CLIENT_BUFFER", watchlist_defaults.client_buffer)
                .max(1),
        };

        let server = ServerSettings {
            port: env.parse("STREAM_PROXY_PORT", ServerSettings::default().port),
            health_port: env.parse(
                "STREAM_PROXY_HEALTH_PORT",
                ServerSettings::default().health_port,
            ),
        };

        let ws_defaults = WebSocketSettings::default();
        let websocket = WebSocketSettings {
            auth_timeout: env.secs("STREAM_PROXY_FEED_AUTH_TIMEOUT_SECS", ws_defaults.auth_timeout),
            reconnect_delay_initial: env.millis(
                "STREAM_PROXY_RECONNECT_DELAY_INITIAL_MS",
                ws_defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: env.secs(
                "STREAM_PROXY_RECONNECT_DELAY_MAX_SECS",
                ws_defaults.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: env.parse(
                "STREAM_PROXY_RECONNECT_DELAY_MULTIPLIER",
                ws_defaults.reconnect_delay_multiplier,
            ),
            max_reconnect_attempts: env.parse(
                "STREAM_PROXY_MAX_RECONNECT_ATTEMPTS",
                ws_defaults.max_reconnect_attempts,
            ),
        };

        Ok(Self {
            breeze,
            supabase,
            watchlist,
            server,
            websocket,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

struct Env<'a, F>(&'a F);

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        let value = (self.0)(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))?;
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(ConfigError::EmptyValue(key.to_string()));
        }
        Ok(trimmed.to_string())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.optional(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    fn secs(&self, key: &str, default: Duration) -> Duration {
        self.optional(key)
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map_or(default, Duration::from_secs)
    }

    fn millis(&self, key: &str, default: Duration) -> Duration {
        self.optional(key)
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }
}
