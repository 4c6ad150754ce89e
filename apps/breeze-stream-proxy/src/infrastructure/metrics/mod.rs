//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Ticks**: Counts of feed ticks received and discarded
//! - **Quotes**: Quotes delivered to and dropped for watchlist clients
//! - **Subscriptions**: Upstream subscription and client gauges, failures
//! - **Feed**: Reconnects, session errors and symbol lookups
//! - **Latency**: Tick dispatch latency
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Tick counters
    describe_counter!(
        "breeze_proxy_ticks_received_total",
        "Total ticks received from the Breeze feed"
    );
    describe_counter!(
        "breeze_proxy_ticks_discarded_total",
        "Total ticks discarded as malformed or unrouted"
    );

    // Quote counters
    describe_counter!(
        "breeze_proxy_quotes_delivered_total",
        "Total normalized quotes queued to watchlist clients"
    );
    describe_counter!(
        "breeze_proxy_quotes_dropped_total",
        "Total quotes dropped due to slow clients"
    );

    // Connection and subscription gauges
    describe_gauge!(
        "breeze_proxy_clients",
        "Number of attached watchlist clients"
    );
    describe_gauge!(
        "breeze_proxy_upstream_subscriptions",
        "Number of provider codes subscribed on the feed"
    );

    // Error counters
    describe_counter!(
        "breeze_proxy_subscribe_failures_total",
        "Total failed upstream subscribe attempts"
    );
    describe_counter!(
        "breeze_proxy_unsubscribe_failures_total",
        "Total failed upstream unsubscribe attempts"
    );
    describe_counter!(
        "breeze_proxy_session_errors_total",
        "Total watches rejected for a missing or invalid session"
    );
    describe_counter!(
        "breeze_proxy_symbol_lookups_total",
        "Total symbol lookups by result"
    );
    describe_counter!(
        "breeze_proxy_reconnects_total",
        "Total feed reconnection attempts"
    );

    // Latency histograms
    describe_histogram!(
        "breeze_proxy_tick_dispatch_seconds",
        "Time to normalize and fan out one tick"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric labels for symbol lookup results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupResult {
    /// Served from the in-process cache.
    CacheHit,
    /// Lookup returned a provider code.
    Found,
    /// Lookup returned nothing.
    Missing,
    /// Lookup failed.
    Error,
}

impl LookupResult {
    const fn as_str(self) -> &'static str {
        match self {
            Self::CacheHit => "cache_hit",
            Self::Found => "found",
            Self::Missing => "missing",
            Self::Error => "error",
        }
    }
}

/// Record a tick received from the feed.
pub fn record_tick_received() {
    counter!("breeze_proxy_ticks_received_total").increment(1);
}

/// Record a tick discarded before fan-out.
pub fn record_tick_discarded(reason: &'static str) {
    counter!("breeze_proxy_ticks_discarded_total", "reason" => reason).increment(1);
}

/// Record quotes queued to clients.
pub fn record_quotes_delivered(count: u64) {
    counter!("breeze_proxy_quotes_delivered_total").increment(count);
}

/// Record quotes dropped due to slow clients.
pub fn record_quotes_dropped(count: u64) {
    counter!("breeze_proxy_quotes_dropped_total").increment(count);
}

/// Update the attached client count.
#[allow(clippy::cast_precision_loss)]
pub fn set_clients(count: usize) {
    gauge!("breeze_proxy_clients").set(count as f64);
}

/// Update the upstream subscription count.
#[allow(clippy::cast_precision_loss)]
pub fn set_upstream_subscriptions(count: usize) {
    gauge!("breeze_proxy_upstream_subscriptions").set(count as f64);
}

/// Record a failed upstream subscribe.
pub fn record_subscribe_failure() {
    counter!("breeze_proxy_subscribe_failures_total").increment(1);
}

/// Record a failed upstream unsubscribe.
pub fn record_unsubscribe_failure() {
    counter!("breeze_proxy_unsubscribe_failures_total").increment(1);
}

/// Record a watch rejected for its session.
pub fn record_session_error() {
    counter!("breeze_proxy_session_errors_total").increment(1);
}

/// Record a symbol lookup.
pub fn record_symbol_lookup(result: LookupResult) {
    counter!(
        "breeze_proxy_symbol_lookups_total",
        "result" => result.as_str()
    )
    .increment(1);
}

/// Record a feed reconnection attempt.
pub fn record_reconnect() {
    counter!("breeze_proxy_reconnects_total").increment(1);
}

/// Record tick dispatch duration.
pub fn record_dispatch_duration(duration: Duration) {
    histogram!("breeze_proxy_tick_dispatch_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_result_as_str() {
        assert_eq!(LookupResult::CacheHit.as_str(), "cache_hit");
        assert_eq!(LookupResult::Found.as_str(), "found");
        assert_eq!(LookupResult::Missing.as_str(), "missing");
        assert_eq!(LookupResult::Error.as_str(), "error");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_tick_received();
        record_quotes_dropped(3);
        set_clients(2);
        record_dispatch_duration(Duration::from_millis(1));
    }
}
