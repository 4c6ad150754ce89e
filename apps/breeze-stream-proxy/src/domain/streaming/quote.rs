//! Canonical quote record sent to watchlist clients.

use serde::{Deserialize, Serialize};

/// A tick normalized into the fixed watchlist schema.
///
/// Serialized in camelCase; every numeric field is always present and
/// defaults to `0` when the feed did not supply it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedQuote {
    /// Canonical symbol resolved by the proxy.
    pub symbol: String,
    /// Last traded price.
    pub last_price: f64,
    /// Previous session close.
    pub previous_close: f64,
    /// Absolute change from previous close.
    pub change: f64,
    /// Percent change from previous close.
    pub change_percent: f64,
    /// Best bid price.
    pub best_bid_price: f64,
    /// Quantity at best bid.
    pub best_bid_quantity: f64,
    /// Best offer price.
    pub best_offer_price: f64,
    /// Quantity at best offer.
    pub best_offer_quantity: f64,
    /// Total traded volume.
    pub volume: f64,
    /// Session open.
    pub open: f64,
    /// Session high.
    pub high: f64,
    /// Session low.
    pub low: f64,
}
