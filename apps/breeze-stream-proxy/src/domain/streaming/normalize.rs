//! Tick Normalization
//!
//! Maps heterogeneous feed ticks onto [`NormalizedQuote`]. Each output field
//! is read from a list of known aliases (first parseable alias wins) and
//! defaults to zero. Arithmetic runs in [`Decimal`] so that derived values
//! such as `100.1 - 100.0` come out exact before conversion to `f64`.
//!
//! Normalization is pure and total: malformed input never panics.

use std::str::FromStr;

use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use serde_json::Value;

use super::quote::NormalizedQuote;
use super::tick::Tick;

// =============================================================================
// Field Aliases
// =============================================================================

const LAST_PRICE: &[&str] = &["last", "ltp", "last_traded_price", "lastPrice"];
const PREVIOUS_CLOSE: &[&str] = &["previous_close", "close", "prev_close", "previousClose"];
const CHANGE: &[&str] = &["change", "points_change"];
const CHANGE_PERCENT: &[&str] = &[
    "ltp_percent_change",
    "chng_per",
    "percent_change",
    "changePercent",
];
const BEST_BID_PRICE: &[&str] = &["best_bid_price", "bPrice", "bid_price", "bestBidPrice"];
const BEST_BID_QUANTITY: &[&str] = &["best_bid_quantity", "bQty", "bid_qty", "bestBidQuantity"];
const BEST_OFFER_PRICE: &[&str] = &[
    "best_offer_price",
    "sPrice",
    "offer_price",
    "ask_price",
    "bestOfferPrice",
];
const BEST_OFFER_QUANTITY: &[&str] = &[
    "best_offer_quantity",
    "sQty",
    "offer_qty",
    "ask_qty",
    "bestOfferQuantity",
];
const VOLUME: &[&str] = &["total_volume", "volume", "ttq", "total_quantity_traded"];
const OPEN: &[&str] = &["open"];
const HIGH: &[&str] = &["high"];
const LOW: &[&str] = &["low"];

// =============================================================================
// Normalizer
// =============================================================================

/// Normalize a raw tick into the canonical quote schema.
///
/// The output is always stamped with `resolved_symbol`; any instrument name
/// embedded in the tick is ignored.
#[must_use]
pub fn normalize(tick: &Tick, resolved_symbol: &str) -> NormalizedQuote {
    let last = first_decimal(tick, LAST_PRICE);
    let explicit_change = first_decimal(tick, CHANGE);

    let previous_close = first_decimal(tick, PREVIOUS_CLOSE)
        .or_else(|| match (last, explicit_change) {
            (Some(last), Some(change)) => last.checked_sub(change),
            _ => None,
        })
        .unwrap_or(Decimal::ZERO);

    let last = last.unwrap_or(Decimal::ZERO);

    let change = explicit_change
        .or_else(|| last.checked_sub(previous_close))
        .unwrap_or(Decimal::ZERO);

    let change_percent = first_decimal(tick, CHANGE_PERCENT)
        .unwrap_or_else(|| percent_of(change, previous_close));

    NormalizedQuote {
        symbol: resolved_symbol.to_string(),
        last_price: to_f64(last),
        previous_close: to_f64(previous_close),
        change: to_f64(change),
        change_percent: to_f64(change_percent),
        best_bid_price: field_f64(tick, BEST_BID_PRICE),
        best_bid_quantity: field_f64(tick, BEST_BID_QUANTITY),
        best_offer_price: field_f64(tick, BEST_OFFER_PRICE),
        best_offer_quantity: field_f64(tick, BEST_OFFER_QUANTITY),
        volume: field_f64(tick, VOLUME),
        open: field_f64(tick, OPEN),
        high: field_f64(tick, HIGH),
        low: field_f64(tick, LOW),
    }
}

/// Parse a JSON value as a decimal number.
///
/// Accepts JSON numbers and numeric strings (surrounding whitespace,
/// thousands separators and scientific notation are tolerated). Returns
/// `None` for everything else, including values outside `Decimal` range.
#[must_use]
pub fn parse_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(number) => parse_numeric_str(&number.to_string()),
        Value::String(text) => parse_numeric_str(text),
        _ => None,
    }
}

fn parse_numeric_str(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw.trim().chars().filter(|c| *c != ',').collect();
    if cleaned.is_empty() {
        return None;
    }

    Decimal::from_str(&cleaned).ok().or_else(|| {
        cleaned
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .and_then(Decimal::from_f64)
    })
}

fn first_decimal(tick: &Tick, aliases: &[&str]) -> Option<Decimal> {
    aliases
        .iter()
        .filter_map(|key| tick.get(key))
        .find_map(parse_decimal)
}

fn field_f64(tick: &Tick, aliases: &[&str]) -> f64 {
    first_decimal(tick, aliases).map_or(0.0, to_f64)
}

fn percent_of(change: Decimal, base: Decimal) -> Decimal {
    if base.is_zero() {
        return Decimal::ZERO;
    }

    change
        .checked_div(base)
        .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
        .unwrap_or(Decimal::ZERO)
}

fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

// =============================================================================
// Tests
// =============================================================================
