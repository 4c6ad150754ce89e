//! Raw Feed Ticks
//!
//! A tick is whatever JSON object the push feed delivers. Field names and
//! value types vary between feed and REST origins, so the tick is kept as an
//! untyped map and interpreted by the normalizer.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Keys that may carry a provider-side instrument name, in priority order.
const ROUTING_KEYS: &[&str] = &["stock_code", "symbol", "stock_name"];

/// One raw price-update event from the push feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tick(Map<String, Value>);

impl Tick {
    /// Wrap a JSON object.
    #[must_use]
    pub const fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Build a tick from an arbitrary JSON value.
    ///
    /// Returns `None` unless the value is an object.
    #[must_use]
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self(fields)),
            _ => None,
        }
    }

    /// Look up a raw field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// All raw fields.
    #[must_use]
    pub const fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Provider-side instrument names embedded in the tick, in priority
    /// order, blanks skipped.
    ///
    /// A feed may put a provider-internal token (`4.1!2885`) in one field
    /// and the readable name in another, so callers try each candidate
    /// through the symbol resolver until one is subscribed.
    pub fn routing_names(&self) -> impl Iterator<Item = &str> {
        ROUTING_KEYS
            .iter()
            .filter_map(|key| self.0.get(*key))
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}

impl From<Map<String, Value>> for Tick {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn from_value_accepts_objects_only() {
        assert!(Tick::from_value(json!({"last": 1})).is_some());
        assert!(Tick::from_value(json!([1, 2])).is_none());
        assert!(Tick::from_value(json!("tick")).is_none());
        assert!(Tick::from_value(json!(null)).is_none());
    }

    #[test]
    fn routing_names_follow_key_priority() {
        let tick = Tick::from_value(json!({
            "stock_name": "RELIANCE INDUSTRIES",
            "symbol": "4.1!2885",
            "stock_code": "RELIND",
        }))
        .unwrap();

        assert_eq!(
            tick.routing_names().collect::<Vec<_>>(),
            vec!["RELIND", "4.1!2885", "RELIANCE INDUSTRIES"]
        );
    }

    #[test]
    fn routing_names_skip_blank_and_non_string_values() {
        let tick = Tick::from_value(json!({
            "stock_code": "  ",
            "symbol": 2885,
            "stock_name": " NIFTY 50 ",
        }))
        .unwrap();

        assert_eq!(tick.routing_names().collect::<Vec<_>>(), vec!["NIFTY 50"]);
    }

    #[test]
    fn routing_names_missing() {
        let tick = Tick::from_value(json!({"last": "101.5"})).unwrap();
        assert_eq!(tick.routing_names().next(), None);
    }

    #[test]
    fn deserializes_transparently() {
        let tick: Tick = serde_json::from_str(r#"{"ltp": 10.5, "stock_code": "TCS"}"#).unwrap();
        assert_eq!(tick.get("ltp"), Some(&json!(10.5)));
        assert_eq!(tick.fields().len(), 2);
    }
}
