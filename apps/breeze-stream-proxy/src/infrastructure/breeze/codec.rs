//! Push Bridge Codec
//!
//! JSON encoding and decoding for the Breeze push bridge. The bridge sends
//! either a single object or an array of objects per text frame; objects
//! are classified by their `type` field, and objects without one are ticks.

use serde_json::{Map, Value};

use super::messages::{BreezeCommand, BreezeMessage, ErrorMessage, SuccessMessage};
use crate::domain::streaming::Tick;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid message format.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

/// JSON codec for the push bridge.
#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Encode a command as a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self, command: &BreezeCommand) -> Result<String, CodecError> {
        Ok(serde_json::to_string(command)?)
    }

    /// Decode a text frame into messages.
    ///
    /// Array elements that are not objects are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not a JSON object or array.
    pub fn decode(&self, text: &str) -> Result<Vec<BreezeMessage>, CodecError> {
        let trimmed = text.trim();

        if !(trimmed.starts_with('[') || trimmed.starts_with('{')) {
            let preview: String = trimmed.chars().take(50).collect();
            return Err(CodecError::InvalidFormat(format!(
                "expected JSON array or object, got: {preview}..."
            )));
        }

        match serde_json::from_str::<Value>(trimmed)? {
            Value::Array(items) => {
                let mut messages = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::Object(map) => messages.push(Self::classify(map)?),
                        other => tracing::trace!(value = %other, "Skipping non-object element"),
                    }
                }
                Ok(messages)
            }
            Value::Object(map) => Ok(vec![Self::classify(map)?]),
            _ => Err(CodecError::InvalidFormat(
                "expected JSON array or object".to_string(),
            )),
        }
    }

    fn classify(mut map: Map<String, Value>) -> Result<BreezeMessage, CodecError> {
        let kind = map.get("type").and_then(Value::as_str).map(str::to_owned);

        match kind.as_deref() {
            Some("success") => {
                let m: SuccessMessage = serde_json::from_value(Value::Object(map))?;
                Ok(BreezeMessage::Success(m))
            }
            Some("error") => {
                let m: ErrorMessage = serde_json::from_value(Value::Object(map))?;
                Ok(BreezeMessage::Error(m))
            }
            None | Some("tick") => {
                map.remove("type");
                Ok(BreezeMessage::Tick(Tick::new(map)))
            }
            Some(other) => Ok(BreezeMessage::Other(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn decodes_single_tick_without_type() {
        let codec = JsonCodec::new();
        let messages = codec
            .decode(r#"{"stock_code":"RELIND","last":"2890.5"}"#)
            .unwrap();

        assert_eq!(messages.len(), 1);
        let BreezeMessage::Tick(tick) = &messages[0] else {
            panic!("expected tick");
        };
        assert_eq!(tick.routing_names().next(), Some("RELIND"));
    }

    #[test]
    fn decodes_typed_tick_and_strips_type() {
        let codec = JsonCodec::new();
        let messages = codec
            .decode(r#"{"type":"tick","symbol":"TCS","last":3500}"#)
            .unwrap();

        let BreezeMessage::Tick(tick) = &messages[0] else {
            panic!("expected tick");
        };
        assert!(tick.get("type").is_none());
        assert_eq!(tick.get("last"), Some(&json!(3500)));
    }

    #[test]
    fn decodes_array_and_skips_non_objects() {
        let codec = JsonCodec::new();
        let messages = codec
            .decode(r#"[{"stock_code":"A"}, 5, "x", {"stock_code":"B"}]"#)
            .unwrap();

        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|m| matches!(m, BreezeMessage::Tick(_))));
    }

    #[test]
    fn decodes_control_frames() {
        let codec = JsonCodec::new();

        let success = codec
            .decode(r#"{"type":"success","message":"authenticated"}"#)
            .unwrap();
        assert_eq!(
            success[0],
            BreezeMessage::Success(SuccessMessage {
                message: Some("authenticated".to_string())
            })
        );

        let error = codec
            .decode(r#"{"type":"error","code":401,"message":"invalid session"}"#)
            .unwrap();
        let BreezeMessage::Error(err) = &error[0] else {
            panic!("expected error");
        };
        assert_eq!(err.message, "invalid session");

        let other = codec.decode(r#"{"type":"heartbeat"}"#).unwrap();
        assert_eq!(other[0], BreezeMessage::Other("heartbeat".to_string()));
    }

    #[test]
    fn empty_array_is_empty() {
        assert!(JsonCodec::new().decode("[]").unwrap().is_empty());
    }

    #[test]
    fn rejects_non_json() {
        let codec = JsonCodec::new();
        assert!(matches!(
            codec.decode("hello"),
            Err(CodecError::InvalidFormat(_))
        ));
        assert!(matches!(codec.decode("{broken"), Err(CodecError::Json(_))));
    }

    #[test]
    fn encodes_command() {
        let text = JsonCodec::new()
            .encode(&BreezeCommand::unsubscribe("INFTEC", "NSE"))
            .unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["action"], "unsubscribe");
        assert_eq!(value["stock_code"], "INFTEC");
    }
}
