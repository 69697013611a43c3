//! Payload codec for the WoT broker.
//!
//! Things send JSON when they can, but constrained devices often send bare
//! text. A body that parses as JSON is kept as that value; anything else
//! becomes a JSON string.

use crate::messages::ServerMessage;
use serde_json::Value;
use thiserror::Error;

/// Errors that can occur during message encoding/decoding.
#[derive(Debug, Error)]
pub enum CodecError {
    /// JSON serialization failed.
    #[error("Failed to serialize message: {0}")]
    SerializeError(#[from] serde_json::Error),
}

/// Decode a raw request body into a payload value.
pub fn decode_payload(body: &[u8]) -> Value {
    if let Ok(value) = serde_json::from_slice::<Value>(body) {
        return value;
    }
    Value::String(String::from_utf8_lossy(body).into_owned())
}

/// Decode a text frame into a payload value.
pub fn decode_text_payload(text: &str) -> Value {
    decode_payload(text.as_bytes())
}

/// Encode a payload value for forwarding upstream.
///
/// Strings are forwarded as their bare text so an upstream broker decodes
/// them to the same value.
pub fn encode_payload(value: &Value) -> Result<String, CodecError> {
    match value {
        Value::String(text) if serde_json::from_str::<Value>(text).is_err() => Ok(text.clone()),
        other => serde_json::to_string(other).map_err(CodecError::from),
    }
}

/// Encode a server message to a JSON string.
pub fn encode_server_message(msg: &ServerMessage) -> Result<String, CodecError> {
    serde_json::to_string(msg).map_err(CodecError::from)
}

/// Decode a server message, as a client would.
pub fn decode_server_message(text: &str) -> Result<ServerMessage, CodecError> {
    serde_json::from_str(text).map_err(CodecError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::ThingStatus;
    use wot_core::DataPayload;

    #[test]
    fn test_decode_json_body() {
        let value = decode_payload(br#"{"temperature":21.5}"#);
        assert_eq!(value["temperature"], 21.5);

        assert_eq!(decode_payload(b"42"), serde_json::json!(42));
    }

    #[test]
    fn test_decode_text_body() {
        assert_eq!(decode_payload(b"on"), Value::String("on".to_string()));
        assert_eq!(decode_text_payload("hello world"), serde_json::json!("hello world"));
        assert_eq!(decode_payload(b""), Value::String(String::new()));
    }

    #[test]
    fn test_encode_payload_keeps_text_bare() {
        assert_eq!(encode_payload(&serde_json::json!("on")).unwrap(), "on");
        assert_eq!(encode_payload(&serde_json::json!({"a": 1})).unwrap(), r#"{"a":1}"#);
        // "42" as a string must not turn into the number 42 upstream
        assert_eq!(encode_payload(&serde_json::json!("42")).unwrap(), r#""42""#);
    }

    #[test]
    fn test_encode_data_message() {
        let payload = DataPayload::new("abc-123", serde_json::json!({"temperature": 21.5}));
        let json = encode_server_message(&ServerMessage::Data(payload)).unwrap();

        assert!(json.contains("\"type\":\"data\""));
        assert!(json.contains("\"thingId\":\"abc-123\""));
        assert!(json.contains("\"temperature\":21.5"));
    }

    #[test]
    fn test_status_message() {
        let status = ThingStatus::unknown("lamp", 2);
        let json = encode_server_message(&ServerMessage::Status(status.clone())).unwrap();

        assert!(json.contains("\"type\":\"status\""));
        assert!(!json.contains("lastSeen"));

        match decode_server_message(&json).unwrap() {
            ServerMessage::Status(decoded) => assert_eq!(decoded, status),
            other => panic!("Expected Status, got {other:?}"),
        }
    }
}
