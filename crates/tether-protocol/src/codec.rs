//! Codec for encoding and decoding Tether frames.
//!
//! Every transport frame is a single JSON object in a text message.

use serde_json::Value;
use thiserror::Error;

use crate::envelope::{Envelope, Inbound};

/// Maximum frame size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// The keepalive probe frame: an empty object.
pub const KEEPALIVE_FRAME: &str = "{}";

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame decoded to something other than a JSON object.
    #[error("Invalid frame: expected a JSON object, got {0}")]
    NotAnObject(&'static str),
}

/// Encode an envelope to a text frame.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode(envelope: &Envelope) -> Result<String, ProtocolError> {
    let text = serde_json::to_string(envelope)?;

    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }

    Ok(text)
}

/// Decode a text frame.
///
/// # Errors
///
/// Returns an error if the frame is too large, is not valid JSON, or is not
/// a JSON object.
pub fn decode(text: &str) -> Result<Inbound, ProtocolError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }

    match serde_json::from_str::<Value>(text)? {
        Value::Object(body) => Ok(Inbound::new(body)),
        Value::Array(_) => Err(ProtocolError::NotAnObject("array")),
        Value::String(_) => Err(ProtocolError::NotAnObject("string")),
        Value::Number(_) => Err(ProtocolError::NotAnObject("number")),
        Value::Bool(_) => Err(ProtocolError::NotAnObject("bool")),
        Value::Null => Err(ProtocolError::NotAnObject("null")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Command, Op, ReplyKey};
    use crate::envelope::Params;

    #[test]
    fn test_encode_omits_absent_fields() {
        let envelope = Envelope::new(Command::Room, "alice", "app")
            .with_op(Some(Op::Leave))
            .with_params(Params::new().with_room_id("lobby"));

        let text = encode(&envelope).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        let obj = value.as_object().unwrap();
        assert_eq!(obj.len(), 5);
        assert_eq!(obj["roomId"], "lobby");
    }

    #[test]
    fn test_decode_reply() {
        let inbound = decode(r#"{"cmd":"room","op":"joined","roomId":"lobby"}"#).unwrap();
        assert_eq!(
            inbound.key(),
            &ReplyKey::Known(Command::Room, Some(Op::Joined))
        );
        assert_eq!(inbound.str_field("roomId"), Some("lobby"));
    }

    #[test]
    fn test_decode_keepalive() {
        let inbound = decode(KEEPALIVE_FRAME).unwrap();
        assert_eq!(inbound.key(), &ReplyKey::Empty);
    }

    #[test]
    fn test_decode_malformed() {
        assert!(matches!(decode("{not json"), Err(ProtocolError::Json(_))));
        assert!(matches!(
            decode("[1,2]"),
            Err(ProtocolError::NotAnObject("array"))
        ));
    }

    #[test]
    fn test_frame_too_large() {
        let envelope = Envelope::new(Command::Direct, "a", "b")
            .with_params(Params::new().with_msg("x".repeat(MAX_FRAME_SIZE)));

        match encode(&envelope) {
            Err(ProtocolError::FrameTooLarge(_)) => {}
            other => panic!("Expected FrameTooLarge error, got {:?}", other),
        }
    }
}
