//! JSON encoding for sync protocol frames.
//!
//! Frames are sent as WebSocket text messages. Decoding accepts raw bytes so
//! binary frames carrying the same JSON are handled identically.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::sync::{ClientIntent, ServerEvent};

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Frame is not valid UTF-8 JSON or does not match the protocol.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
}

fn encode<T: Serialize>(value: &T) -> Result<String, CodecError> {
    serde_json::to_string(value).map_err(|e| CodecError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    serde_json::from_slice(bytes).map_err(|e| CodecError::InvalidFrame(e.to_string()))
}

/// Encodes a [`ClientIntent`] into a JSON frame.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the intent cannot be serialized.
pub fn encode_intent(intent: &ClientIntent) -> Result<String, CodecError> {
    encode(intent)
}

/// Decodes a [`ClientIntent`] from a JSON frame.
///
/// # Errors
///
/// Returns `CodecError::InvalidFrame` for malformed JSON, unknown event
/// names, or payloads with unknown fields.
pub fn decode_intent(bytes: &[u8]) -> Result<ClientIntent, CodecError> {
    decode(bytes)
}

/// Encodes a [`ServerEvent`] into a JSON frame.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the event cannot be serialized.
pub fn encode_event(event: &ServerEvent) -> Result<String, CodecError> {
    encode(event)
}

/// Decodes a [`ServerEvent`] from a JSON frame.
///
/// # Errors
///
/// Returns `CodecError::InvalidFrame` if the bytes are not a valid event.
pub fn decode_event(bytes: &[u8]) -> Result<ServerEvent, CodecError> {
    decode(bytes)
}
