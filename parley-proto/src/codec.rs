//! Serialization and deserialization for the Parley wire protocol.
//!
//! Provides postcard encode/decode functions for [`ClientIntent`] and
//! [`ServerEvent`]. WebSocket frames preserve message boundaries, so no
//! length-prefix framing is needed.

use crate::event::{ClientIntent, ServerEvent};

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Encodes a [`ClientIntent`] into a byte vector using postcard.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the intent cannot be serialized.
pub fn encode_intent(intent: &ClientIntent) -> Result<Vec<u8>, CodecError> {
    postcard::to_allocvec(intent).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a [`ClientIntent`] from a byte slice using postcard.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the bytes cannot be deserialized.
pub fn decode_intent(bytes: &[u8]) -> Result<ClientIntent, CodecError> {
    postcard::from_bytes(bytes).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Encodes a [`ServerEvent`] into a byte vector using postcard.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the event cannot be serialized.
pub fn encode_event(event: &ServerEvent) -> Result<Vec<u8>, CodecError> {
    postcard::to_allocvec(event).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a [`ServerEvent`] from a byte slice using postcard.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the bytes cannot be deserialized.
pub fn decode_event(bytes: &[u8]) -> Result<ServerEvent, CodecError> {
    postcard::from_bytes(bytes).map_err(|e| CodecError::Serialization(e.to_string()))
}
