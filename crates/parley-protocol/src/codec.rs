//! Codec for encoding and decoding Parley event envelopes.
//!
//! Text frames carry JSON, binary frames carry MessagePack. Both encode the
//! same [`RawEvent`] structure.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::events::RawEvent;

/// Maximum encoded event size (1 MiB).
pub const MAX_EVENT_SIZE: usize = 1024 * 1024;

/// Protocol errors that can occur during encoding, decoding or interpretation.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Event exceeds maximum size.
    #[error("Event size {size} exceeds maximum {max}")]
    EventTooLarge { size: usize, max: usize },

    /// Event name is not part of the protocol.
    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    /// A client-to-server event arrived from the server.
    #[error("Event {0} is not valid in this direction")]
    WrongDirection(&'static str),

    /// Payload is missing required fields or has the wrong shape.
    #[error("Malformed {event} payload: {reason}")]
    Malformed {
        /// Event name.
        event: &'static str,
        /// What was wrong.
        reason: String,
    },

    /// JSON envelope error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Wire encoding for outbound events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// JSON text frames.
    #[default]
    Json,
    /// MessagePack binary frames.
    MessagePack,
}

/// An encoded event, ready to be written as a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Encoded {
    /// A text frame.
    Text(String),
    /// A binary frame.
    Binary(Bytes),
}

/// Encode an event as JSON text.
///
/// # Errors
///
/// Returns an error if the event is too large or serialization fails.
pub fn encode_json(event: &RawEvent) -> Result<String, ProtocolError> {
    let text = serde_json::to_string(event)?;
    if text.len() > MAX_EVENT_SIZE {
        return Err(ProtocolError::EventTooLarge {
            size: text.len(),
            max: MAX_EVENT_SIZE,
        });
    }
    Ok(text)
}

/// Decode an event from JSON text.
///
/// # Errors
///
/// Returns an error if the text is too large or not a valid envelope.
pub fn decode_json(text: &str) -> Result<RawEvent, ProtocolError> {
    if text.len() > MAX_EVENT_SIZE {
        return Err(ProtocolError::EventTooLarge {
            size: text.len(),
            max: MAX_EVENT_SIZE,
        });
    }
    Ok(serde_json::from_str(text)?)
}

/// Encode an event as MessagePack.
///
/// # Errors
///
/// Returns an error if the event is too large or encoding fails.
pub fn encode_msgpack(event: &RawEvent) -> Result<Bytes, ProtocolError> {
    let payload = rmp_serde::to_vec_named(event)?;
    if payload.len() > MAX_EVENT_SIZE {
        return Err(ProtocolError::EventTooLarge {
            size: payload.len(),
            max: MAX_EVENT_SIZE,
        });
    }
    Ok(Bytes::from(payload))
}

/// Decode an event from MessagePack.
///
/// # Errors
///
/// Returns an error if the data is too large or not a valid envelope.
pub fn decode_msgpack(data: &[u8]) -> Result<RawEvent, ProtocolError> {
    if data.len() > MAX_EVENT_SIZE {
        return Err(ProtocolError::EventTooLarge {
            size: data.len(),
            max: MAX_EVENT_SIZE,
        });
    }
    Ok(rmp_serde::from_slice(data)?)
}

/// Codec bound to one outbound encoding.
///
/// Decoding accepts both encodings regardless of the configured one.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventCodec {
    encoding: Encoding,
}

impl EventCodec {
    /// Create a codec for the given outbound encoding.
    #[must_use]
    pub fn new(encoding: Encoding) -> Self {
        Self { encoding }
    }

    /// The outbound encoding.
    #[must_use]
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Encode an event with the configured encoding.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode(&self, event: &RawEvent) -> Result<Encoded, ProtocolError> {
        match self.encoding {
            Encoding::Json => encode_json(event).map(Encoded::Text),
            Encoding::MessagePack => encode_msgpack(event).map(Encoded::Binary),
        }
    }

    /// Decode a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if decoding fails.
    pub fn decode_text(&self, text: &str) -> Result<RawEvent, ProtocolError> {
        decode_json(text)
    }

    /// Decode a binary frame.
    ///
    /// # Errors
    ///
    /// Returns an error if decoding fails.
    pub fn decode_binary(&self, data: &[u8]) -> Result<RawEvent, ProtocolError> {
        decode_msgpack(data)
    }
}
