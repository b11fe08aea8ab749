//! # parley-protocol
//!
//! Wire protocol definitions for the Parley chat client.
//!
//! This crate defines the event envelope exchanged with the chat server,
//! the typed events for each direction, and the codecs used to put them on
//! the wire.
//!
//! ## Events
//!
//! - `new_message` / `message_deleted` - Conversation changes
//! - `user_joined` / `user_left` / `join_response` - Roster changes
//! - `user_typing` - Typing indicators
//! - `join` / `send_message` / `delete_message` / `typing` - Client requests
//!
//! ## Example
//!
//! ```rust
//! use parley_protocol::{codec, InboundEvent, OutboundEvent};
//!
//! let join = OutboundEvent::join("alice").into_raw();
//! let text = codec::encode_json(&join).unwrap();
//!
//! let raw = codec::decode_json(r#"{"event":"join_response","data":{"active_users":["alice"]}}"#).unwrap();
//! let event = InboundEvent::from_raw(&raw).unwrap();
//! # let _ = (text, event);
//! ```

pub mod codec;
pub mod events;
pub mod timestamp;

pub use codec::{Encoded, Encoding, EventCodec, ProtocolError};
pub use events::{EventKind, InboundEvent, MessagePayload, OutboundEvent, RawEvent};
