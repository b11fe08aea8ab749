//! Event types for the Parley protocol.
//!
//! Every event travels in an envelope of the form
//! `{"event": "<name>", "data": {...}}`. [`RawEvent`] is that envelope with an
//! untyped payload; [`InboundEvent`] and [`OutboundEvent`] are the typed views
//! for each direction.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

use crate::codec::ProtocolError;
use crate::timestamp;

/// Event name identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    NewMessage,
    MessageDeleted,
    UserJoined,
    UserLeft,
    UserTyping,
    JoinResponse,
    ConnectionResponse,
    ServerError,
    Join,
    SendMessage,
    DeleteMessage,
    Typing,
}

impl EventKind {
    /// The event name as it appears on the wire.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::NewMessage => "new_message",
            EventKind::MessageDeleted => "message_deleted",
            EventKind::UserJoined => "user_joined",
            EventKind::UserLeft => "user_left",
            EventKind::UserTyping => "user_typing",
            EventKind::JoinResponse => "join_response",
            EventKind::ConnectionResponse => "connection_response",
            EventKind::ServerError => "error",
            EventKind::Join => "join",
            EventKind::SendMessage => "send_message",
            EventKind::DeleteMessage => "delete_message",
            EventKind::Typing => "typing",
        }
    }

    /// Whether the server sends this event to clients.
    #[must_use]
    pub fn is_inbound(self) -> bool {
        !matches!(
            self,
            EventKind::Join | EventKind::SendMessage | EventKind::DeleteMessage | EventKind::Typing
        )
    }
}

impl TryFrom<&str> for EventKind {
    type Error = &'static str;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "new_message" => Ok(EventKind::NewMessage),
            "message_deleted" => Ok(EventKind::MessageDeleted),
            "user_joined" => Ok(EventKind::UserJoined),
            "user_left" => Ok(EventKind::UserLeft),
            "user_typing" => Ok(EventKind::UserTyping),
            "join_response" => Ok(EventKind::JoinResponse),
            "connection_response" => Ok(EventKind::ConnectionResponse),
            "error" => Ok(EventKind::ServerError),
            "join" => Ok(EventKind::Join),
            "send_message" => Ok(EventKind::SendMessage),
            "delete_message" => Ok(EventKind::DeleteMessage),
            "typing" => Ok(EventKind::Typing),
            _ => Err("Unknown event name"),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event envelope with an untyped payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Event name.
    pub event: String,
    /// Event payload.
    #[serde(default)]
    pub data: Value,
}

impl RawEvent {
    /// Create a new envelope.
    #[must_use]
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Get the event kind, if the name is known.
    #[must_use]
    pub fn kind(&self) -> Option<EventKind> {
        EventKind::try_from(self.event.as_str()).ok()
    }
}

/// A chat message as the server describes it.
///
/// Accepts both the canonical field names and the ones used by the
/// reference server (`_id`, `username`, `message`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
    /// Server-assigned message id.
    #[serde(alias = "_id")]
    pub id: String,
    /// Author display name.
    #[serde(alias = "username")]
    pub author: String,
    /// Message text.
    #[serde(alias = "message")]
    pub body: String,
    /// Server timestamp.
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
    /// Optional message type; `"system"` marks a system message.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl MessagePayload {
    /// Check the fields the wire format cannot express as required.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.id.trim().is_empty() {
            return Err("message id cannot be empty");
        }
        if self.author.trim().is_empty() {
            return Err("message author cannot be empty");
        }
        if self.body.trim().is_empty() {
            return Err("message body cannot be empty");
        }
        Ok(())
    }

    /// Whether the server marked this as a system message.
    #[must_use]
    pub fn is_system(&self) -> bool {
        self.kind.as_deref() == Some("system")
    }
}

#[derive(Deserialize)]
struct DeletedPayload {
    message_id: String,
}

#[derive(Deserialize)]
struct PresencePayload {
    username: String,
    #[serde(default)]
    active_users: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct TypingPayload {
    username: String,
    #[serde(rename = "isTyping")]
    is_typing: bool,
}

#[derive(Deserialize)]
struct JoinResponsePayload {
    #[serde(default)]
    active_users: Vec<String>,
}

#[derive(Deserialize)]
struct ServerErrorPayload {
    #[serde(default)]
    message: String,
}

/// A typed server-to-client event.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// A message was posted.
    NewMessage(MessagePayload),
    /// A message was deleted.
    MessageDeleted {
        /// Id of the deleted message.
        message_id: String,
    },
    /// A participant joined.
    UserJoined {
        /// Who joined.
        username: String,
        /// Full roster after the join, when the server supplies it.
        active_users: Option<Vec<String>>,
    },
    /// A participant left.
    UserLeft {
        /// Who left.
        username: String,
        /// Full roster after the departure, when the server supplies it.
        active_users: Option<Vec<String>>,
    },
    /// A participant started or stopped typing.
    UserTyping {
        /// Who is typing.
        username: String,
        /// Typing state.
        is_typing: bool,
    },
    /// Reply to our own `join`.
    JoinResponse {
        /// Roster at the time of the join.
        active_users: Vec<String>,
    },
    /// Transport-level greeting.
    ConnectionResponse,
    /// Server-side failure report.
    ServerError {
        /// Human-readable description.
        message: String,
    },
}

impl InboundEvent {
    /// Interpret an envelope as an inbound event.
    ///
    /// # Errors
    ///
    /// Returns an error if the event name is unknown, names a client-to-server
    /// event, or the payload is missing required fields.
    pub fn from_raw(raw: &RawEvent) -> Result<Self, ProtocolError> {
        let kind = raw
            .kind()
            .ok_or_else(|| ProtocolError::UnknownEvent(raw.event.clone()))?;

        let event = match kind {
            EventKind::NewMessage => {
                let message: MessagePayload = payload(kind, &raw.data)?;
                message.validate().map_err(|reason| ProtocolError::Malformed {
                    event: kind.as_str(),
                    reason: reason.to_string(),
                })?;
                InboundEvent::NewMessage(message)
            }
            EventKind::MessageDeleted => {
                let p: DeletedPayload = payload(kind, &raw.data)?;
                InboundEvent::MessageDeleted {
                    message_id: p.message_id,
                }
            }
            EventKind::UserJoined => {
                let p: PresencePayload = payload(kind, &raw.data)?;
                InboundEvent::UserJoined {
                    username: p.username,
                    active_users: p.active_users,
                }
            }
            EventKind::UserLeft => {
                let p: PresencePayload = payload(kind, &raw.data)?;
                InboundEvent::UserLeft {
                    username: p.username,
                    active_users: p.active_users,
                }
            }
            EventKind::UserTyping => {
                let p: TypingPayload = payload(kind, &raw.data)?;
                InboundEvent::UserTyping {
                    username: p.username,
                    is_typing: p.is_typing,
                }
            }
            EventKind::JoinResponse => {
                let p: JoinResponsePayload = payload(kind, &raw.data)?;
                InboundEvent::JoinResponse {
                    active_users: p.active_users,
                }
            }
            EventKind::ConnectionResponse => InboundEvent::ConnectionResponse,
            EventKind::ServerError => {
                let p: ServerErrorPayload = payload(kind, &raw.data)?;
                InboundEvent::ServerError { message: p.message }
            }
            EventKind::Join
            | EventKind::SendMessage
            | EventKind::DeleteMessage
            | EventKind::Typing => return Err(ProtocolError::WrongDirection(kind.as_str())),
        };

        Ok(event)
    }

    /// Get the event kind.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            InboundEvent::NewMessage(_) => EventKind::NewMessage,
            InboundEvent::MessageDeleted { .. } => EventKind::MessageDeleted,
            InboundEvent::UserJoined { .. } => EventKind::UserJoined,
            InboundEvent::UserLeft { .. } => EventKind::UserLeft,
            InboundEvent::UserTyping { .. } => EventKind::UserTyping,
            InboundEvent::JoinResponse { .. } => EventKind::JoinResponse,
            InboundEvent::ConnectionResponse => EventKind::ConnectionResponse,
            InboundEvent::ServerError { .. } => EventKind::ServerError,
        }
    }
}

fn payload<T: DeserializeOwned>(kind: EventKind, data: &Value) -> Result<T, ProtocolError> {
    T::deserialize(data).map_err(|e| ProtocolError::Malformed {
        event: kind.as_str(),
        reason: e.to_string(),
    })
}

/// A typed client-to-server event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundEvent {
    /// Announce ourselves to the roster.
    Join {
        /// Our display name.
        username: String,
    },
    /// Post a message.
    SendMessage {
        /// Our display name.
        username: String,
        /// Message text.
        message: String,
    },
    /// Ask the server to delete one of our messages.
    DeleteMessage {
        /// Id of the message to delete.
        message_id: String,
    },
    /// Typing indicator.
    Typing {
        /// Our display name.
        username: String,
        /// Typing state.
        is_typing: bool,
    },
}

impl OutboundEvent {
    /// Create a Join event.
    #[must_use]
    pub fn join(username: impl Into<String>) -> Self {
        OutboundEvent::Join {
            username: username.into(),
        }
    }

    /// Create a SendMessage event.
    #[must_use]
    pub fn send_message(username: impl Into<String>, message: impl Into<String>) -> Self {
        OutboundEvent::SendMessage {
            username: username.into(),
            message: message.into(),
        }
    }

    /// Create a DeleteMessage event.
    #[must_use]
    pub fn delete_message(message_id: impl Into<String>) -> Self {
        OutboundEvent::DeleteMessage {
            message_id: message_id.into(),
        }
    }

    /// Create a Typing event.
    #[must_use]
    pub fn typing(username: impl Into<String>, is_typing: bool) -> Self {
        OutboundEvent::Typing {
            username: username.into(),
            is_typing,
        }
    }

    /// Get the event kind.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            OutboundEvent::Join { .. } => EventKind::Join,
            OutboundEvent::SendMessage { .. } => EventKind::SendMessage,
            OutboundEvent::DeleteMessage { .. } => EventKind::DeleteMessage,
            OutboundEvent::Typing { .. } => EventKind::Typing,
        }
    }

    /// Wrap the event in its wire envelope.
    #[must_use]
    pub fn into_raw(self) -> RawEvent {
        let kind = self.kind();
        let data = match self {
            OutboundEvent::Join { username } => json!({ "username": username }),
            OutboundEvent::SendMessage { username, message } => {
                json!({ "username": username, "message": message })
            }
            OutboundEvent::DeleteMessage { message_id } => json!({ "message_id": message_id }),
            OutboundEvent::Typing {
                username,
                is_typing,
            } => json!({ "username": username, "isTyping": is_typing }),
        };
        RawEvent::new(kind.as_str(), data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_event_kind_names() {
        for kind in [
            EventKind::NewMessage,
            EventKind::MessageDeleted,
            EventKind::UserJoined,
            EventKind::UserLeft,
            EventKind::UserTyping,
            EventKind::JoinResponse,
            EventKind::ConnectionResponse,
            EventKind::ServerError,
            EventKind::Join,
            EventKind::SendMessage,
            EventKind::DeleteMessage,
            EventKind::Typing,
        ] {
            assert_eq!(EventKind::try_from(kind.as_str()), Ok(kind));
        }
        assert!(EventKind::try_from("reaction_added").is_err());
        assert!(EventKind::Typing.to_string() == "typing");
        assert!(!EventKind::Typing.is_inbound());
        assert!(EventKind::UserTyping.is_inbound());
    }

    #[test]
    fn test_new_message_with_server_field_names() {
        let raw = RawEvent::new(
            "new_message",
            json!({
                "_id": "65f0c0ffee",
                "username": "alice",
                "message": "hello",
                "timestamp": "2024-03-01T10:15:30.123456"
            }),
        );

        let event = InboundEvent::from_raw(&raw).unwrap();
        let InboundEvent::NewMessage(message) = event else {
            panic!("expected NewMessage, got {:?}", event);
        };
        assert_eq!(message.id, "65f0c0ffee");
        assert_eq!(message.author, "alice");
        assert_eq!(message.body, "hello");
        assert_eq!(
            message.timestamp.timestamp(),
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 30).unwrap().timestamp()
        );
        assert!(!message.is_system());
    }

    #[test]
    fn test_new_message_with_canonical_field_names() {
        let raw = RawEvent::new(
            "new_message",
            json!({
                "id": "m1",
                "author": "bob",
                "body": "hi",
                "timestamp": "2024-03-01T10:15:30Z"
            }),
        );

        assert!(matches!(
            InboundEvent::from_raw(&raw),
            Ok(InboundEvent::NewMessage(ref m)) if m.id == "m1" && m.author == "bob"
        ));
    }

    #[test]
    fn test_missing_field_is_malformed() {
        let raw = RawEvent::new("new_message", json!({ "id": "m1", "author": "bob" }));
        match InboundEvent::from_raw(&raw) {
            Err(ProtocolError::Malformed { event, .. }) => assert_eq!(event, "new_message"),
            other => panic!("Expected Malformed error, got {:?}", other),
        }

        let raw = RawEvent::new("user_typing", json!({ "username": "bob" }));
        assert!(matches!(
            InboundEvent::from_raw(&raw),
            Err(ProtocolError::Malformed { .. })
        ));

        let raw = RawEvent::new("message_deleted", Value::Null);
        assert!(matches!(
            InboundEvent::from_raw(&raw),
            Err(ProtocolError::Malformed { .. })
        ));
    }

    #[test]
    fn test_blank_body_is_malformed() {
        let raw = RawEvent::new(
            "new_message",
            json!({ "id": "m1", "author": "bob", "body": "   ", "timestamp": "2024-03-01T10:15:30Z" }),
        );
        assert!(matches!(
            InboundEvent::from_raw(&raw),
            Err(ProtocolError::Malformed { .. })
        ));
    }

    #[test]
    fn test_unknown_and_outbound_names_rejected() {
        let raw = RawEvent::new("reaction_added", json!({}));
        assert!(matches!(
            InboundEvent::from_raw(&raw),
            Err(ProtocolError::UnknownEvent(ref name)) if name == "reaction_added"
        ));

        let raw = OutboundEvent::join("alice").into_raw();
        assert!(matches!(
            InboundEvent::from_raw(&raw),
            Err(ProtocolError::WrongDirection("join"))
        ));
    }

    #[test]
    fn test_presence_roster_is_optional() {
        let raw = RawEvent::new("user_left", json!({ "username": "carol" }));
        assert_eq!(
            InboundEvent::from_raw(&raw).unwrap(),
            InboundEvent::UserLeft {
                username: "carol".into(),
                active_users: None
            }
        );

        let raw = RawEvent::new("join_response", json!({ "status": "joined" }));
        assert_eq!(
            InboundEvent::from_raw(&raw).unwrap(),
            InboundEvent::JoinResponse {
                active_users: vec![]
            }
        );
    }

    #[test]
    fn test_outbound_wire_shape() {
        let raw = OutboundEvent::typing("alice", true).into_raw();
        assert_eq!(raw.event, "typing");
        assert_eq!(raw.data, json!({ "username": "alice", "isTyping": true }));

        let raw = OutboundEvent::send_message("alice", "hello").into_raw();
        assert_eq!(raw.data, json!({ "username": "alice", "message": "hello" }));

        let raw = OutboundEvent::delete_message("m1").into_raw();
        assert_eq!(raw.kind(), Some(EventKind::DeleteMessage));
        assert_eq!(raw.data, json!({ "message_id": "m1" }));
    }
}
