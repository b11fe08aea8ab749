//! Chat message types.

use chrono::{DateTime, Utc};
use parley_protocol::MessagePayload;

/// A server-assigned message identifier.
pub type MessageId = String;

/// What produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Posted by a participant.
    Chat,
    /// Synthesized locally or flagged by the server (joins, departures).
    System,
}

/// A message in the conversation.
///
/// Messages are never mutated once they enter the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Server id. `None` for locally synthesized messages.
    pub id: Option<MessageId>,
    /// Author display name.
    pub author: String,
    /// Message text.
    pub body: String,
    /// When the server (or, for system messages, the client) stamped it.
    pub timestamp: DateTime<Utc>,
    /// Chat or system.
    pub kind: MessageKind,
}

impl Message {
    /// Create a chat message.
    #[must_use]
    pub fn chat(
        id: impl Into<MessageId>,
        author: impl Into<String>,
        body: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Some(id.into()),
            author: author.into(),
            body: body.into(),
            timestamp,
            kind: MessageKind::Chat,
        }
    }

    /// Create a local system message without an id.
    #[must_use]
    pub fn system(body: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: None,
            author: String::new(),
            body: body.into(),
            timestamp,
            kind: MessageKind::System,
        }
    }

    /// Whether this is a system message.
    #[must_use]
    pub fn is_system(&self) -> bool {
        self.kind == MessageKind::System
    }

    /// Whether `participant` wrote this message.
    #[must_use]
    pub fn is_authored_by(&self, participant: &str) -> bool {
        self.kind == MessageKind::Chat && self.author == participant
    }
}

impl From<MessagePayload> for Message {
    fn from(payload: MessagePayload) -> Self {
        let kind = if payload.is_system() {
            MessageKind::System
        } else {
            MessageKind::Chat
        };
        Self {
            id: Some(payload.id),
            author: payload.author,
            body: payload.body,
            timestamp: payload.timestamp,
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_from_payload() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let payload = MessagePayload {
            id: "m1".into(),
            author: "alice".into(),
            body: "hi".into(),
            timestamp: ts,
            kind: None,
        };

        let message = Message::from(payload.clone());
        assert_eq!(message, Message::chat("m1", "alice", "hi", ts));
        assert!(message.is_authored_by("alice"));
        assert!(!message.is_authored_by("bob"));

        let system = Message::from(MessagePayload {
            kind: Some("system".into()),
            ..payload
        });
        assert!(system.is_system());
        assert!(!system.is_authored_by("alice"));
    }
}
