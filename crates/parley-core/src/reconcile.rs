//! Reconciliation of server events with local state.
//!
//! The [`Reconciler`] exclusively owns the message ledger, the presence
//! register and the typing tracker. Events are applied one at a time in
//! delivery order; every handler is idempotent so that replays after a
//! reconnect are harmless. Malformed or unexpected input is dropped with a
//! log line and never mutates state.

use chrono::{DateTime, Utc};
use parley_protocol::{InboundEvent, OutboundEvent, ProtocolError, RawEvent};
use parley_transport::{ConnectivityState, LifecycleEvent};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::ledger::MessageLedger;
use crate::message::{Message, MessageKind};
use crate::presence::PresenceRegister;
use crate::services::{AuthError, AuthProvider, Credentials};
use crate::snapshot::{JoinPhase, Snapshot};
use crate::typing::{TypingDebouncer, TypingTracker, DEFAULT_IDLE_TIMEOUT};

/// Errors from user-initiated operations.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Authentication failed.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// An identity is already established.
    #[error("Already signed in as {0}")]
    AlreadySignedIn(String),

    /// The operation requires a joined session.
    #[error("Not joined to the conversation")]
    NotJoined,

    /// The message body is blank.
    #[error("Message is empty")]
    EmptyMessage,

    /// No message with this id is in the ledger.
    #[error("Unknown message: {0}")]
    UnknownMessage(String),

    /// The message belongs to someone else, or is a system message.
    #[error("Not permitted to delete message: {0}")]
    NotPermitted(String),
}

/// Something a consumer may want to react to beyond the snapshot itself.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// Another participant posted a message.
    MessageFromPeer(Message),
    /// The join completed; history should be fetched now.
    Joined,
}

/// Why an inbound event had no effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Event name not recognised.
    Unknown,
    /// Payload missing required fields or of the wrong direction.
    Malformed,
    /// No identity yet.
    NotJoined,
    /// Message id already in the ledger.
    Duplicate,
}

impl DropReason {
    /// Label for logs and metrics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::Unknown => "unknown",
            DropReason::Malformed => "malformed",
            DropReason::NotJoined => "not_joined",
            DropReason::Duplicate => "duplicate",
        }
    }
}

/// Outcome of applying one inbound event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Applied {
    /// Whether the snapshot changed.
    pub changed: bool,
    /// Notifications raised by the event.
    pub notifications: Vec<Notification>,
    /// Set when the event was discarded.
    pub dropped: Option<DropReason>,
}

impl Applied {
    fn changed(changed: bool) -> Self {
        Self {
            changed,
            ..Self::default()
        }
    }

    fn dropped(reason: DropReason) -> Self {
        Self {
            dropped: Some(reason),
            ..Self::default()
        }
    }
}

/// The conversation state machine.
#[derive(Debug)]
pub struct Reconciler {
    phase: JoinPhase,
    identity: Option<String>,
    connectivity: ConnectivityState,
    draft: String,
    ledger: MessageLedger,
    presence: PresenceRegister,
    typing: TypingTracker,
    debouncer: TypingDebouncer,
    version: u64,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_TIMEOUT)
    }
}

impl Reconciler {
    /// Create a reconciler whose own typing indicator stops after
    /// `typing_idle_timeout` without a keystroke.
    #[must_use]
    pub fn new(typing_idle_timeout: Duration) -> Self {
        Self {
            phase: JoinPhase::Unauthenticated,
            identity: None,
            connectivity: ConnectivityState::Disconnected,
            draft: String::new(),
            ledger: MessageLedger::new(),
            presence: PresenceRegister::new(),
            typing: TypingTracker::new(),
            debouncer: TypingDebouncer::new(typing_idle_timeout),
            version: 0,
        }
    }

    /// Current join phase.
    #[must_use]
    pub fn phase(&self) -> JoinPhase {
        self.phase
    }

    /// Local identity, once authenticated.
    #[must_use]
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// Current state version.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// The message ledger.
    #[must_use]
    pub fn ledger(&self) -> &MessageLedger {
        &self.ledger
    }

    /// The presence register.
    #[must_use]
    pub fn presence(&self) -> &PresenceRegister {
        &self.presence
    }

    /// The typing tracker.
    #[must_use]
    pub fn typing(&self) -> &TypingTracker {
        &self.typing
    }

    /// Take an immutable snapshot of the current state.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::new(Snapshot {
            version: self.version,
            phase: self.phase,
            identity: self.identity.clone(),
            connectivity: self.connectivity,
            draft: self.draft.clone(),
            entries: Arc::from(self.ledger.entries()),
            participants: self.presence.members().clone(),
            typing: self.typing.names().to_vec(),
        })
    }

    /// Exchange credentials for an identity and move to `Joining`.
    ///
    /// Returns the identity; the caller announces it on the transport
    /// session, which sends `join` now and after every reconnect.
    ///
    /// # Errors
    ///
    /// Fails if already signed in or if the provider rejects the credentials.
    /// The phase stays `Unauthenticated` on failure.
    pub async fn authenticate(
        &mut self,
        auth: &dyn AuthProvider,
        credentials: &Credentials,
    ) -> Result<String, ChatError> {
        if let Some(identity) = &self.identity {
            return Err(ChatError::AlreadySignedIn(identity.clone()));
        }

        let identity = auth.authenticate(credentials).await.map_err(|e| {
            warn!(error = %e, "Authentication failed");
            e
        })?;

        info!(identity = %identity, "Authenticated, joining");
        self.identity = Some(identity.clone());
        self.phase = JoinPhase::Joining;
        self.touch();
        Ok(identity)
    }

    /// Apply one inbound envelope received at `received_at`.
    pub fn apply(&mut self, raw: &RawEvent, received_at: DateTime<Utc>) -> Applied {
        let event = match InboundEvent::from_raw(raw) {
            Ok(event) => event,
            Err(ProtocolError::UnknownEvent(name)) => {
                debug!(event = %name, "Ignoring unknown event");
                return Applied::dropped(DropReason::Unknown);
            }
            Err(e) => {
                warn!(event = %raw.event, error = %e, "Dropping malformed event");
                return Applied::dropped(DropReason::Malformed);
            }
        };

        if self.phase == JoinPhase::Unauthenticated {
            debug!(event = %event.kind(), "Not signed in, dropping event");
            return Applied::dropped(DropReason::NotJoined);
        }

        trace!(event = %event.kind(), "Applying event");

        let applied = match event {
            InboundEvent::NewMessage(payload) => self.on_new_message(Message::from(payload)),
            InboundEvent::MessageDeleted { message_id } => {
                Applied::changed(self.ledger.remove(&message_id).is_some())
            }
            InboundEvent::UserJoined {
                username,
                active_users,
            } => {
                match active_users {
                    Some(roster) => {
                        self.presence.replace(roster);
                    }
                    None => {
                        self.presence.join(username.as_str());
                    }
                }
                self.prune_typing();
                self.ledger.append(Message::system(
                    format!("{username} joined the chat"),
                    received_at,
                ));
                Applied::changed(true)
            }
            InboundEvent::UserLeft {
                username,
                active_users,
            } => {
                match active_users {
                    Some(roster) => {
                        self.presence.replace(roster);
                    }
                    None => {
                        self.presence.leave(&username);
                    }
                }
                self.typing.stop(&username);
                self.prune_typing();
                self.ledger.append(Message::system(
                    format!("{username} left the chat"),
                    received_at,
                ));
                Applied::changed(true)
            }
            InboundEvent::UserTyping {
                username,
                is_typing,
            } => {
                if self.is_self(&username) {
                    trace!("Ignoring own typing event");
                    Applied::default()
                } else {
                    Applied::changed(self.typing.set(&username, is_typing))
                }
            }
            InboundEvent::JoinResponse { active_users } => {
                let mut applied = Applied::changed(self.presence.replace(active_users));
                self.prune_typing();
                if self.phase == JoinPhase::Joining {
                    info!(participants = self.presence.len(), "Joined the conversation");
                    self.phase = JoinPhase::Joined;
                    applied.changed = true;
                    applied.notifications.push(Notification::Joined);
                }
                applied
            }
            InboundEvent::ConnectionResponse => {
                debug!("Server acknowledged connection");
                Applied::default()
            }
            InboundEvent::ServerError { message } => {
                warn!(error = %message, "Server reported an error");
                Applied::default()
            }
        };

        if applied.changed {
            self.touch();
        }
        applied
    }

    fn on_new_message(&mut self, message: Message) -> Applied {
        let from_peer = message.kind == MessageKind::Chat && !self.is_self(&message.author);
        let notification = from_peer.then(|| Notification::MessageFromPeer(message.clone()));

        if !self.ledger.append(message) {
            return Applied::dropped(DropReason::Duplicate);
        }

        Applied {
            changed: true,
            notifications: notification.into_iter().collect(),
            dropped: None,
        }
    }

    /// Track a connectivity change. Returns `true` if the state changed.
    pub fn handle_lifecycle(&mut self, event: &LifecycleEvent) -> bool {
        let connectivity = match event {
            LifecycleEvent::Connecting => ConnectivityState::Connecting,
            LifecycleEvent::Connected => ConnectivityState::Connected,
            LifecycleEvent::Disconnected { .. } | LifecycleEvent::ReconnectFailed => {
                ConnectivityState::Disconnected
            }
            LifecycleEvent::Reconnecting { .. } => ConnectivityState::Reconnecting,
        };
        if connectivity == self.connectivity {
            return false;
        }
        self.connectivity = connectivity;
        self.touch();
        true
    }

    /// Post a message.
    ///
    /// Returns the events to send: the message, followed by `typing(false)`
    /// if typing was announced. The draft is cleared.
    ///
    /// # Errors
    ///
    /// Fails without side effects if the body is blank or the session has
    /// not joined.
    pub fn send_message(&mut self, body: &str) -> Result<Vec<OutboundEvent>, ChatError> {
        let body = body.trim();
        if body.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let username = self.joined_identity()?.to_string();

        let mut events = vec![OutboundEvent::send_message(username.as_str(), body)];
        if self.debouncer.stop() {
            events.push(OutboundEvent::typing(username, false));
        }
        self.draft.clear();
        self.touch();
        Ok(events)
    }

    /// Request deletion of one of our own messages.
    ///
    /// The message stays in the ledger until the server confirms with
    /// `message_deleted`.
    ///
    /// # Errors
    ///
    /// Fails if not joined, if the id is unknown, or if the message is not
    /// ours.
    pub fn delete_message(&self, id: &str) -> Result<OutboundEvent, ChatError> {
        let me = self.joined_identity()?;
        let message = self
            .ledger
            .get(id)
            .ok_or_else(|| ChatError::UnknownMessage(id.to_string()))?;
        if !message.is_authored_by(me) {
            return Err(ChatError::NotPermitted(id.to_string()));
        }
        Ok(OutboundEvent::delete_message(id))
    }

    /// Replace the draft, registering a keystroke at `now`.
    ///
    /// Returns `typing(true)` if it should be sent.
    pub fn edit_draft(&mut self, text: impl Into<String>, now: Instant) -> Option<OutboundEvent> {
        self.draft = text.into();
        self.touch();

        let username = self.joined_identity().ok()?.to_string();
        self.debouncer
            .keystroke(now)
            .then(|| OutboundEvent::typing(username, true))
    }

    /// Stop announcing typing right away.
    pub fn stop_typing(&mut self) -> Option<OutboundEvent> {
        let stopped = self.debouncer.stop();
        self.typing_stopped(stopped)
    }

    /// Fire the typing idle timer if it is due at `now`.
    pub fn expire_typing(&mut self, now: Instant) -> Option<OutboundEvent> {
        let stopped = self.debouncer.expire(now);
        self.typing_stopped(stopped)
    }

    /// When [`expire_typing`](Self::expire_typing) should next be called.
    #[must_use]
    pub fn typing_deadline(&self) -> Option<Instant> {
        self.debouncer.deadline()
    }

    fn typing_stopped(&self, stopped: bool) -> Option<OutboundEvent> {
        let username = self.identity.as_deref()?;
        stopped.then(|| OutboundEvent::typing(username, false))
    }

    /// Merge fetched history into the ledger. Returns `true` if anything
    /// was added.
    pub fn replay_history(&mut self, history: Vec<Message>) -> bool {
        let added = self.ledger.replay_history(history);
        if added > 0 {
            self.touch();
        }
        added > 0
    }

    /// Drop the identity and everything accumulated under it.
    ///
    /// Returns `typing(false)` if typing was announced.
    pub fn sign_out(&mut self) -> Option<OutboundEvent> {
        let stop = self.stop_typing();
        if let Some(identity) = self.identity.take() {
            info!(identity = %identity, "Signed out");
        }
        self.phase = JoinPhase::Unauthenticated;
        self.draft.clear();
        self.ledger.clear();
        self.presence.clear();
        self.typing.clear();
        self.touch();
        stop
    }

    fn joined_identity(&self) -> Result<&str, ChatError> {
        match (&self.phase, &self.identity) {
            (JoinPhase::Joined, Some(identity)) => Ok(identity),
            _ => Err(ChatError::NotJoined),
        }
    }

    fn is_self(&self, name: &str) -> bool {
        self.identity.as_deref() == Some(name)
    }

    fn prune_typing(&mut self) {
        let presence = &self.presence;
        self.typing.retain_present(|name| presence.contains(name));
    }

    fn touch(&mut self) {
        self.version += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use serde_json::json;

    struct FixedAuth(Result<&'static str, &'static str>);

    #[async_trait]
    impl AuthProvider for FixedAuth {
        async fn authenticate(&self, _credentials: &Credentials) -> Result<String, AuthError> {
            self.0
                .map(str::to_string)
                .map_err(|e| AuthError::Rejected(e.to_string()))
        }
    }

    fn credentials() -> Credentials {
        Credentials::Login {
            phone: "555-0100".into(),
            password: "hunter2".into(),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn new_message(id: &str, author: &str) -> RawEvent {
        RawEvent::new(
            "new_message",
            json!({
                "id": id,
                "username": author,
                "message": format!("hello from {author}"),
                "timestamp": "2024-05-01T12:00:00.123456",
            }),
        )
    }

    fn join_response(roster: &[&str]) -> RawEvent {
        RawEvent::new("join_response", json!({ "active_users": roster }))
    }

    async fn joined(name: &'static str) -> Reconciler {
        let mut reconciler = Reconciler::default();
        reconciler
            .authenticate(&FixedAuth(Ok(name)), &credentials())
            .await
            .unwrap();
        let applied = reconciler.apply(&join_response(&[name]), now());
        assert_eq!(applied.notifications, vec![Notification::Joined]);
        reconciler
    }

    fn ledger_ids(reconciler: &Reconciler) -> Vec<Option<String>> {
        reconciler
            .ledger()
            .iter()
            .map(|e| e.message.id.clone())
            .collect()
    }

    #[tokio::test]
    async fn test_authenticate() {
        let mut reconciler = Reconciler::default();

        let err = reconciler
            .authenticate(&FixedAuth(Err("bad password")), &credentials())
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Auth(AuthError::Rejected(_))));
        assert_eq!(reconciler.phase(), JoinPhase::Unauthenticated);

        let identity = reconciler
            .authenticate(&FixedAuth(Ok("alice")), &credentials())
            .await
            .unwrap();
        assert_eq!(identity, "alice");
        assert_eq!(reconciler.phase(), JoinPhase::Joining);

        assert!(matches!(
            reconciler
                .authenticate(&FixedAuth(Ok("bob")), &credentials())
                .await,
            Err(ChatError::AlreadySignedIn(_))
        ));
    }

    #[tokio::test]
    async fn test_join_response_is_idempotent() {
        let mut reconciler = joined("alice").await;
        assert_eq!(reconciler.phase(), JoinPhase::Joined);

        let applied = reconciler.apply(&join_response(&["alice", "bob"]), now());
        assert!(applied.changed);
        assert!(applied.notifications.is_empty());
        assert_eq!(reconciler.phase(), JoinPhase::Joined);
        assert_eq!(reconciler.presence().len(), 2);

        let applied = reconciler.apply(&join_response(&["alice", "bob"]), now());
        assert!(!applied.changed);
    }

    #[test]
    fn test_events_dropped_before_sign_in() {
        let mut reconciler = Reconciler::default();
        let applied = reconciler.apply(&new_message("m1", "bob"), now());
        assert_eq!(applied.dropped, Some(DropReason::NotJoined));
        assert!(reconciler.ledger().is_empty());

        let applied = reconciler.apply(&join_response(&["bob"]), now());
        assert_eq!(applied.dropped, Some(DropReason::NotJoined));
        assert_eq!(reconciler.phase(), JoinPhase::Unauthenticated);
    }

    #[tokio::test]
    async fn test_messages_in_delivery_order() {
        let mut reconciler = joined("alice").await;

        reconciler.apply(&new_message("m1", "bob"), now());
        reconciler.apply(&new_message("m2", "carol"), now());

        assert_eq!(
            ledger_ids(&reconciler),
            vec![Some("m1".to_string()), Some("m2".to_string())]
        );
    }

    #[tokio::test]
    async fn test_redelivered_message_is_ignored() {
        let mut reconciler = joined("alice").await;

        let first = reconciler.apply(&new_message("m1", "bob"), now());
        let version = reconciler.version();
        let second = reconciler.apply(&new_message("m1", "bob"), now());

        assert!(first.changed);
        assert_eq!(second.dropped, Some(DropReason::Duplicate));
        assert!(second.notifications.is_empty());
        assert_eq!(reconciler.version(), version);
        assert_eq!(ledger_ids(&reconciler), vec![Some("m1".to_string())]);
    }

    #[tokio::test]
    async fn test_peer_notification_only_for_others() {
        let mut reconciler = joined("alice").await;

        let own = reconciler.apply(&new_message("m1", "alice"), now());
        assert!(own.notifications.is_empty());

        let peer = reconciler.apply(&new_message("m2", "bob"), now());
        assert!(matches!(
            peer.notifications.as_slice(),
            [Notification::MessageFromPeer(m)] if m.author == "bob"
        ));
    }

    #[tokio::test]
    async fn test_user_joined_with_roster() {
        let mut reconciler = joined("alice").await;

        reconciler.apply(
            &RawEvent::new(
                "user_joined",
                json!({ "username": "bob", "active_users": ["alice", "bob"] }),
            ),
            now(),
        );

        let members: Vec<&str> = reconciler.presence().iter().collect();
        assert_eq!(members, vec!["alice", "bob"]);

        let last = reconciler.ledger().iter().last().unwrap();
        assert!(last.message.is_system());
        assert_eq!(last.message.body, "bob joined the chat");
        assert_eq!(last.message.timestamp, now());
        assert_eq!(reconciler.ledger().len(), 1);
    }

    #[tokio::test]
    async fn test_roster_replacement_is_authoritative() {
        let mut reconciler = joined("alice").await;
        reconciler.apply(&join_response(&["alice", "carol", "dave"]), now());

        reconciler.apply(
            &RawEvent::new(
                "user_joined",
                json!({ "username": "b", "active_users": ["a", "b"] }),
            ),
            now(),
        );
        let members: Vec<&str> = reconciler.presence().iter().collect();
        assert_eq!(members, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_user_left_without_roster() {
        let mut reconciler = joined("alice").await;
        reconciler.apply(
            &RawEvent::new("user_joined", json!({ "username": "bob" })),
            now(),
        );
        reconciler.apply(
            &RawEvent::new("user_typing", json!({ "username": "bob", "isTyping": true })),
            now(),
        );
        assert!(reconciler.typing().is_typing("bob"));

        reconciler.apply(
            &RawEvent::new("user_left", json!({ "username": "bob" })),
            now(),
        );

        assert!(!reconciler.presence().contains("bob"));
        assert!(!reconciler.typing().is_typing("bob"));
        let bodies: Vec<&str> = reconciler
            .ledger()
            .iter()
            .map(|e| e.message.body.as_str())
            .collect();
        assert_eq!(bodies, vec!["bob joined the chat", "bob left the chat"]);
    }

    #[tokio::test]
    async fn test_message_deleted_is_idempotent() {
        let mut reconciler = joined("alice").await;
        reconciler.apply(&new_message("m1", "bob"), now());
        reconciler.apply(&new_message("m2", "bob"), now());

        let deleted = RawEvent::new("message_deleted", json!({ "message_id": "m1" }));
        assert!(reconciler.apply(&deleted, now()).changed);
        assert_eq!(ledger_ids(&reconciler), vec![Some("m2".to_string())]);

        let again = reconciler.apply(&deleted, now());
        assert!(!again.changed);
        assert_eq!(again.dropped, None);
        assert_eq!(ledger_ids(&reconciler), vec![Some("m2".to_string())]);
    }

    #[tokio::test]
    async fn test_typing_events() {
        let mut reconciler = joined("alice").await;

        let typing = |name: &str, is_typing: bool| {
            RawEvent::new("user_typing", json!({ "username": name, "isTyping": is_typing }))
        };

        assert!(reconciler.apply(&typing("bob", true), now()).changed);
        assert!(!reconciler.apply(&typing("bob", true), now()).changed);
        assert!(!reconciler.apply(&typing("alice", true), now()).changed);
        assert_eq!(reconciler.typing().names(), ["bob"]);

        assert!(reconciler.apply(&typing("bob", false), now()).changed);
        assert!(reconciler.typing().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_and_unknown_events_are_dropped() {
        let mut reconciler = joined("alice").await;
        let version = reconciler.version();

        let missing_id = RawEvent::new(
            "new_message",
            json!({ "username": "bob", "message": "hi", "timestamp": "2024-05-01T12:00:00" }),
        );
        let blank_body = RawEvent::new(
            "new_message",
            json!({ "id": "m1", "username": "bob", "message": "  ", "timestamp": "2024-05-01T12:00:00" }),
        );
        let echo = OutboundEvent::join("bob").into_raw();
        let unknown = RawEvent::new("reaction_added", json!({}));

        for raw in [&missing_id, &blank_body, &echo] {
            assert_eq!(
                reconciler.apply(raw, now()).dropped,
                Some(DropReason::Malformed)
            );
        }
        assert_eq!(
            reconciler.apply(&unknown, now()).dropped,
            Some(DropReason::Unknown)
        );
        assert_eq!(reconciler.version(), version);
        assert!(reconciler.ledger().is_empty());
    }

    #[tokio::test]
    async fn test_send_message() {
        let mut reconciler = Reconciler::default();
        assert!(matches!(
            reconciler.send_message("hi"),
            Err(ChatError::NotJoined)
        ));

        let mut reconciler = joined("alice").await;
        assert!(matches!(
            reconciler.send_message("   "),
            Err(ChatError::EmptyMessage)
        ));

        let start = Instant::now();
        assert_eq!(
            reconciler.edit_draft("hel", start),
            Some(OutboundEvent::typing("alice", true))
        );
        assert_eq!(reconciler.edit_draft("hello", start), None);

        let events = reconciler.send_message("  hello  ").unwrap();
        assert_eq!(
            events,
            vec![
                OutboundEvent::send_message("alice", "hello"),
                OutboundEvent::typing("alice", false),
            ]
        );
        assert!(reconciler.snapshot().draft.is_empty());
        assert_eq!(reconciler.typing_deadline(), None);

        // Nothing pending, so no second typing(false).
        assert_eq!(
            reconciler.send_message("again").unwrap(),
            vec![OutboundEvent::send_message("alice", "again")]
        );
    }

    #[tokio::test]
    async fn test_typing_idle_timeout() {
        let mut reconciler = joined("alice").await;
        let start = Instant::now();

        assert!(reconciler.edit_draft("h", start).is_some());
        assert_eq!(
            reconciler.typing_deadline(),
            Some(start + DEFAULT_IDLE_TIMEOUT)
        );
        assert_eq!(reconciler.expire_typing(start + Duration::from_millis(1500)), None);
        assert_eq!(
            reconciler.expire_typing(start + DEFAULT_IDLE_TIMEOUT),
            Some(OutboundEvent::typing("alice", false))
        );
        assert_eq!(reconciler.expire_typing(start + Duration::from_secs(10)), None);
    }

    #[test]
    fn test_draft_before_join_does_not_announce() {
        let mut reconciler = Reconciler::default();
        assert_eq!(reconciler.edit_draft("hi", Instant::now()), None);
        assert_eq!(reconciler.snapshot().draft, "hi");
        assert_eq!(reconciler.typing_deadline(), None);
    }

    #[tokio::test]
    async fn test_delete_message_guard() {
        let mut reconciler = joined("alice").await;
        reconciler.apply(&new_message("m1", "alice"), now());
        reconciler.apply(&new_message("m2", "bob"), now());
        reconciler.apply(
            &RawEvent::new("user_joined", json!({ "username": "bob" })),
            now(),
        );

        assert_eq!(
            reconciler.delete_message("m1").unwrap(),
            OutboundEvent::delete_message("m1")
        );
        // Not optimistic.
        assert!(reconciler.ledger().contains("m1"));

        assert!(matches!(
            reconciler.delete_message("m2"),
            Err(ChatError::NotPermitted(_))
        ));
        assert!(matches!(
            reconciler.delete_message("m9"),
            Err(ChatError::UnknownMessage(_))
        ));
    }

    #[tokio::test]
    async fn test_lifecycle_keeps_state() {
        let mut reconciler = joined("alice").await;
        reconciler.apply(&new_message("m1", "bob"), now());

        assert!(reconciler.handle_lifecycle(&LifecycleEvent::Connected));
        assert!(reconciler.handle_lifecycle(&LifecycleEvent::Disconnected {
            reason: "connection closed by server".into()
        }));
        assert!(!reconciler.handle_lifecycle(&LifecycleEvent::ReconnectFailed));
        assert!(reconciler.handle_lifecycle(&LifecycleEvent::Reconnecting { attempt: 1 }));
        assert!(reconciler.handle_lifecycle(&LifecycleEvent::Connected));

        let snapshot = reconciler.snapshot();
        assert_eq!(snapshot.connectivity, ConnectivityState::Connected);
        assert_eq!(snapshot.phase, JoinPhase::Joined);
        assert_eq!(snapshot.entries.len(), 1);

        // Re-join after reconnect: roster replaced, ledger untouched.
        let applied = reconciler.apply(&join_response(&["alice", "bob"]), now());
        assert!(applied.notifications.is_empty());
        assert_eq!(reconciler.ledger().len(), 1);
        // Redelivery across the reconnect.
        reconciler.apply(&new_message("m1", "bob"), now());
        assert_eq!(reconciler.ledger().len(), 1);
    }

    #[tokio::test]
    async fn test_replay_history() {
        let mut reconciler = joined("alice").await;
        reconciler.apply(&new_message("m2", "bob"), now());
        reconciler.apply(&new_message("m3", "bob"), now());

        let history = vec![
            Message::chat("m1", "carol", "first", now()),
            Message::chat("m2", "bob", "hello from bob", now()),
        ];
        assert!(reconciler.replay_history(history.clone()));
        assert_eq!(
            ledger_ids(&reconciler),
            vec![
                Some("m1".to_string()),
                Some("m2".to_string()),
                Some("m3".to_string())
            ]
        );
        assert!(!reconciler.replay_history(history));
    }

    #[tokio::test]
    async fn test_history_in_flight_does_not_resurrect_deleted() {
        let mut reconciler = joined("alice").await;
        reconciler.apply(&new_message("m1", "bob"), now());
        let deleted = RawEvent::new("message_deleted", json!({ "message_id": "m1" }));
        assert!(reconciler.apply(&deleted, now()).changed);

        // History fetched before the delete still lists m1.
        let stale = vec![Message::chat("m1", "bob", "hello from bob", now())];
        assert!(!reconciler.replay_history(stale));
        assert!(ledger_ids(&reconciler).is_empty());
    }

    #[tokio::test]
    async fn test_sign_out() {
        let mut reconciler = joined("alice").await;
        reconciler.apply(&new_message("m1", "bob"), now());
        reconciler.edit_draft("typing…", Instant::now());

        assert_eq!(
            reconciler.sign_out(),
            Some(OutboundEvent::typing("alice", false))
        );
        let snapshot = reconciler.snapshot();
        assert_eq!(snapshot.phase, JoinPhase::Unauthenticated);
        assert_eq!(snapshot.identity, None);
        assert!(snapshot.entries.is_empty());
        assert!(snapshot.participants.is_empty());
        assert!(snapshot.draft.is_empty());
        assert_eq!(reconciler.typing_deadline(), None);

        // A different identity can sign in afterwards.
        reconciler
            .authenticate(&FixedAuth(Ok("bob")), &credentials())
            .await
            .unwrap();
        assert_eq!(reconciler.identity(), Some("bob"));
    }

    #[tokio::test]
    async fn test_snapshot_versions_increase() {
        let mut reconciler = joined("alice").await;
        let before = reconciler.snapshot();

        reconciler.apply(&new_message("m1", "bob"), now());
        let after = reconciler.snapshot();

        assert!(after.version > before.version);
        let diff = after.diff(&before);
        assert_eq!(diff.appended.len(), 1);
        assert!(diff.removed.is_empty());
    }
}
