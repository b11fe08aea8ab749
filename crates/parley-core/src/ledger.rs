//! Message ledger.
//!
//! The ordered list of messages in the conversation. Order is insertion
//! order, which matches the order the server emitted events in; the ledger
//! never re-sorts by timestamp.

use crate::message::{Message, MessageId};
use std::collections::{HashMap, HashSet};
use tracing::{debug, trace};

/// Messages by the same author within this window share a header.
pub const HEADER_WINDOW_MS: i64 = 5 * 60 * 1000;

/// A ledger slot: a message plus its local sequence number.
///
/// Sequence numbers are assigned at insertion, increase monotonically and
/// are never reused, so they identify entries that have no server id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Local insertion sequence number.
    pub seq: u64,
    /// The message.
    pub message: Message,
}

/// Ordered, id-unique message store.
#[derive(Debug, Default)]
pub struct MessageLedger {
    entries: Vec<Entry>,
    ids: HashSet<MessageId>,
    // Deleted ids; a stale history fetch must not bring them back.
    tombstones: HashSet<MessageId>,
    next_seq: u64,
}

impl MessageLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message.
    ///
    /// Returns `false` and leaves the ledger untouched if a message with the
    /// same id is already present.
    pub fn append(&mut self, message: Message) -> bool {
        if let Some(id) = &message.id {
            if !self.ids.insert(id.clone()) {
                trace!(message = %id, "Ledger: duplicate message ignored");
                return false;
            }
        }
        let seq = self.bump_seq();
        self.entries.push(Entry { seq, message });
        true
    }

    /// Remove the message with the given id.
    ///
    /// Returns the removed entry, or `None` if no such message exists. The
    /// id is remembered either way and skipped by later history replays.
    pub fn remove(&mut self, id: &str) -> Option<Entry> {
        self.tombstones.insert(id.to_string());
        if !self.ids.remove(id) {
            return None;
        }
        let index = self
            .entries
            .iter()
            .position(|e| e.message.id.as_deref() == Some(id))?;
        debug!(message = %id, "Ledger: message removed");
        Some(self.entries.remove(index))
    }

    /// Merge a server history fetch into the ledger.
    ///
    /// History becomes the prefix of the ledger. Messages already held whose
    /// id does not appear in the history, and all system messages, follow it
    /// in their existing order. Duplicate ids within the history are dropped,
    /// as are ids deleted since the ledger was last cleared.
    ///
    /// Returns the number of messages the history added.
    pub fn replay_history(&mut self, history: Vec<Message>) -> usize {
        let mut ids = HashSet::with_capacity(history.len() + self.ids.len());
        let history: Vec<Message> = history
            .into_iter()
            .filter(|m| match &m.id {
                Some(id) => !self.tombstones.contains(id) && ids.insert(id.clone()),
                None => true,
            })
            .collect();

        let (known, trailing): (Vec<Entry>, Vec<Entry>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|e| e.message.id.as_ref().is_some_and(|id| ids.contains(id)));
        let mut known: HashMap<MessageId, Entry> = known
            .into_iter()
            .filter_map(|e| Some((e.message.id.clone()?, e)))
            .collect();

        let mut entries = Vec::with_capacity(history.len() + trailing.len());
        let mut added = 0;
        for message in history {
            // Keep the live entry (and its seq) for messages we already hold.
            match message.id.as_ref().and_then(|id| known.remove(id)) {
                Some(entry) => entries.push(entry),
                None => {
                    let seq = self.bump_seq();
                    entries.push(Entry { seq, message });
                    added += 1;
                }
            }
        }
        for entry in trailing {
            if let Some(id) = &entry.message.id {
                ids.insert(id.clone());
            }
            entries.push(entry);
        }

        debug!(added, total = entries.len(), "Ledger: history replayed");
        self.entries = entries;
        self.ids = ids;
        added
    }

    /// Whether a message with this id is present.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Look up a message by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Message> {
        if !self.contains(id) {
            return None;
        }
        self.entries
            .iter()
            .map(|e| &e.message)
            .find(|m| m.id.as_deref() == Some(id))
    }

    /// Iterate entries in ledger order.
    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }

    /// Entries as a slice.
    #[must_use]
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Number of messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the ledger is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every message.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.ids.clear();
        self.tombstones.clear();
    }

    /// Whether the entry at `index` shares a header with the one before it.
    #[must_use]
    pub fn shares_header_with_previous(&self, index: usize) -> bool {
        match (index.checked_sub(1), self.entries.get(index)) {
            (Some(prev), Some(current)) => {
                shares_header(&self.entries[prev].message, &current.message)
            }
            _ => false,
        }
    }

    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}

/// Whether `current` can be shown under `previous`'s header.
///
/// True when both are chat messages by the same author posted at most five
/// minutes apart. A negative gap (clock skew) counts as within the window.
#[must_use]
pub fn shares_header(previous: &Message, current: &Message) -> bool {
    if previous.is_system() || current.is_system() {
        return false;
    }
    if previous.author != current.author {
        return false;
    }
    let elapsed = current.timestamp.signed_duration_since(previous.timestamp);
    elapsed.num_milliseconds() <= HEADER_WINDOW_MS
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn at(minute: u32, second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, second).unwrap()
    }

    fn chat(id: &str, author: &str) -> Message {
        Message::chat(id, author, format!("body of {id}"), at(0, 0))
    }

    fn ids(ledger: &MessageLedger) -> Vec<Option<&str>> {
        ledger.iter().map(|e| e.message.id.as_deref()).collect()
    }

    #[test]
    fn test_append_preserves_order_and_rejects_duplicates() {
        let mut ledger = MessageLedger::new();
        assert!(ledger.append(chat("m2", "alice")));
        assert!(ledger.append(chat("m1", "bob")));
        assert!(!ledger.append(chat("m2", "alice")));

        assert_eq!(ids(&ledger), vec![Some("m2"), Some("m1")]);
        assert!(ledger.contains("m1"));
        assert_eq!(ledger.get("m1").map(|m| m.author.as_str()), Some("bob"));
    }

    #[test]
    fn test_system_messages_never_collide() {
        let mut ledger = MessageLedger::new();
        assert!(ledger.append(Message::system("bob joined the chat", at(0, 0))));
        assert!(ledger.append(Message::system("bob joined the chat", at(0, 0))));

        let seqs: Vec<u64> = ledger.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![0, 1]);
    }

    #[test]
    fn test_remove_is_noop_when_absent() {
        let mut ledger = MessageLedger::new();
        ledger.append(chat("m1", "alice"));
        ledger.append(chat("m2", "alice"));

        assert!(ledger.remove("m1").is_some());
        assert!(ledger.remove("m1").is_none());
        assert!(ledger.remove("nope").is_none());
        assert_eq!(ids(&ledger), vec![Some("m2")]);

        // A removed id may arrive again later.
        assert!(ledger.append(chat("m1", "alice")));
    }

    #[test]
    fn test_replay_history_keeps_live_only_messages() {
        let mut ledger = MessageLedger::new();
        ledger.append(chat("m3", "alice"));
        ledger.append(Message::system("bob joined the chat", at(1, 0)));
        ledger.append(chat("m2", "bob"));
        let m2_seq = ledger.iter().last().map(|e| e.seq);

        let added = ledger.replay_history(vec![
            chat("m1", "alice"),
            chat("m2", "bob"),
            chat("m1", "alice"),
        ]);

        assert_eq!(added, 1);
        assert_eq!(
            ids(&ledger),
            vec![Some("m1"), Some("m2"), Some("m3"), None]
        );
        // The live copy of m2 is kept as-is.
        assert_eq!(ledger.iter().nth(1).map(|e| e.seq), m2_seq);
        assert!(!ledger.append(chat("m1", "alice")));
        assert!(!ledger.append(chat("m3", "alice")));
    }

    #[test]
    fn test_replay_history_skips_deleted_messages() {
        let mut ledger = MessageLedger::new();
        ledger.append(chat("m1", "alice"));
        assert!(ledger.remove("m1").is_some());
        // Deleted before the history that still lists it arrived.
        assert!(ledger.remove("m2").is_none());

        let added = ledger.replay_history(vec![chat("m1", "alice"), chat("m2", "bob")]);

        assert_eq!(added, 0);
        assert!(ledger.is_empty());
        assert!(!ledger.contains("m1"));

        ledger.clear();
        assert_eq!(ledger.replay_history(vec![chat("m1", "alice")]), 1);
    }

    #[test]
    fn test_shares_header() {
        let first = Message::chat("m1", "alice", "hi", at(0, 0));

        assert!(shares_header(&first, &Message::chat("m2", "alice", "again", at(5, 0))));
        assert!(!shares_header(
            &first,
            &Message::chat("m2", "alice", "later", at(5, 0) + Duration::milliseconds(1))
        ));
        assert!(!shares_header(&first, &Message::chat("m2", "bob", "hi", at(0, 1))));

        // Clock skew: the later entry carries an earlier timestamp.
        let skewed = Message::chat("m2", "alice", "skewed", at(0, 0) - Duration::minutes(10));
        assert!(shares_header(&first, &skewed));

        let system = Message::system("bob joined the chat", at(0, 1));
        assert!(!shares_header(&system, &Message::chat("m2", "alice", "hi", at(0, 2))));
        assert!(!shares_header(&first, &system));
    }

    #[test]
    fn test_shares_header_with_previous() {
        let mut ledger = MessageLedger::new();
        ledger.append(Message::chat("m1", "alice", "one", at(0, 0)));
        ledger.append(Message::chat("m2", "alice", "two", at(1, 0)));
        ledger.append(Message::chat("m3", "bob", "three", at(1, 30)));

        assert!(!ledger.shares_header_with_previous(0));
        assert!(ledger.shares_header_with_previous(1));
        assert!(!ledger.shares_header_with_previous(2));
        assert!(!ledger.shares_header_with_previous(3));
    }
}
