//! Read-only views of the conversation state.

use parley_transport::ConnectivityState;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use crate::ledger::{shares_header, Entry};

/// Progress of the local user through sign-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinPhase {
    /// No identity yet.
    #[default]
    Unauthenticated,
    /// Authenticated, waiting for `join_response`.
    Joining,
    /// In the conversation.
    Joined,
}

/// An immutable view of everything the reconciler holds.
///
/// Every state change produces a snapshot with a higher `version`.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Monotonic state version.
    pub version: u64,
    /// Join progress.
    pub phase: JoinPhase,
    /// Local identity, once authenticated.
    pub identity: Option<String>,
    /// Transport connectivity.
    pub connectivity: ConnectivityState,
    /// Unsent input.
    pub draft: String,
    /// Ledger contents in order.
    pub entries: Arc<[Entry]>,
    /// Active participants, sorted.
    pub participants: BTreeSet<String>,
    /// Participants typing, in start order.
    pub typing: Vec<String>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            version: 0,
            phase: JoinPhase::Unauthenticated,
            identity: None,
            connectivity: ConnectivityState::Disconnected,
            draft: String::new(),
            entries: Arc::from(Vec::new()),
            participants: BTreeSet::new(),
            typing: Vec::new(),
        }
    }
}

impl Snapshot {
    /// Whether the entry at `index` shares a header with its predecessor.
    #[must_use]
    pub fn shares_header_with_previous(&self, index: usize) -> bool {
        match index.checked_sub(1) {
            Some(prev) => match (self.entries.get(prev), self.entries.get(index)) {
                (Some(p), Some(c)) => shares_header(&p.message, &c.message),
                _ => false,
            },
            None => false,
        }
    }

    /// Typing participants other than the local user.
    pub fn others_typing(&self) -> impl Iterator<Item = &str> {
        let me = self.identity.as_deref();
        self.typing
            .iter()
            .map(String::as_str)
            .filter(move |n| Some(*n) != me)
    }

    /// What changed since `previous`.
    #[must_use]
    pub fn diff(&self, previous: &Snapshot) -> SnapshotDiff {
        let before: HashSet<u64> = previous.entries.iter().map(|e| e.seq).collect();
        let after: HashSet<u64> = self.entries.iter().map(|e| e.seq).collect();

        SnapshotDiff {
            appended: self
                .entries
                .iter()
                .filter(|e| !before.contains(&e.seq))
                .cloned()
                .collect(),
            removed: previous
                .entries
                .iter()
                .filter(|e| !after.contains(&e.seq))
                .cloned()
                .collect(),
            joined: self
                .participants
                .difference(&previous.participants)
                .cloned()
                .collect(),
            left: previous
                .participants
                .difference(&self.participants)
                .cloned()
                .collect(),
            connectivity_changed: self.connectivity != previous.connectivity,
        }
    }
}

/// Differences between two snapshots.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotDiff {
    /// Entries present now but not before, in ledger order.
    pub appended: Vec<Entry>,
    /// Entries present before but not now.
    pub removed: Vec<Entry>,
    /// Participants added to the roster.
    pub joined: Vec<String>,
    /// Participants removed from the roster.
    pub left: Vec<String>,
    /// Whether connectivity changed.
    pub connectivity_changed: bool,
}

impl SnapshotDiff {
    /// Check if nothing a renderer cares about changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.appended.is_empty()
            && self.removed.is_empty()
            && self.joined.is_empty()
            && self.left.is_empty()
            && !self.connectivity_changed
    }
}
