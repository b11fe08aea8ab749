//! Presence register.
//!
//! The set of participants currently in the conversation. A roster snapshot
//! from the server always replaces the register wholesale; single joins and
//! departures are only applied when the server omits the snapshot.

use std::collections::BTreeSet;
use tracing::debug;

/// The set of active participants, iterated in sorted order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceRegister {
    members: BTreeSet<String>,
}

impl PresenceRegister {
    /// Create an empty register.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the register with an authoritative roster.
    ///
    /// Returns `true` if the membership changed.
    pub fn replace<I, S>(&mut self, roster: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let roster: BTreeSet<String> = roster.into_iter().map(Into::into).collect();
        if roster == self.members {
            return false;
        }
        debug!(count = roster.len(), "Presence: roster replaced");
        self.members = roster;
        true
    }

    /// Add a participant.
    ///
    /// Returns `true` if this is a new member.
    pub fn join(&mut self, name: impl Into<String>) -> bool {
        let name = name.into();
        let is_new = self.members.insert(name.clone());
        if is_new {
            debug!(participant = %name, "Presence: member joined");
        }
        is_new
    }

    /// Remove a participant.
    ///
    /// Returns `true` if the participant was present.
    pub fn leave(&mut self, name: &str) -> bool {
        let removed = self.members.remove(name);
        if removed {
            debug!(participant = %name, "Presence: member left");
        }
        removed
    }

    /// Check if a participant is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.members.contains(name)
    }

    /// Iterate participants in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(String::as_str)
    }

    /// Get the underlying set.
    #[must_use]
    pub fn members(&self) -> &BTreeSet<String> {
        &self.members
    }

    /// Get the number of present members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Check if the register is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Remove everyone.
    pub fn clear(&mut self) {
        self.members.clear();
    }
}
