//! Typing indicators.
//!
//! [`TypingTracker`] holds who else is typing. [`TypingDebouncer`] decides
//! when the local user's own typing state goes out on the wire.

use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

/// Inactivity after the last keystroke before typing stops.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_millis(2000);

/// Participants currently typing, in the order they started.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypingTracker {
    typing: Vec<String>,
}

impl TypingTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a participant as typing. Returns `true` if they were not already.
    pub fn start(&mut self, name: &str) -> bool {
        if self.is_typing(name) {
            return false;
        }
        self.typing.push(name.to_string());
        true
    }

    /// Mark a participant as no longer typing. Returns `true` if they were.
    pub fn stop(&mut self, name: &str) -> bool {
        let before = self.typing.len();
        self.typing.retain(|n| n != name);
        self.typing.len() != before
    }

    /// Apply a typing event.
    pub fn set(&mut self, name: &str, is_typing: bool) -> bool {
        if is_typing {
            self.start(name)
        } else {
            self.stop(name)
        }
    }

    /// Drop everyone not in `present`. Returns `true` if anyone was dropped.
    pub fn retain_present(&mut self, present: impl Fn(&str) -> bool) -> bool {
        let before = self.typing.len();
        self.typing.retain(|n| present(n));
        self.typing.len() != before
    }

    /// Check if a participant is typing.
    #[must_use]
    pub fn is_typing(&self, name: &str) -> bool {
        self.typing.iter().any(|n| n == name)
    }

    /// Participants typing, in start order.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.typing
    }

    /// Check if nobody is typing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.typing.is_empty()
    }

    /// Forget everyone.
    pub fn clear(&mut self) {
        self.typing.clear();
    }
}

/// Debounces the local user's typing indicator.
///
/// A keystroke announces `typing(true)` once and (re)arms a single idle
/// deadline. When the deadline passes without another keystroke, exactly one
/// `typing(false)` is due. The owner sleeps until [`deadline`](Self::deadline)
/// and then calls [`expire`](Self::expire); there is no timer task to leak.
#[derive(Debug, Clone)]
pub struct TypingDebouncer {
    idle_timeout: Duration,
    announced: bool,
    deadline: Option<Instant>,
}

impl Default for TypingDebouncer {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_TIMEOUT)
    }
}

impl TypingDebouncer {
    /// Create a debouncer with the given idle timeout.
    #[must_use]
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            idle_timeout,
            announced: false,
            deadline: None,
        }
    }

    /// Register a keystroke at `now`.
    ///
    /// Returns `true` if `typing(true)` should be sent.
    pub fn keystroke(&mut self, now: Instant) -> bool {
        self.deadline = Some(now + self.idle_timeout);
        if self.announced {
            return false;
        }
        self.announced = true;
        trace!("Typing started");
        true
    }

    /// Fire the idle deadline if it has passed.
    ///
    /// Returns `true` if `typing(false)` should be sent.
    pub fn expire(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                trace!("Typing idle timeout elapsed");
                self.stop()
            }
            _ => false,
        }
    }

    /// Cancel the deadline immediately.
    ///
    /// Returns `true` if `typing(false)` should be sent.
    pub fn stop(&mut self) -> bool {
        self.deadline = None;
        std::mem::take(&mut self.announced)
    }

    /// When the pending `typing(false)` is due, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_insertion_order() {
        let mut tracker = TypingTracker::new();
        assert!(tracker.set("carol", true));
        assert!(tracker.set("alice", true));
        assert!(!tracker.set("carol", true));
        assert_eq!(tracker.names(), ["carol", "alice"]);

        assert!(tracker.set("carol", false));
        assert!(!tracker.set("carol", false));
        assert_eq!(tracker.names(), ["alice"]);
    }

    #[test]
    fn test_tracker_retain_present() {
        let mut tracker = TypingTracker::new();
        tracker.start("alice");
        tracker.start("bob");

        assert!(tracker.retain_present(|n| n == "bob"));
        assert_eq!(tracker.names(), ["bob"]);
        assert!(!tracker.retain_present(|n| n == "bob"));
    }

    #[test]
    fn test_single_stop_after_silence() {
        let start = Instant::now();
        let mut debouncer = TypingDebouncer::default();

        assert!(debouncer.keystroke(start));
        assert_eq!(debouncer.deadline(), Some(start + DEFAULT_IDLE_TIMEOUT));

        assert!(!debouncer.expire(start + Duration::from_millis(1999)));
        assert!(debouncer.expire(start + Duration::from_millis(2000)));
        assert!(!debouncer.expire(start + Duration::from_millis(5000)));
        assert_eq!(debouncer.deadline(), None);
    }

    #[test]
    fn test_steady_typing_never_stops() {
        let start = Instant::now();
        let mut debouncer = TypingDebouncer::default();
        let mut starts = 0;
        let mut stops = 0;

        for second in 0..=5 {
            let now = start + Duration::from_secs(second);
            if debouncer.expire(now) {
                stops += 1;
            }
            if debouncer.keystroke(now) {
                starts += 1;
            }
        }
        assert_eq!((starts, stops), (1, 0));

        assert!(debouncer.expire(start + Duration::from_secs(7)));
    }

    #[test]
    fn test_stop_cancels_deadline() {
        let start = Instant::now();
        let mut debouncer = TypingDebouncer::new(Duration::from_millis(500));

        assert!(!debouncer.stop());
        debouncer.keystroke(start);
        assert!(debouncer.stop());
        assert!(!debouncer.stop());
        assert_eq!(debouncer.deadline(), None);
        assert!(!debouncer.expire(start + Duration::from_secs(1)));
    }
}
