//! Terminal rendering and input parsing.
//!
//! The renderer is a snapshot subscriber: it diffs each new snapshot against
//! the last one it drew and prints only what changed.

use chrono::Local;
use parley_core::{Entry, Snapshot};
use parley_transport::ConnectivityState;
use std::collections::HashSet;
use std::io::{self, Write};
use std::sync::Arc;

/// Draws snapshots as plain text lines.
pub struct Renderer<W: Write> {
    out: W,
    previous: Arc<Snapshot>,
}

impl<W: Write> Renderer<W> {
    /// Create a renderer that has drawn nothing yet.
    pub fn new(out: W) -> Self {
        Self {
            out,
            previous: Arc::new(Snapshot::default()),
        }
    }

    /// Draw what changed since the previous snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    pub fn render(&mut self, snapshot: &Arc<Snapshot>) -> io::Result<()> {
        let diff = snapshot.diff(&self.previous);

        if diff.connectivity_changed {
            writeln!(self.out, "-- {} --", connectivity_label(snapshot.connectivity))?;
        }

        for entry in &diff.removed {
            if let Some(id) = &entry.message.id {
                writeln!(self.out, "-- message {} deleted --", id)?;
            }
        }

        let appended: HashSet<u64> = diff.appended.iter().map(|e| e.seq).collect();
        for (index, entry) in snapshot.entries.iter().enumerate() {
            if appended.contains(&entry.seq) {
                let grouped = snapshot.shares_header_with_previous(index);
                self.write_entry(entry, grouped, snapshot.identity.as_deref())?;
            }
        }

        if snapshot.typing != self.previous.typing {
            let typing: Vec<&str> = snapshot.others_typing().collect();
            if !typing.is_empty() {
                writeln!(self.out, "   {} typing...", typing.join(", "))?;
            }
        }

        self.out.flush()?;
        self.previous = Arc::clone(snapshot);
        Ok(())
    }

    /// Ring the terminal bell.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    pub fn bell(&mut self) -> io::Result<()> {
        self.out.write_all(b"\x07")?;
        self.out.flush()
    }

    fn write_entry(&mut self, entry: &Entry, grouped: bool, me: Option<&str>) -> io::Result<()> {
        let message = &entry.message;
        if message.is_system() {
            return writeln!(self.out, "* {}", message.body);
        }

        if !grouped {
            let time = message.timestamp.with_timezone(&Local).format("%H:%M");
            let you = if Some(message.author.as_str()) == me {
                " (you)"
            } else {
                ""
            };
            let id = message.id.as_deref().unwrap_or("-");
            writeln!(self.out, "[{}] {}{} #{}", time, message.author, you, id)?;
        }
        writeln!(self.out, "    {}", message.body)
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out
    }
}

fn connectivity_label(state: ConnectivityState) -> &'static str {
    match state {
        ConnectivityState::Disconnected => "disconnected",
        ConnectivityState::Connecting => "connecting",
        ConnectivityState::Connected => "connected",
        ConnectivityState::Reconnecting => "reconnecting",
    }
}

/// A line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Post a message.
    Message(String),
    /// Replace the draft.
    Draft(String),
    /// Delete a message by id.
    Delete(String),
    /// Reconnect after giving up.
    Reconnect,
    /// Sign out and exit.
    Quit,
    /// Blank line.
    Empty,
    /// Unrecognised slash command.
    Unknown(String),
}

impl Input {
    /// Parse one line of input.
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Input::Empty;
        }
        let Some(command) = trimmed.strip_prefix('/') else {
            return Input::Message(trimmed.to_string());
        };

        let (name, rest) = command.split_once(' ').unwrap_or((command, ""));
        let rest = rest.trim();
        match name {
            "draft" => Input::Draft(rest.to_string()),
            "delete" if !rest.is_empty() => Input::Delete(rest.to_string()),
            "reconnect" => Input::Reconnect,
            "quit" | "exit" => Input::Quit,
            _ => Input::Unknown(name.to_string()),
        }
    }
}
