//! # parley-core
//!
//! Conversation state for the Parley chat client.
//!
//! - **Reconciler** - applies server events and local actions to state
//! - **Ledger** - ordered, id-unique message list with header grouping
//! - **Presence** - the roster of active participants
//! - **Typing** - who is typing, and when our own indicator goes out
//! - **Snapshot** - immutable, versioned views handed to consumers
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐  SessionEvent  ┌──────────────┐  Arc<Snapshot>  ┌────────────┐
//! │ TransportSession │───────────────▶│  Reconciler  │────────────────▶│  Renderer  │
//! └──────────────────┘                └──────────────┘                 └────────────┘
//!          ▲                            │    │     │
//!          │      OutboundEvent         ▼    ▼     ▼
//!          └────────────────────── Ledger Presence Typing
//! ```

pub mod ledger;
pub mod message;
pub mod presence;
pub mod reconcile;
pub mod services;
pub mod snapshot;
pub mod typing;

pub use ledger::{shares_header, Entry, MessageLedger};
pub use message::{Message, MessageId, MessageKind};
pub use presence::PresenceRegister;
pub use reconcile::{Applied, ChatError, DropReason, Notification, Reconciler};
pub use services::{AuthError, AuthProvider, Credentials, HistoryError, HistoryProvider};
pub use snapshot::{JoinPhase, Snapshot, SnapshotDiff};
pub use typing::{TypingDebouncer, TypingTracker, DEFAULT_IDLE_TIMEOUT};
