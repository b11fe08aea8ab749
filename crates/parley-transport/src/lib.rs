//! # parley-transport
//!
//! Connection handling for the Parley chat client.
//!
//! - **Connectors** open physical connections: WebSocket for real servers,
//!   an in-process pair for tests, and a fallback chain over several.
//! - **Sessions** keep one logical connection alive across drops, with a
//!   bounded [`ReconnectPolicy`], identity re-announcement and ordered
//!   lifecycle events.
//!
//! ```rust,ignore
//! use parley_transport::{ReconnectPolicy, SessionEvent, TransportSession, WebSocketConnector};
//! use std::sync::Arc;
//!
//! let connector = Arc::new(WebSocketConnector::default());
//! let (handle, mut events) = TransportSession::connect(
//!     connector,
//!     "ws://localhost:5000/ws",
//!     Some("alice".into()),
//!     ReconnectPolicy::default(),
//! );
//! while let Some(event) = events.recv().await {
//!     // Feed the reconciler
//! }
//! ```

pub mod fallback;
pub mod memory;
pub mod policy;
pub mod session;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use fallback::FallbackConnector;
pub use memory::{MemoryConnector, MemoryListener, MemoryMode, MemoryPeer};
pub use policy::{Backoff, ReconnectPolicy};
pub use session::{
    ConnectivityState, LifecycleEvent, SessionEvent, SessionEvents, SessionHandle,
    TransportSession,
};
pub use traits::{Connection, ConnectionId, Connector, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConfig, WebSocketConnector};
