//! In-process transport.
//!
//! [`MemoryConnector`] opens connections whose server half is handed to a
//! [`MemoryListener`]. The caller plays the server: it accepts
//! [`MemoryPeer`]s, pushes events to the client and reads what the client
//! sends. Frames are JSON-encoded on the way in, so undecodable input behaves
//! the same as on a real socket.

use async_trait::async_trait;
use parley_protocol::{codec, RawEvent};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::debug;

use crate::traits::{Connection, ConnectionId, Connector, TransportError};

/// How the connector answers connection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemoryMode {
    /// Connections succeed.
    #[default]
    Accept,
    /// Connections fail immediately.
    Refuse,
    /// Connection attempts never complete.
    Stall,
}

/// Create a connected connector/listener pair.
#[must_use]
pub fn channel() -> (MemoryConnector, MemoryListener) {
    let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
    let mode = Arc::new(Mutex::new(MemoryMode::Accept));

    (
        MemoryConnector {
            accepted: accepted_tx,
            mode: Arc::clone(&mode),
        },
        MemoryListener {
            incoming: accepted_rx,
            mode,
        },
    )
}

/// Client side: opens in-process connections.
pub struct MemoryConnector {
    accepted: mpsc::UnboundedSender<MemoryPeer>,
    mode: Arc<Mutex<MemoryMode>>,
}

impl MemoryConnector {
    fn mode(&self) -> MemoryMode {
        self.mode.lock().map(|m| *m).unwrap_or_default()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn Connection>, TransportError> {
        match self.mode() {
            MemoryMode::Accept => {}
            MemoryMode::Refuse => {
                return Err(TransportError::ConnectFailed(format!(
                    "{endpoint}: connection refused"
                )))
            }
            MemoryMode::Stall => std::future::pending::<()>().await,
        }

        let (to_client, from_server) = mpsc::unbounded_channel();
        let (to_server, from_client) = mpsc::unbounded_channel();
        let id = ConnectionId::generate();

        let peer = MemoryPeer {
            id: id.clone(),
            to_client,
            from_client,
        };
        self.accepted
            .send(peer)
            .map_err(|_| TransportError::ConnectFailed(format!("{endpoint}: no listener")))?;

        debug!(connection = %id, endpoint = %endpoint, "Memory connection opened");

        Ok(Box::new(MemoryConnection {
            id,
            incoming: from_server,
            outgoing: to_server,
            is_open: true,
        }))
    }

    fn name(&self) -> &'static str {
        "memory"
    }

    fn is_healthy(&self) -> bool {
        !self.accepted.is_closed()
    }
}

/// Server side: receives connections opened by the paired connector.
pub struct MemoryListener {
    incoming: mpsc::UnboundedReceiver<MemoryPeer>,
    mode: Arc<Mutex<MemoryMode>>,
}

impl MemoryListener {
    /// Wait for the next connection.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.incoming.recv().await
    }

    /// Change how future connection attempts are answered.
    pub fn set_mode(&self, mode: MemoryMode) {
        if let Ok(mut current) = self.mode.lock() {
            *current = mode;
        }
    }
}

/// The server half of one in-process connection.
///
/// Dropping the peer closes the connection from the server side.
pub struct MemoryPeer {
    id: ConnectionId,
    to_client: mpsc::UnboundedSender<String>,
    from_client: mpsc::UnboundedReceiver<RawEvent>,
}

impl MemoryPeer {
    /// Identifier shared with the client half.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Push an event to the client. Returns `false` if the client is gone.
    pub fn send(&self, event: &RawEvent) -> bool {
        match codec::encode_json(event) {
            Ok(text) => self.send_text(text),
            Err(_) => false,
        }
    }

    /// Push a raw text frame to the client, valid or not.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.to_client.send(text.into()).is_ok()
    }

    /// Receive the next event the client sent.
    pub async fn recv(&mut self) -> Option<RawEvent> {
        self.from_client.recv().await
    }

    /// Take an already-sent event without waiting.
    pub fn try_recv(&mut self) -> Option<RawEvent> {
        self.from_client.try_recv().ok()
    }
}

/// The client half of one in-process connection.
pub struct MemoryConnection {
    id: ConnectionId,
    incoming: mpsc::UnboundedReceiver<String>,
    outgoing: mpsc::UnboundedSender<RawEvent>,
    is_open: bool,
}

#[async_trait]
impl Connection for MemoryConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    async fn recv(&mut self) -> Result<Option<RawEvent>, TransportError> {
        match self.incoming.recv().await {
            Some(text) => Ok(Some(codec::decode_json(&text)?)),
            None => {
                self.is_open = false;
                Ok(None)
            }
        }
    }

    async fn send(&mut self, event: RawEvent) -> Result<(), TransportError> {
        if !self.is_open {
            return Err(TransportError::ConnectionClosed);
        }
        self.outgoing
            .send(event)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.is_open = false;
        self.incoming.close();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.is_open
    }
}
