//! Transport session: one logical connection with bounded reconnection.
//!
//! A [`TransportSession`] runs as its own task. It owns the physical
//! connection, reconnects according to a [`ReconnectPolicy`], re-announces the
//! local identity after every successful connect, and delivers lifecycle and
//! inbound events in order on a single channel. Callers talk to it through a
//! cloneable [`SessionHandle`].
//!
//! Outbound events issued while no connection is open are dropped, never
//! buffered.

use parley_protocol::{OutboundEvent, RawEvent};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

use crate::policy::ReconnectPolicy;
use crate::traits::{Connection, Connector, TransportError};

/// Connectivity of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Connection lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// First connection attempt started.
    Connecting,
    /// A connection is open.
    Connected,
    /// The open connection went away.
    Disconnected {
        /// Why the connection ended.
        reason: String,
    },
    /// Waiting for reconnection attempt number `attempt`.
    Reconnecting {
        /// 1-based attempt counter.
        attempt: u32,
    },
    /// Every allowed attempt failed; the session stays disconnected until
    /// [`SessionHandle::reconnect`] is called.
    ReconnectFailed,
}

/// Everything a session delivers, in delivery order.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Connection lifecycle change.
    Lifecycle(LifecycleEvent),
    /// An event received from the server.
    Inbound(RawEvent),
}

/// Receiving end of a session's event stream.
pub type SessionEvents = mpsc::UnboundedReceiver<SessionEvent>;

#[derive(Debug)]
enum Command {
    Send(OutboundEvent),
    Announce(String),
    ForgetIdentity,
    Disconnect,
    Reconnect,
}

/// Handle for driving a running session.
///
/// The session task ends when every handle is dropped, or when the event
/// receiver is dropped.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectivityState>,
}

impl SessionHandle {
    /// Send an event on the current connection.
    ///
    /// Best-effort: the event is dropped if no connection is open.
    pub fn send(&self, event: OutboundEvent) {
        self.command(Command::Send(event));
    }

    /// Set the identity and join with it; it is re-announced after every
    /// reconnect.
    pub fn announce(&self, username: impl Into<String>) {
        self.command(Command::Announce(username.into()));
    }

    /// Stop re-announcing an identity on reconnect.
    pub fn forget_identity(&self) {
        self.command(Command::ForgetIdentity);
    }

    /// Close the connection and stay disconnected until [`reconnect`](Self::reconnect).
    pub fn disconnect(&self) {
        self.command(Command::Disconnect);
    }

    /// Start connecting again after a disconnect or exhausted attempts, or
    /// skip a pending backoff delay.
    pub fn reconnect(&self) {
        self.command(Command::Reconnect);
    }

    /// Current connectivity state.
    #[must_use]
    pub fn state(&self) -> ConnectivityState {
        *self.state.borrow()
    }

    /// Subscribe to connectivity changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectivityState> {
        self.state.clone()
    }

    fn command(&self, command: Command) {
        if let Err(e) = self.commands.send(command) {
            debug!(command = ?e.0, "Session task has stopped, dropping command");
        }
    }
}

enum Established {
    Open(Box<dyn Connection>),
    Failed(TransportError),
    Disconnect,
    Shutdown,
}

enum Exit {
    Lost(String),
    Disconnect,
    Shutdown,
}

enum Wake {
    Elapsed,
    Reconnect,
    Disconnect,
    Shutdown,
}

/// The session task state.
pub struct TransportSession {
    connector: Arc<dyn Connector>,
    endpoint: String,
    identity: Option<String>,
    policy: ReconnectPolicy,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<SessionEvent>,
    state: watch::Sender<ConnectivityState>,
}

impl TransportSession {
    /// Spawn a session connecting to `endpoint`.
    ///
    /// If `identity` is set it is announced on every successful connect.
    /// Must be called from within a tokio runtime.
    pub fn connect(
        connector: Arc<dyn Connector>,
        endpoint: impl Into<String>,
        identity: Option<String>,
        policy: ReconnectPolicy,
    ) -> (SessionHandle, SessionEvents) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectivityState::Disconnected);

        let session = Self {
            connector,
            endpoint: endpoint.into(),
            identity,
            policy,
            commands: command_rx,
            events: event_tx,
            state: state_tx,
        };
        tokio::spawn(session.run());

        (
            SessionHandle {
                commands: command_tx,
                state: state_rx,
            },
            event_rx,
        )
    }

    async fn run(mut self) {
        info!(
            endpoint = %self.endpoint,
            transport = self.connector.name(),
            "Starting transport session"
        );

        let mut attempt: u32 = 0;

        loop {
            if self.events.is_closed() {
                break;
            }

            if attempt == 0 {
                self.transition(ConnectivityState::Connecting, LifecycleEvent::Connecting);
            } else {
                self.transition(
                    ConnectivityState::Reconnecting,
                    LifecycleEvent::Reconnecting { attempt },
                );
                match self.idle(self.policy.delay_for(attempt)).await {
                    Wake::Elapsed | Wake::Reconnect => {}
                    Wake::Disconnect => {
                        if !self.stay_disconnected("client disconnect").await {
                            break;
                        }
                        attempt = 0;
                        continue;
                    }
                    Wake::Shutdown => break,
                }
            }

            match self.establish().await {
                Established::Open(conn) => {
                    attempt = 0;
                    match self.pump(conn).await {
                        Exit::Lost(reason) => {
                            self.transition(
                                ConnectivityState::Disconnected,
                                LifecycleEvent::Disconnected { reason },
                            );
                            if self.policy.allows_after(0) {
                                attempt = 1;
                            } else if !self.give_up().await {
                                break;
                            }
                        }
                        Exit::Disconnect => {
                            if !self.stay_disconnected("client disconnect").await {
                                break;
                            }
                        }
                        Exit::Shutdown => break,
                    }
                }
                Established::Failed(error) => {
                    warn!(endpoint = %self.endpoint, attempt, error = %error, "Connection attempt failed");
                    if self.policy.allows_after(attempt) {
                        attempt += 1;
                    } else {
                        if !self.give_up().await {
                            break;
                        }
                        attempt = 0;
                    }
                }
                Established::Disconnect => {
                    if !self.stay_disconnected("client disconnect").await {
                        break;
                    }
                    attempt = 0;
                }
                Established::Shutdown => break,
            }
        }

        self.state.send_replace(ConnectivityState::Disconnected);
        debug!(endpoint = %self.endpoint, "Transport session stopped");
    }

    fn transition(&mut self, state: ConnectivityState, event: LifecycleEvent) {
        trace!(?state, ?event, "Session transition");
        self.state.send_replace(state);
        self.emit(SessionEvent::Lifecycle(event));
    }

    fn emit(&self, event: SessionEvent) -> bool {
        self.events.send(event).is_ok()
    }

    /// Handle a command that arrived while no connection is open.
    fn apply_offline(&mut self, command: Command) {
        match command {
            Command::Send(event) => {
                debug!(event = %event.kind(), "Not connected, dropping outbound event");
            }
            Command::Announce(username) => self.identity = Some(username),
            Command::ForgetIdentity => self.identity = None,
            Command::Disconnect | Command::Reconnect => {}
        }
    }

    /// Try to open a connection within the connect timeout.
    async fn establish(&mut self) -> Established {
        let connector = Arc::clone(&self.connector);
        let endpoint = self.endpoint.clone();
        let attempt = tokio::time::timeout(self.policy.connect_timeout, connector.connect(&endpoint));
        tokio::pin!(attempt);

        loop {
            tokio::select! {
                result = &mut attempt => {
                    return match result {
                        Ok(Ok(conn)) => Established::Open(conn),
                        Ok(Err(e)) => Established::Failed(e),
                        Err(_) => Established::Failed(TransportError::Timeout),
                    };
                }
                command = self.commands.recv() => match command {
                    Some(Command::Disconnect) => return Established::Disconnect,
                    Some(command) => self.apply_offline(command),
                    None => return Established::Shutdown,
                },
            }
        }
    }

    /// Drive an open connection until it ends.
    async fn pump(&mut self, mut conn: Box<dyn Connection>) -> Exit {
        let id = conn.id().clone();
        info!(connection = %id, endpoint = %self.endpoint, "Connected");
        self.transition(ConnectivityState::Connected, LifecycleEvent::Connected);

        if let Some(username) = self.identity.clone() {
            debug!(connection = %id, username = %username, "Announcing identity");
            Self::deliver(conn.as_mut(), OutboundEvent::join(username)).await;
        }

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Send(event)) => Self::deliver(conn.as_mut(), event).await,
                    Some(Command::Announce(username)) => {
                        self.identity = Some(username.clone());
                        Self::deliver(conn.as_mut(), OutboundEvent::join(username)).await;
                    }
                    Some(Command::ForgetIdentity) => self.identity = None,
                    Some(Command::Disconnect) => {
                        Self::close(conn.as_mut()).await;
                        return Exit::Disconnect;
                    }
                    Some(Command::Reconnect) => trace!(connection = %id, "Already connected"),
                    None => {
                        Self::close(conn.as_mut()).await;
                        return Exit::Shutdown;
                    }
                },
                frame = conn.recv() => match frame {
                    Ok(Some(event)) => {
                        trace!(connection = %id, event = %event.event, "Received event");
                        if !self.emit(SessionEvent::Inbound(event)) {
                            Self::close(conn.as_mut()).await;
                            return Exit::Shutdown;
                        }
                    }
                    Ok(None) => {
                        debug!(connection = %id, "Connection closed by server");
                        return Exit::Lost("connection closed by server".into());
                    }
                    Err(TransportError::Protocol(e)) => {
                        warn!(connection = %id, error = %e, "Dropping undecodable frame");
                    }
                    Err(e) => {
                        warn!(connection = %id, error = %e, "Connection lost");
                        return Exit::Lost(e.to_string());
                    }
                },
            }
        }
    }

    async fn deliver(conn: &mut dyn Connection, event: OutboundEvent) {
        let kind = event.kind();
        match conn.send(event.into_raw()).await {
            Ok(()) => trace!(connection = %conn.id(), event = %kind, "Sent event"),
            Err(e) => warn!(connection = %conn.id(), event = %kind, error = %e, "Failed to send event"),
        }
    }

    async fn close(conn: &mut dyn Connection) {
        if let Err(e) = conn.close().await {
            debug!(connection = %conn.id(), error = %e, "Error while closing connection");
        }
    }

    /// Wait out a backoff delay, handling commands meanwhile.
    async fn idle(&mut self, delay: std::time::Duration) -> Wake {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return Wake::Elapsed,
                command = self.commands.recv() => match command {
                    Some(Command::Reconnect) => return Wake::Reconnect,
                    Some(Command::Disconnect) => return Wake::Disconnect,
                    Some(command) => self.apply_offline(command),
                    None => return Wake::Shutdown,
                },
            }
        }
    }

    async fn stay_disconnected(&mut self, reason: &str) -> bool {
        info!(endpoint = %self.endpoint, reason, "Disconnected");
        self.transition(
            ConnectivityState::Disconnected,
            LifecycleEvent::Disconnected {
                reason: reason.to_string(),
            },
        );
        self.wait_for_reconnect().await
    }

    /// Report exhausted attempts and park. Returns `false` on shutdown.
    async fn give_up(&mut self) -> bool {
        warn!(endpoint = %self.endpoint, "Reconnection attempts exhausted");
        self.transition(
            ConnectivityState::Disconnected,
            LifecycleEvent::ReconnectFailed,
        );
        self.wait_for_reconnect().await
    }

    /// Park until asked to reconnect. Returns `false` on shutdown.
    async fn wait_for_reconnect(&mut self) -> bool {
        loop {
            match self.commands.recv().await {
                Some(Command::Reconnect) => return true,
                Some(command) => self.apply_offline(command),
                None => return false,
            }
        }
    }
}
