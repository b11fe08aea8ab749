//! Client driver.
//!
//! [`ChatClient::start`] signs in, opens a transport session and spawns the
//! driver task. The driver owns the [`Reconciler`] and runs a single
//! `select!` loop over user commands, session events, history results and
//! the typing deadline, so state is never touched from two places at once.
//! Consumers read versioned snapshots from a `watch` channel and
//! notifications from a `broadcast` channel through a [`ClientHandle`].

use chrono::Utc;
use parley_core::{
    AuthProvider, ChatError, Credentials, HistoryError, HistoryProvider, Message, Notification,
    Reconciler, Snapshot,
};
use parley_protocol::OutboundEvent;
use parley_transport::{
    Connector, LifecycleEvent, ReconnectPolicy, SessionEvent, SessionEvents, SessionHandle,
    TransportSession,
};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::metrics;

/// Notification channel capacity.
const NOTIFICATION_CAPACITY: usize = 64;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The chat operation was refused.
    #[error(transparent)]
    Chat(#[from] ChatError),

    /// The driver task is no longer running.
    #[error("Client has stopped")]
    Stopped,
}

/// Settings for a client session.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Server endpoint.
    pub endpoint: String,
    /// Reconnection behaviour.
    pub policy: ReconnectPolicy,
    /// Inactivity before our typing indicator stops.
    pub typing_idle_timeout: Duration,
}

impl From<&Config> for ClientOptions {
    fn from(config: &Config) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            policy: config.reconnect_policy(),
            typing_idle_timeout: config.typing_idle_timeout(),
        }
    }
}

#[derive(Debug)]
enum Command {
    SendMessage(String, oneshot::Sender<Result<(), ChatError>>),
    DeleteMessage(String, oneshot::Sender<Result<(), ChatError>>),
    EditDraft(String),
    StopTyping,
    Reconnect,
    SignOut(oneshot::Sender<()>),
}

/// Handle to a running client.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    commands: mpsc::UnboundedSender<Command>,
    snapshots: watch::Receiver<Arc<Snapshot>>,
    notifications: broadcast::Sender<Notification>,
}

impl ClientHandle {
    /// Post a message.
    ///
    /// # Errors
    ///
    /// Fails if the message is blank, the session has not joined, or the
    /// client has stopped.
    pub async fn send_message(&self, body: impl Into<String>) -> Result<(), ClientError> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::SendMessage(body.into(), tx))?;
        Ok(rx.await.map_err(|_| ClientError::Stopped)??)
    }

    /// Ask the server to delete one of our messages.
    ///
    /// # Errors
    ///
    /// Fails if the message is unknown or not ours, or the client has stopped.
    pub async fn delete_message(&self, id: impl Into<String>) -> Result<(), ClientError> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::DeleteMessage(id.into(), tx))?;
        Ok(rx.await.map_err(|_| ClientError::Stopped)??)
    }

    /// Replace the draft; counts as a keystroke for the typing indicator.
    ///
    /// # Errors
    ///
    /// Fails if the client has stopped.
    pub fn edit_draft(&self, text: impl Into<String>) -> Result<(), ClientError> {
        self.command(Command::EditDraft(text.into()))
    }

    /// Stop the typing indicator now.
    ///
    /// # Errors
    ///
    /// Fails if the client has stopped.
    pub fn stop_typing(&self) -> Result<(), ClientError> {
        self.command(Command::StopTyping)
    }

    /// Reconnect after the session gave up.
    ///
    /// # Errors
    ///
    /// Fails if the client has stopped.
    pub fn reconnect(&self) -> Result<(), ClientError> {
        self.command(Command::Reconnect)
    }

    /// Sign out, disconnect and stop the client.
    pub async fn sign_out(&self) {
        let (tx, rx) = oneshot::channel();
        if self.command(Command::SignOut(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// The latest snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.snapshots.borrow())
    }

    /// Subscribe to snapshot updates.
    #[must_use]
    pub fn watch_snapshots(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.snapshots.clone()
    }

    /// Subscribe to notifications raised from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    fn command(&self, command: Command) -> Result<(), ClientError> {
        self.commands.send(command).map_err(|_| ClientError::Stopped)
    }
}

/// Entry point for starting a client.
pub struct ChatClient;

impl ChatClient {
    /// Authenticate, connect and start the driver task.
    ///
    /// # Errors
    ///
    /// Returns an error if authentication fails; nothing is connected then.
    pub async fn start(
        options: ClientOptions,
        connector: Arc<dyn Connector>,
        auth: &dyn AuthProvider,
        history: Arc<dyn HistoryProvider>,
        credentials: Credentials,
    ) -> Result<ClientHandle, ClientError> {
        let mut reconciler = Reconciler::new(options.typing_idle_timeout);
        let identity = reconciler.authenticate(auth, &credentials).await?;

        let (session, events) =
            TransportSession::connect(connector, options.endpoint, Some(identity), options.policy);

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(reconciler.snapshot());
        let (notification_tx, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        let (history_tx, history_rx) = mpsc::unbounded_channel();

        let driver = Driver {
            reconciler,
            session,
            events,
            commands: command_rx,
            snapshots: snapshot_tx,
            notifications: notification_tx.clone(),
            history,
            history_tx,
            history_rx,
        };
        tokio::spawn(driver.run());

        Ok(ClientHandle {
            commands: command_tx,
            snapshots: snapshot_rx,
            notifications: notification_tx,
        })
    }
}

struct Driver {
    reconciler: Reconciler,
    session: SessionHandle,
    events: SessionEvents,
    commands: mpsc::UnboundedReceiver<Command>,
    snapshots: watch::Sender<Arc<Snapshot>>,
    notifications: broadcast::Sender<Notification>,
    history: Arc<dyn HistoryProvider>,
    history_tx: mpsc::UnboundedSender<Result<Vec<Message>, HistoryError>>,
    history_rx: mpsc::UnboundedReceiver<Result<Vec<Message>, HistoryError>>,
}

impl Driver {
    async fn run(mut self) {
        loop {
            let deadline = self.reconciler.typing_deadline();

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if self.handle_command(command).is_break() {
                            break;
                        }
                    }
                    None => {
                        debug!("All client handles dropped");
                        self.sign_out();
                        break;
                    }
                },
                event = self.events.recv() => match event {
                    Some(event) => self.handle_session_event(event),
                    None => {
                        warn!("Transport session stopped");
                        break;
                    }
                },
                Some(result) = self.history_rx.recv() => self.handle_history(result),
                _ = sleep_until(deadline) => {
                    if let Some(event) = self.reconciler.expire_typing(Instant::now()) {
                        self.send(event);
                    }
                }
            }
        }
        debug!("Client driver stopped");
    }

    fn handle_command(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::SendMessage(body, reply) => {
                let result = self.reconciler.send_message(&body).map(|events| {
                    for event in events {
                        self.send(event);
                    }
                });
                let _ = reply.send(result);
            }
            Command::DeleteMessage(id, reply) => {
                let result = self
                    .reconciler
                    .delete_message(&id)
                    .map(|event| self.send(event));
                let _ = reply.send(result);
            }
            Command::EditDraft(text) => {
                if let Some(event) = self.reconciler.edit_draft(text, Instant::now()) {
                    self.send(event);
                }
            }
            Command::StopTyping => {
                if let Some(event) = self.reconciler.stop_typing() {
                    self.send(event);
                }
            }
            Command::Reconnect => self.session.reconnect(),
            Command::SignOut(done) => {
                self.sign_out();
                let _ = done.send(());
                return ControlFlow::Break(());
            }
        }
        self.publish();
        ControlFlow::Continue(())
    }

    fn handle_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Lifecycle(lifecycle) => {
                match &lifecycle {
                    LifecycleEvent::Connected => metrics::set_connected(true),
                    LifecycleEvent::Disconnected { reason } => {
                        info!(reason = %reason, "Disconnected from server");
                        metrics::set_connected(false);
                    }
                    LifecycleEvent::Reconnecting { attempt } => {
                        debug!(attempt, "Reconnecting");
                        metrics::record_reconnect();
                    }
                    LifecycleEvent::ReconnectFailed => {
                        warn!("Giving up on reconnecting");
                        metrics::set_connected(false);
                    }
                    LifecycleEvent::Connecting => {}
                }
                if self.reconciler.handle_lifecycle(&lifecycle) {
                    self.publish();
                }
            }
            SessionEvent::Inbound(raw) => {
                metrics::record_inbound(&raw.event);
                let applied = self.reconciler.apply(&raw, Utc::now());
                if let Some(reason) = applied.dropped {
                    metrics::record_dropped(reason.as_str());
                }
                if applied.changed {
                    self.publish();
                }
                for notification in applied.notifications {
                    if notification == Notification::Joined {
                        self.fetch_history();
                    }
                    // No subscribers is fine.
                    let _ = self.notifications.send(notification);
                }
            }
        }
    }

    fn fetch_history(&self) {
        let history = Arc::clone(&self.history);
        let results = self.history_tx.clone();
        tokio::spawn(async move {
            let _ = results.send(history.history().await);
        });
    }

    fn handle_history(&mut self, result: Result<Vec<Message>, HistoryError>) {
        match result {
            Ok(messages) => {
                debug!(count = messages.len(), "History fetched");
                if self.reconciler.replay_history(messages) {
                    self.publish();
                }
            }
            Err(e) => warn!(error = %e, "Failed to fetch history"),
        }
    }

    fn sign_out(&mut self) {
        if let Some(event) = self.reconciler.sign_out() {
            self.send(event);
        }
        self.session.forget_identity();
        self.session.disconnect();
        self.publish();
    }

    fn send(&self, event: OutboundEvent) {
        metrics::record_outbound(event.kind().as_str());
        self.session.send(event);
    }

    fn publish(&self) {
        metrics::set_ledger_size(self.reconciler.ledger().len());
        self.snapshots.send_replace(self.reconciler.snapshot());
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
