//! # Parley
//!
//! Terminal client for a Parley chat server.
//!
//! ## Usage
//!
//! ```bash
//! # Sign in and chat; lines typed on stdin are posted
//! PARLEY_PASSWORD=secret parley login --phone 555-0100
//!
//! # Create an account first
//! parley signup --name alice --phone 555-0100 --password secret
//!
//! # Point at another server
//! parley --endpoint ws://chat.example.com/ws --api-url https://chat.example.com login --phone 555-0100
//! ```
//!
//! Besides plain messages, stdin accepts `/draft <text>`, `/delete <id>`,
//! `/reconnect` and `/quit`.

mod api;
mod client;
mod config;
mod metrics;
mod render;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use parley_core::{Credentials, Notification};
use parley_transport::WebSocketConnector;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api::HttpApi;
use crate::client::{ChatClient, ClientHandle, ClientOptions};
use crate::config::Config;
use crate::render::{Input, Renderer};

#[derive(Parser)]
#[command(name = "parley", version, about = "Terminal chat client")]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long, env = "PARLEY_CONFIG")]
    config: Option<PathBuf>,

    /// WebSocket endpoint, overriding the config file
    #[arg(long)]
    endpoint: Option<String>,

    /// HTTP API base URL, overriding the config file
    #[arg(long)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: AuthCommand,
}

#[derive(Subcommand)]
enum AuthCommand {
    /// Sign in to an existing account
    Login {
        #[arg(long)]
        phone: String,
        #[arg(long, env = "PARLEY_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Create an account and sign in
    Signup {
        #[arg(long)]
        name: String,
        #[arg(long)]
        phone: String,
        #[arg(long, env = "PARLEY_PASSWORD", hide_env_values = true)]
        password: String,
    },
}

impl From<AuthCommand> for Credentials {
    fn from(command: AuthCommand) -> Self {
        match command {
            AuthCommand::Login { phone, password } => Credentials::Login { phone, password },
            AuthCommand::Signup {
                name,
                phone,
                password,
            } => Credentials::Signup {
                name,
                phone,
                password,
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout belongs to the conversation.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(endpoint) = cli.endpoint {
        config.endpoint = endpoint;
    }
    if let Some(api_url) = cli.api_url {
        config.api_url = api_url;
    }

    metrics::init_metrics();
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            warn!(error = %e, "Failed to start metrics exporter");
        }
    }

    let api = Arc::new(HttpApi::new(config.api_url.clone()).context("Failed to build HTTP client")?);
    let connector = Arc::new(WebSocketConnector::new(config.websocket()));

    info!(endpoint = %config.endpoint, "Signing in");
    let handle = ChatClient::start(
        ClientOptions::from(&config),
        connector,
        api.as_ref(),
        api.clone(),
        cli.command.into(),
    )
    .await
    .context("Failed to sign in")?;
    if let Some(identity) = &handle.snapshot().identity {
        info!(%identity, "Signed in");
    }

    let renderer = tokio::spawn(render_loop(handle.clone()));
    let result = input_loop(&handle).await;

    handle.sign_out().await;
    renderer.abort();
    result
}

/// Draw snapshots as they change and ring the bell for peer messages.
async fn render_loop(handle: ClientHandle) {
    let mut renderer = Renderer::new(io::stdout());
    let mut snapshots = handle.watch_snapshots();
    let mut notifications = handle.subscribe();

    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                if let Err(e) = renderer.render(&snapshot) {
                    warn!(error = %e, "Failed to render");
                }
            }
            notification = notifications.recv() => match notification {
                Ok(Notification::MessageFromPeer(_)) => {
                    let _ = renderer.bell();
                }
                Ok(Notification::Joined) => debug!("Joined the chat"),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Notifications lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

/// Read commands from stdin until EOF, `/quit` or Ctrl-C.
async fn input_loop(handle: &ClientHandle) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            return Ok(());
        };

        match Input::parse(&line) {
            Input::Message(body) => {
                if let Err(e) = handle.send_message(body).await {
                    eprintln!("! {}", e);
                }
            }
            Input::Draft(text) if text.is_empty() => handle.stop_typing()?,
            Input::Draft(text) => handle.edit_draft(text)?,
            Input::Delete(id) => {
                if let Err(e) = handle.delete_message(id).await {
                    eprintln!("! {}", e);
                }
            }
            Input::Reconnect => handle.reconnect()?,
            Input::Quit => return Ok(()),
            Input::Empty => {}
            Input::Unknown(command) => eprintln!("! Unknown command: /{}", command),
        }
    }
}
