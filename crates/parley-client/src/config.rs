//! Client configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (PARLEY_ENDPOINT, PARLEY_API_URL)
//! - TOML configuration file
//! - Command line arguments (`--config`, `--endpoint`)

use anyhow::{Context, Result};
use parley_protocol::Encoding;
use parley_transport::{Backoff, ReconnectPolicy, WebSocketConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// WebSocket endpoint of the chat server.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Base URL of the HTTP API (login, signup, history).
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Reconnection behaviour.
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Typing indicator configuration.
    #[serde(default)]
    pub typing: TypingConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Reconnection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt in milliseconds.
    #[serde(default = "default_reconnect_delay")]
    pub delay_ms: u64,

    /// Upper bound for exponential backoff in milliseconds.
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Double the delay after each failed attempt.
    #[serde(default = "default_true")]
    pub exponential: bool,

    /// Attempts before giving up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Timeout for a single connection attempt in milliseconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Send MessagePack binary frames instead of JSON text frames.
    #[serde(default)]
    pub binary_frames: bool,

    /// Maximum inbound message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Typing indicator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypingConfig {
    /// Inactivity before our typing indicator stops, in milliseconds.
    #[serde(default = "default_typing_idle")]
    pub idle_timeout_ms: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable the Prometheus exporter.
    #[serde(default)]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_endpoint() -> String {
    std::env::var("PARLEY_ENDPOINT").unwrap_or_else(|_| "ws://127.0.0.1:5000/ws".to_string())
}

fn default_api_url() -> String {
    std::env::var("PARLEY_API_URL").unwrap_or_else(|_| "http://127.0.0.1:5000".to_string())
}

fn default_true() -> bool {
    true
}

fn default_reconnect_delay() -> u64 {
    1_000
}

fn default_max_delay() -> u64 {
    5_000
}

fn default_max_attempts() -> u32 {
    10
}

fn default_connect_timeout() -> u64 {
    10_000 // 10 seconds
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_typing_idle() -> u64 {
    2_000
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_url: default_api_url(),
            reconnect: ReconnectConfig::default(),
            transport: TransportConfig::default(),
            typing: TypingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_reconnect_delay(),
            max_delay_ms: default_max_delay(),
            exponential: true,
            max_attempts: default_max_attempts(),
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            binary_frames: false,
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for TypingConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: default_typing_idle(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, the default locations, or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }

        let config_paths = ["parley.toml", "~/.config/parley/parley.toml"];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Build the transport session's reconnection policy.
    #[must_use]
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        let r = &self.reconnect;
        let backoff = if r.exponential {
            Backoff::Exponential {
                max_delay: Duration::from_millis(r.max_delay_ms),
            }
        } else {
            Backoff::Fixed
        };

        ReconnectPolicy {
            backoff,
            delay: Duration::from_millis(r.delay_ms),
            max_attempts: r.max_attempts,
            connect_timeout: Duration::from_millis(r.connect_timeout_ms),
        }
    }

    /// Build the WebSocket connector configuration.
    #[must_use]
    pub fn websocket(&self) -> WebSocketConfig {
        WebSocketConfig {
            max_message_size: self.transport.max_message_size,
            encoding: if self.transport.binary_frames {
                Encoding::MessagePack
            } else {
                Encoding::Json
            },
        }
    }

    /// Inactivity before our typing indicator stops.
    #[must_use]
    pub fn typing_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.typing.idle_timeout_ms)
    }
}
