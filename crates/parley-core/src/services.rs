//! Request/response collaborators: authentication and message history.
//!
//! Both are one-shot fetches made once per session. The reconciler only
//! depends on these traits; `parley-client` provides the HTTP implementation.

use async_trait::async_trait;
use thiserror::Error;

use crate::message::Message;

/// Credentials for signing in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Sign in to an existing account.
    Login {
        /// Account phone number.
        phone: String,
        /// Account password.
        password: String,
    },
    /// Create an account and sign in.
    Signup {
        /// Display name.
        name: String,
        /// Account phone number.
        phone: String,
        /// Account password.
        password: String,
    },
}

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The server refused the credentials.
    #[error("Authentication rejected: {0}")]
    Rejected(String),

    /// The server could not be reached or answered nonsense.
    #[error("Authentication service unavailable: {0}")]
    Unavailable(String),
}

/// History fetch errors.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// The request failed.
    #[error("History request failed: {0}")]
    Request(String),

    /// The response could not be interpreted.
    #[error("Invalid history response: {0}")]
    InvalidResponse(String),
}

/// Exchanges credentials for an identity.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Authenticate and return the display name to join with.
    async fn authenticate(&self, credentials: &Credentials) -> Result<String, AuthError>;
}

/// Fetches the conversation so far.
#[async_trait]
pub trait HistoryProvider: Send + Sync {
    /// Fetch all stored messages, oldest first.
    async fn history(&self) -> Result<Vec<Message>, HistoryError>;
}
