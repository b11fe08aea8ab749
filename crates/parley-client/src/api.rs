//! HTTP API client for authentication and message history.

use async_trait::async_trait;
use parley_core::{AuthError, AuthProvider, Credentials, HistoryError, HistoryProvider, Message};
use parley_protocol::MessagePayload;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
#[serde(untagged)]
enum AuthRequest<'a> {
    Login {
        phone: &'a str,
        password: &'a str,
    },
    Signup {
        name: &'a str,
        phone: &'a str,
        password: &'a str,
    },
}

#[derive(Debug, Default, Deserialize)]
struct AuthResponse {
    #[serde(default)]
    user: Option<UserInfo>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    name: String,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    #[serde(default)]
    messages: Vec<Value>,
}

/// Talks to the chat server's HTTP endpoints.
#[derive(Debug, Clone)]
pub struct HttpApi {
    http: Client,
    base_url: String,
}

impl HttpApi {
    /// Create a client for the API at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .user_agent(concat!("parley/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl AuthProvider for HttpApi {
    async fn authenticate(&self, credentials: &Credentials) -> Result<String, AuthError> {
        let (path, request) = match credentials {
            Credentials::Login { phone, password } => (
                "/api/login",
                AuthRequest::Login { phone, password },
            ),
            Credentials::Signup {
                name,
                phone,
                password,
            } => (
                "/api/signup",
                AuthRequest::Signup {
                    name,
                    phone,
                    password,
                },
            ),
        };

        let response = self
            .http
            .post(self.url(path))
            .json(&request)
            .send()
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;

        let status = response.status();
        // Error bodies are not always JSON.
        let body = response.json::<AuthResponse>().await.ok();
        debug!(%status, path, "Authentication response");

        interpret_auth(status, body)
    }
}

#[async_trait]
impl HistoryProvider for HttpApi {
    async fn history(&self) -> Result<Vec<Message>, HistoryError> {
        let response: HistoryResponse = self
            .http
            .get(self.url("/api/messages"))
            .send()
            .await
            .map_err(|e| HistoryError::Request(e.to_string()))?
            .error_for_status()
            .map_err(|e| HistoryError::Request(e.to_string()))?
            .json()
            .await
            .map_err(|e| HistoryError::InvalidResponse(e.to_string()))?;

        Ok(parse_history(response.messages))
    }
}

fn interpret_auth(status: StatusCode, body: Option<AuthResponse>) -> Result<String, AuthError> {
    let body = body.unwrap_or_default();

    if status.is_server_error() {
        return Err(AuthError::Unavailable(
            body.error.unwrap_or_else(|| status.to_string()),
        ));
    }
    if !status.is_success() {
        return Err(AuthError::Rejected(
            body.error
                .unwrap_or_else(|| "Authentication failed".to_string()),
        ));
    }

    body.user
        .map(|user| user.name.trim().to_string())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| AuthError::Unavailable("Response did not include a user".to_string()))
}

/// Convert history entries, skipping any that are malformed.
fn parse_history(values: Vec<Value>) -> Vec<Message> {
    values
        .into_iter()
        .filter_map(|value| {
            let payload = match serde_json::from_value::<MessagePayload>(value) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(error = %e, "Skipping malformed history entry");
                    return None;
                }
            };
            if let Err(reason) = payload.validate() {
                warn!(reason, "Skipping invalid history entry");
                return None;
            }
            Some(Message::from(payload))
        })
        .collect()
}
