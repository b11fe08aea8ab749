//! Fallback connector.
//!
//! Tries several connectors in order of preference and uses the first one
//! that produces a connection.

use crate::traits::{Connection, Connector, TransportError};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// A connector that tries multiple connectors in order of preference.
pub struct FallbackConnector {
    connectors: Vec<Arc<dyn Connector>>,
}

impl FallbackConnector {
    /// Create a new fallback connector.
    ///
    /// Connectors are tried in order (first = highest priority).
    #[must_use]
    pub fn new(connectors: Vec<Arc<dyn Connector>>) -> Self {
        Self { connectors }
    }

    /// Add a connector to the end of the chain.
    pub fn add_connector(&mut self, connector: Arc<dyn Connector>) {
        self.connectors.push(connector);
    }

    /// Get the list of connector names in priority order.
    #[must_use]
    pub fn connector_names(&self) -> Vec<&'static str> {
        self.connectors.iter().map(|c| c.name()).collect()
    }
}

#[async_trait]
impl Connector for FallbackConnector {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn Connection>, TransportError> {
        let mut last_error = None;

        for connector in &self.connectors {
            if !connector.is_healthy() {
                debug!(transport = connector.name(), "Skipping unhealthy connector");
                continue;
            }

            match connector.connect(endpoint).await {
                Ok(conn) => {
                    debug!(transport = connector.name(), connection = %conn.id(), "Connected");
                    return Ok(conn);
                }
                Err(e) => {
                    warn!(transport = connector.name(), error = %e, "Connector failed, trying next");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| TransportError::Other("No healthy connectors available".into())))
    }

    fn name(&self) -> &'static str {
        "fallback"
    }

    fn is_healthy(&self) -> bool {
        self.connectors.iter().any(|c| c.is_healthy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{self, MemoryMode};

    #[tokio::test]
    async fn test_falls_through_to_next_connector() {
        let (primary, primary_listener) = memory::channel();
        let (secondary, mut secondary_listener) = memory::channel();
        primary_listener.set_mode(MemoryMode::Refuse);

        let fallback = FallbackConnector::new(vec![
            Arc::new(primary) as Arc<dyn Connector>,
            Arc::new(secondary),
        ]);
        assert_eq!(fallback.connector_names(), vec!["memory", "memory"]);

        let conn = fallback.connect("memory://chat").await.unwrap();
        let peer = secondary_listener.accept().await.unwrap();
        assert_eq!(peer.id(), conn.id());
    }

    #[tokio::test]
    async fn test_skips_unhealthy_connectors() {
        let (primary, primary_listener) = memory::channel();
        let (secondary, mut secondary_listener) = memory::channel();
        drop(primary_listener);

        let mut fallback = FallbackConnector::new(vec![Arc::new(primary) as Arc<dyn Connector>]);
        assert!(!fallback.is_healthy());
        assert!(matches!(
            fallback.connect("memory://chat").await,
            Err(TransportError::Other(_))
        ));

        fallback.add_connector(Arc::new(secondary));
        assert!(fallback.is_healthy());
        assert!(fallback.connect("memory://chat").await.is_ok());
        assert!(secondary_listener.accept().await.is_some());
    }

    #[tokio::test]
    async fn test_reports_last_error() {
        let (only, listener) = memory::channel();
        listener.set_mode(MemoryMode::Refuse);

        let fallback = FallbackConnector::new(vec![Arc::new(only) as Arc<dyn Connector>]);
        assert!(matches!(
            fallback.connect("memory://chat").await,
            Err(TransportError::ConnectFailed(_))
        ));
    }
}
