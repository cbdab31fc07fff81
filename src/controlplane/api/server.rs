//! DR Health Server
//!
//! Serves the DR health router until shutdown is signalled.

use crate::error::{Error, Result};
use crate::replication::ReplicationChecker;
use crate::metrics::DrMetrics;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::rest::HealthRouter;

// =============================================================================
// Server Configuration
// =============================================================================

/// Configuration for the DR health server
#[derive(Debug, Clone)]
pub struct HealthServerConfig {
    /// Bind address
    pub addr: SocketAddr,
    /// Log every response body
    pub verbose: bool,
}

impl Default for HealthServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 8069)),
            verbose: false,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// HTTP server for `GET /healthz`
pub struct HealthServer {
    config: HealthServerConfig,
    checker: ReplicationChecker,
    metrics: Option<Arc<DrMetrics>>,
}

impl HealthServer {
    pub fn new(config: HealthServerConfig, checker: ReplicationChecker) -> Self {
        Self {
            config,
            checker,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<DrMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Serve until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let mut router = HealthRouter::new(self.checker).verbose(self.config.verbose);
        if let Some(metrics) = self.metrics {
            router = router.with_metrics(metrics);
        }
        let app = router.build();

        let listener = tokio::net::TcpListener::bind(self.config.addr)
            .await
            .map_err(|e| Error::Internal(format!("Failed to bind DR health server: {}", e)))?;
        info!("DR health server listening on {}", self.config.addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                info!("DR health server shutting down");
            })
            .await
            .map_err(|e| Error::Internal(format!("DR health server error: {}", e)))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HealthServerConfig::default();
        assert_eq!(config.addr.port(), 8069);
        assert!(config.addr.ip().is_unspecified());
        assert!(!config.verbose);
    }
}
