//! Domain Ports - Core trait definitions for the DR operator
//!
//! These traits define the boundaries between the switchover logic and the
//! systems it drives: the search cluster REST API, Kubernetes objects, the peer
//! cluster and the DBaaS users-recovery endpoints. Adapters implement these
//! traits to provide concrete functionality.

use crate::crd::OpenSearchService;
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// REST Response
// =============================================================================

/// Raw response from a REST call: status code and body text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestResponse {
    pub status: u16,
    pub body: String,
}

impl RestResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Deserialize the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.body)?)
    }

    /// Fail with an `UnexpectedStatus` error when the status is 400 or above
    pub fn error_for_status(self, operation: &str) -> Result<Self> {
        if self.status >= 400 {
            Err(Error::unexpected_status(operation, self.status, self.body))
        } else {
            Ok(self)
        }
    }
}

// =============================================================================
// Credentials
// =============================================================================

/// Basic-auth credentials
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Credentials are only sent when both parts are present
    pub fn is_complete(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

// =============================================================================
// Search Client Port
// =============================================================================

/// Generic REST access to a search cluster
#[async_trait]
pub trait SearchClient: Send + Sync {
    /// Send a request to `path` (relative to the cluster URL) with an optional JSON body.
    /// Transport failures are errors; every HTTP status is returned as a response.
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<RestResponse>;
}

// =============================================================================
// Kubernetes Collaborator Ports
// =============================================================================

/// Gates external client traffic to a cluster by toggling its Service
#[async_trait]
pub trait TrafficGate: Send + Sync {
    async fn disable(&self, service: &str) -> Result<()>;

    async fn enable(&self, service: &str) -> Result<()>;
}

/// Scales deployments owned by the operator
#[async_trait]
pub trait DeploymentScaler: Send + Sync {
    /// Set the replica count; when `wait` is set, block until ready replicas match
    async fn scale(&self, name: &str, replicas: i32, wait: bool) -> Result<()>;
}

/// Reads user-managed config objects and secrets
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Data of a ConfigMap
    async fn config_data(&self, name: &str) -> Result<BTreeMap<String, String>>;

    /// Credentials from a Secret under the given keys
    async fn credentials(&self, secret: &str, username_key: &str, password_key: &str)
        -> Result<Credentials>;
}

/// Read/replace access to one OpenSearchService resource
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Fetch the latest version of the resource
    async fn get(&self) -> Result<OpenSearchService>;

    /// Replace the status of `resource`; a stale `resourceVersion` yields `Error::Conflict`
    async fn replace_status(&self, resource: &OpenSearchService) -> Result<OpenSearchService>;
}

// =============================================================================
// Peer Probe Port
// =============================================================================

/// Result of the pre-flight connectivity probe against the peer cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Connection refused or closed without a response: the peer is taken to be active
    PeerActive,
    /// The peer answered with an HTTP response
    Responded(u16),
    /// Any other failure (timeout, DNS, TLS, ...)
    Unreachable(String),
}

/// Pre-flight connectivity check against the peer cluster
#[async_trait]
pub trait PeerProbe: Send + Sync {
    async fn probe(&self, address: &str) -> ProbeOutcome;
}

// =============================================================================
// Users Recovery Port
// =============================================================================

/// Password-restore endpoints exposed by the DBaaS aggregator and adapter
#[async_trait]
pub trait UsersRecoveryApi: Send + Sync {
    /// Ask the aggregator to restore user passwords; Ok only on HTTP 200
    async fn request_restore(&self) -> Result<()>;

    /// Current state string reported by the adapter
    async fn restore_state(&self) -> Result<String>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type SearchClientRef = Arc<dyn SearchClient>;
pub type TrafficGateRef = Arc<dyn TrafficGate>;
pub type DeploymentScalerRef = Arc<dyn DeploymentScaler>;
pub type ConfigSourceRef = Arc<dyn ConfigSource>;
pub type ResourceStoreRef = Arc<dyn ResourceStore>;
pub type PeerProbeRef = Arc<dyn PeerProbe>;
pub type UsersRecoveryApiRef = Arc<dyn UsersRecoveryApi>;
