//! Error types for the OpenSearch DR Operator
//!
//! Provides structured error types for all operator components including
//! replication management, switchover orchestration, users recovery and
//! the Kubernetes adapters.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the operator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    #[error("Resource {kind}/{name} was modified concurrently")]
    Conflict { kind: String, name: String },

    // =========================================================================
    // Remote Cluster Errors
    // =========================================================================
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{operation} returned unexpected status code [{status}]: {body}")]
    UnexpectedStatus {
        operation: String,
        status: u16,
        body: String,
    },

    #[error("No permissions to delete OpenSearch indices by pattern [{pattern}]")]
    DeletePermissionDenied { pattern: String },

    #[error("Invalid index pattern [{pattern}]: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    // =========================================================================
    // Replication Errors
    // =========================================================================
    #[error(transparent)]
    ReplicationStart(#[from] StartFailure),

    #[error("Replication does not work correctly, there are failed indices: {indices:?}")]
    FailedIndices { indices: Vec<String> },

    #[error("Replication check was failed after {attempts} attempts, indices still in progress: {indices:?}")]
    ReplicationStuck { attempts: u32, indices: Vec<String> },

    #[error("There is no autofollow rule")]
    NoAutofollowRule,

    #[error("There is active replication on the other side: {0}")]
    PeerNotActive(String),

    #[error("Timed out after {duration:?} waiting for {operation}")]
    Timeout { operation: String, duration: Duration },

    // =========================================================================
    // Users Recovery Errors
    // =========================================================================
    #[error("Unable to restore OpenSearch users during switchover: {0}")]
    UsersRecovery(String),

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Root causes recognized in a failed autofollow start response
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StartFailure {
    #[error("leader and follower OpenSearch clusters have different admin and transport certs: {details}")]
    CertificateMismatch { details: String },

    #[error("the leader OpenSearch cluster was resolved but connection refused, check leader cluster configuration: {details}")]
    ConnectionRefused { details: String },

    #[error("the OpenSearch cluster with alias [{alias}] was not found, check that it was configured: {details}")]
    UnknownRemoteAlias { alias: String, details: String },

    #[error("remote OpenSearch cluster host [{host}] is invalid: {details}")]
    InvalidHostname { host: String, details: String },

    #[error("error occurred during start of DR replication [{status}]: {details}")]
    Other { status: u16, details: String },
}

/// Action to take on error during reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Requeue with exponential backoff
    RequeueWithBackoff,
    /// Requeue after specific duration
    RequeueAfter(Duration),
    /// Don't requeue, wait for changes
    NoRequeue,
}

impl Error {
    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Transient errors - retry with backoff
            Error::Http(_) | Error::Kube(_) | Error::Conflict { .. } => {
                ErrorAction::RequeueWithBackoff
            }

            // Remote side not converged yet - give it time
            Error::ReplicationStuck { .. } | Error::Timeout { .. } => {
                ErrorAction::RequeueAfter(Duration::from_secs(60))
            }

            // Peer state is ambiguous, operator intervention expected
            Error::PeerNotActive(_) => ErrorAction::RequeueAfter(Duration::from_secs(300)),

            // Configuration/validation errors - don't retry automatically
            Error::Configuration(_) | Error::InvalidPattern { .. } => ErrorAction::NoRequeue,

            // All other errors - retry with backoff
            _ => ErrorAction::RequeueWithBackoff,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRequeue)
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Http(_) | Error::Kube(_) | Error::Conflict { .. }
        )
    }

    /// Build an unexpected-status error for a remote call
    pub fn unexpected_status(operation: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        Error::UnexpectedStatus {
            operation: operation.into(),
            status,
            body: body.into(),
        }
    }
}

/// Result type alias for the operator
pub type Result<T> = std::result::Result<T, Error>;
