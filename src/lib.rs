//! OpenSearch DR Operator - Switchover Control Plane
//!
//! A Kubernetes operator that switches the roles of an active/standby
//! OpenSearch cluster pair and keeps cross-cluster replication healthy.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                   OpenSearchService Controller                       │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────┐             ┌─────────────────────────┐ │
//! │  │  Switchover             │  shared     │  Replication Watcher    │ │
//! │  │  Orchestrator           │◄── lock ───►│  (self-healing)         │ │
//! │  └───────────┬─────────────┘             └────────────┬────────────┘ │
//! │              │  ┌──────────────────────────────────┐  │              │
//! │              └─►│  Replication Manager / Checker   │◄─┘              │
//! │                 └──────────────────────────────────┘                 │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │                          Adapters                                    │
//! │  ┌──────────────┐ ┌─────────────┐ ┌──────────────┐ ┌──────────────┐  │
//! │  │ OpenSearch   │ │ Peer Probe  │ │ DBaaS Users  │ │ Kubernetes   │  │
//! │  │ REST         │ │             │ │ Recovery     │ │ (kube)       │  │
//! │  └──────────────┘ └─────────────┘ └──────────────┘ └──────────────┘  │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`controller`]: kube-runtime controller and subsystem driver
//! - [`controlplane`]: switchover orchestration, adapters and the DR health API
//! - [`replication`]: replication checker, manager and watcher
//! - [`crd`]: Custom Resource Definitions
//! - [`domain`]: Core domain types and traits
//! - [`metrics`]: Prometheus metrics
//! - [`error`]: Error types and handling

pub mod controller;
pub mod controlplane;
pub mod crd;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod replication;

#[cfg(test)]
pub mod testing;

// Re-export commonly used types
pub use controller::{OperatorConfig, OperatorContext, SubsystemReconciler};

pub use controlplane::backends::{HttpPeerProbe, RestClient, RestClientConfig};
pub use controlplane::{
    HealthServer, HealthServerConfig, OrchestratorConfig, ReconcileContext,
    SwitchoverOrchestrator, SwitchoverPorts, UsersRecoveryCoordinator,
};

pub use crd::{
    DisasterRecoverySpec, DisasterRecoveryStatus, DrMode, OpenSearchService,
    OpenSearchServiceSpec, SwitchoverStatus, UsersRecoveryState,
};

pub use domain::ports::{
    ConfigSource, Credentials, DeploymentScaler, PeerProbe, ProbeOutcome, ResourceStore,
    RestResponse, SearchClient, TrafficGate, UsersRecoveryApi,
};

pub use error::{Error, ErrorAction, Result};

pub use metrics::DrMetrics;

pub use replication::{
    IndexPattern, ReplicationChecker, ReplicationManager, ReplicationVerdict, ReplicationWatcher,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
