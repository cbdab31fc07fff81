//! Control Plane Module
//!
//! The DR switchover logic and its adapters:
//! - [`orchestrator`]: switchover sequencing under the shared lock
//! - [`users_recovery`]: password restore after promotion
//! - [`status`], [`poll`], [`fingerprint`]: shared helpers
//! - [`backends`], [`platform`]: HTTP and Kubernetes adapters
//! - [`api`]: DR health endpoint

pub mod api;
pub mod backends;
pub mod fingerprint;
pub mod orchestrator;
pub mod platform;
pub mod poll;
pub mod status;
pub mod users_recovery;

pub use api::{HealthRouter, HealthServer, HealthServerConfig};
pub use orchestrator::{
    is_replication_check_needed, OrchestratorConfig, ReconcileContext, SwitchoverOrchestrator,
    SwitchoverPorts,
};
pub use users_recovery::{UsersRecoveryConfig, UsersRecoveryCoordinator};
