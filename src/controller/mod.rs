//! Controller Module
//!
//! - [`subsystem`]: capability interface and ordered driver
//! - [`disaster_recovery`]: DR subsystem and its per-resource runtime
//! - [`operator`]: kube-runtime controller loop

pub mod disaster_recovery;
pub mod operator;
pub mod subsystem;

pub use disaster_recovery::{DisasterRecoverySubsystem, DrRuntime, DrRuntimes};
pub use operator::{run, OperatorConfig, OperatorContext};
pub use subsystem::{run_subsystems, SubsystemReconciler};
