//! Cross-cluster replication
//!
//! - [`checker`]: tri-state replication health verdict
//! - [`manager`]: driver of the replication plugin
//! - [`watcher`]: background self-healing sentinel
//! - [`types`]: plugin wire types and index patterns

pub mod checker;
pub mod manager;
pub mod types;
pub mod watcher;

pub use checker::ReplicationChecker;
pub use manager::{ReplicationManager, ReplicationManagerConfig, INDICES_PATTERN_KEY, REMOTE_CLUSTER_KEY};
pub use types::{IndexPattern, ReplicationVerdict, LEADER_ALIAS, REPLICATION_RULE_NAME};
pub use watcher::{ReplicationWatcher, SwitchoverLock, WatcherConfig, WatcherState};
