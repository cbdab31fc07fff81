//! Replication plugin wire types
//!
//! JSON shapes returned by the OpenSearch cross-cluster replication plugin and
//! the cluster APIs the DR workflow relies on.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// Constants
// =============================================================================

/// Logical name of the single DR autofollow rule
pub const REPLICATION_RULE_NAME: &str = "dr-replication";

/// Alias under which the remote (leader) cluster is registered
pub const LEADER_ALIAS: &str = "leader-cluster";

/// Task action of the internal replication admin task
pub const ADMIN_REPLICATION_ACTION: &str = "cluster:indices/admin/replication[c]";

pub const AUTOFOLLOW_PATH: &str = "_plugins/_replication/_autofollow";
pub const AUTOFOLLOW_STATS_PATH: &str = "_plugins/_replication/autofollow_stats";
pub const FOLLOWER_STATS_PATH: &str = "_plugins/_replication/follower_stats";
pub const CLUSTER_SETTINGS_PATH: &str = "_cluster/settings";
pub const TASKS_PATH: &str = "_tasks";

/// Service indices (leading dot) are never replicated by the DR rule
pub fn is_service_index(name: &str) -> bool {
    name.starts_with('.')
}

pub fn index_status_path(index: &str) -> String {
    format!("_plugins/_replication/{}/_status", urlencoding::encode(index))
}

pub fn index_stop_path(index: &str) -> String {
    format!("_plugins/_replication/{}/_stop", urlencoding::encode(index))
}

pub fn cat_indices_path(pattern: &str) -> String {
    format!("_cat/indices/{}?h=index,health&format=json", pattern)
}

pub const CAT_ALL_INDICES_PATH: &str = "_cat/indices?h=index,health&format=json";

// =============================================================================
// Health Verdict
// =============================================================================

/// Tri-state replication health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicationVerdict {
    Up,
    Degraded,
    Down,
}

impl ReplicationVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplicationVerdict::Up => "up",
            ReplicationVerdict::Degraded => "degraded",
            ReplicationVerdict::Down => "down",
        }
    }
}

impl std::fmt::Display for ReplicationVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Autofollow Stats
// =============================================================================

/// Response of `GET _plugins/_replication/autofollow_stats`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutofollowStats {
    #[serde(default, rename = "num_success_start_replication")]
    pub success_start_count: i64,
    #[serde(default, rename = "num_failed_start_replication")]
    pub failed_start_count: i64,
    #[serde(default, rename = "autofollow_stats")]
    pub rules: Vec<AutofollowRule>,
}

impl AutofollowStats {
    /// The DR rule, if present
    pub fn dr_rule(&self) -> Option<&AutofollowRule> {
        self.rules.iter().find(|r| r.name == REPLICATION_RULE_NAME)
    }
}

/// Counters of one autofollow rule
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutofollowRule {
    pub name: String,
    #[serde(default)]
    pub pattern: String,
    #[serde(default, rename = "num_success_start_replication")]
    pub success_start_count: i64,
    #[serde(default, rename = "num_failed_start_replication")]
    pub failed_start_count: i64,
    #[serde(default)]
    pub failed_indices: Vec<String>,
}

impl AutofollowRule {
    /// Failed indices, service indices excluded
    pub fn failed_user_indices(&self) -> Vec<String> {
        self.failed_indices
            .iter()
            .filter(|i| !is_service_index(i))
            .cloned()
            .collect()
    }
}

// =============================================================================
// Per-Index Replication State
// =============================================================================

/// Replication status of a follower index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicationStatus {
    #[serde(rename = "BOOTSTRAPPING")]
    Bootstrapping,
    #[serde(rename = "SYNCING")]
    Syncing,
    #[serde(rename = "PAUSED")]
    Paused,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(
        rename = "REPLICATION NOT IN PROGRESS",
        alias = "REPLICATION_NOT_IN_PROGRESS"
    )]
    ReplicationNotInProgress,
    #[serde(other)]
    Unknown,
}

/// Response of `GET _plugins/_replication/{index}/_status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexReplicationState {
    pub status: ReplicationStatus,
    #[serde(default)]
    pub reason: String,
    #[serde(default, rename = "syncing_details")]
    pub details: SyncingDetails,
}

/// Checkpoints of a syncing index
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncingDetails {
    #[serde(default)]
    pub leader_checkpoint: i64,
    #[serde(default)]
    pub follower_checkpoint: i64,
    #[serde(default)]
    pub seq_no: i64,
}

impl IndexReplicationState {
    /// Replication is actively running for the index
    pub fn is_active(&self) -> bool {
        matches!(
            self.status,
            ReplicationStatus::Syncing | ReplicationStatus::Bootstrapping
        )
    }

    /// Active and the follower has reached the leader checkpoint
    pub fn is_caught_up(&self) -> bool {
        self.is_active() && self.details.follower_checkpoint == self.details.leader_checkpoint
    }
}

// =============================================================================
// Follower Stats / Tasks / Indices
// =============================================================================

/// Response of `GET _plugins/_replication/follower_stats`; only the index keys are used
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FollowerStats {
    #[serde(default)]
    pub index_stats: BTreeMap<String, serde_json::Value>,
}

/// Response of `GET _tasks`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskListing {
    #[serde(default)]
    pub nodes: BTreeMap<String, NodeTasks>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeTasks {
    #[serde(default)]
    pub tasks: BTreeMap<String, TaskInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskInfo {
    #[serde(default)]
    pub action: String,
}

impl TaskListing {
    /// Ids of all tasks running the internal replication admin action
    pub fn admin_replication_task_ids(&self) -> Vec<String> {
        self.nodes
            .values()
            .flat_map(|node| node.tasks.iter())
            .filter(|(_, task)| task.action == ADMIN_REPLICATION_ACTION)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

/// One row of `_cat/indices?format=json`
#[derive(Debug, Clone, Deserialize)]
pub struct CatIndex {
    pub index: String,
    #[serde(default)]
    pub health: Option<String>,
}

impl CatIndex {
    pub fn is_red(&self) -> bool {
        self.health.as_deref() == Some("red")
    }
}

// =============================================================================
// Plugin Error Payload
// =============================================================================

/// Error payload returned by the replication plugin
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PluginErrorResponse {
    #[serde(default)]
    pub error: PluginError,
    #[serde(default)]
    pub status: u16,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PluginError {
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub caused_by: PluginErrorCause,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PluginErrorCause {
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub reason: String,
}

// =============================================================================
// Index Pattern
// =============================================================================

/// Comma-separated list of wildcard index globs, matched anchored
#[derive(Debug, Clone)]
pub struct IndexPattern {
    raw: String,
    globs: Vec<glob::Pattern>,
}

impl IndexPattern {
    pub fn new(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::InvalidPattern {
                pattern: raw.to_string(),
                reason: "pattern is empty".into(),
            });
        }
        let globs = raw
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| {
                glob::Pattern::new(p).map_err(|e| Error::InvalidPattern {
                    pattern: raw.to_string(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        if globs.is_empty() {
            return Err(Error::InvalidPattern {
                pattern: raw.to_string(),
                reason: "pattern has no index names".into(),
            });
        }
        let raw = globs
            .iter()
            .map(glob::Pattern::as_str)
            .collect::<Vec<_>>()
            .join(",");
        Ok(Self { raw, globs })
    }

    pub fn matches(&self, index: &str) -> bool {
        self.globs.iter().any(|g| g.matches(index))
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Pattern that selects every index
    pub fn is_match_all(&self) -> bool {
        self.raw == "*"
    }
}

impl std::fmt::Display for IndexPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}
