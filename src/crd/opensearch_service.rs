//! OpenSearchService CRD
//!
//! Only the slice of the OpenSearchService resource that the disaster-recovery
//! subsystem reads and writes is modelled here. Other sections of the resource
//! are preserved by the API server and never touched by this operator.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// =============================================================================
// OpenSearchService CRD
// =============================================================================

/// OpenSearchService describes an OpenSearch cluster managed by the operator.
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "opensearch.billyronks.io",
    version = "v1",
    kind = "OpenSearchService",
    plural = "opensearchservices",
    shortname = "oss",
    status = "OpenSearchServiceStatus",
    printcolumn = r#"{"name": "DR Mode", "type": "string", "jsonPath": ".spec.disasterRecovery.mode"}"#,
    printcolumn = r#"{"name": "Switchover", "type": "string", "jsonPath": ".status.disasterRecoveryStatus.status"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct OpenSearchServiceSpec {
    /// Disaster recovery configuration; absent when the cluster is not part of a DR pair
    #[serde(default)]
    pub disaster_recovery: Option<DisasterRecoverySpec>,

    /// DBaaS adapter used for users recovery on promotion
    #[serde(default)]
    pub dbaas_adapter: Option<DbaasAdapterSpec>,

    /// Secret holding `username`/`password` for the local OpenSearch cluster
    #[serde(default)]
    pub credentials_secret_name: Option<String>,
}

// =============================================================================
// Disaster Recovery Spec
// =============================================================================

/// Desired disaster-recovery role of the local cluster
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DisasterRecoverySpec {
    /// Desired DR mode
    pub mode: DrMode,

    /// Skip the replication convergence check and readiness waits
    #[serde(default)]
    pub no_wait: bool,

    /// ConfigMap holding `remoteCluster` and `indicesPattern`
    pub config_map_name: String,

    /// Run the background replication watcher while standby
    #[serde(default)]
    pub replication_watcher_enabled: bool,

    /// Watcher interval in seconds; non-positive values use the operator default
    #[serde(default)]
    pub replication_watcher_interval: i64,
}

/// Disaster recovery mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum DrMode {
    Active,
    Standby,
    Disable,
}

impl<'de> Deserialize<'de> for DrMode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        DrMode::parse(&value).ok_or_else(|| {
            serde::de::Error::unknown_variant(&value, &["active", "standby", "disable"])
        })
    }
}

impl DrMode {
    /// Parse a mode string case-insensitively
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "active" => Some(DrMode::Active),
            "standby" => Some(DrMode::Standby),
            "disable" | "disabled" => Some(DrMode::Disable),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DrMode::Active => "active",
            DrMode::Standby => "standby",
            DrMode::Disable => "disable",
        }
    }
}

impl std::fmt::Display for DrMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Parameters for talking to the DBaaS adapter and aggregator
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DbaasAdapterSpec {
    /// Adapter deployment name
    pub name: String,

    #[serde(default)]
    pub adapter_address: String,

    #[serde(default)]
    pub aggregator_address: String,

    #[serde(default)]
    pub physical_database_identifier: String,

    /// Secret with adapter and aggregator credentials
    pub secret_name: String,
}

// =============================================================================
// Status
// =============================================================================

/// Observed state of the OpenSearchService
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OpenSearchServiceStatus {
    #[serde(default)]
    pub disaster_recovery_status: DisasterRecoveryStatus,
}

/// Persisted outcome of the last switchover
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DisasterRecoveryStatus {
    /// Mode the last switchover targeted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<DrMode>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SwitchoverStatus>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    /// Absent when users recovery never ran (first install)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub users_recovery_state: Option<UsersRecoveryState>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

/// Switchover progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SwitchoverStatus {
    Running,
    Done,
    Failed,
    Queue,
}

impl SwitchoverStatus {
    /// A previous attempt left work that must be resumed
    pub fn needs_resume(&self) -> bool {
        matches!(
            self,
            SwitchoverStatus::Running | SwitchoverStatus::Failed | SwitchoverStatus::Queue
        )
    }
}

impl std::fmt::Display for SwitchoverStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SwitchoverStatus::Running => write!(f, "running"),
            SwitchoverStatus::Done => write!(f, "done"),
            SwitchoverStatus::Failed => write!(f, "failed"),
            SwitchoverStatus::Queue => write!(f, "queue"),
        }
    }
}

/// Users recovery progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum UsersRecoveryState {
    Idle,
    Running,
    Done,
    Failed,
}

impl UsersRecoveryState {
    /// Parse the state string returned by the DBaaS adapter
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().trim_matches('"').to_lowercase().as_str() {
            "idle" => Some(UsersRecoveryState::Idle),
            "running" => Some(UsersRecoveryState::Running),
            "done" => Some(UsersRecoveryState::Done),
            "failed" => Some(UsersRecoveryState::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, UsersRecoveryState::Done | UsersRecoveryState::Failed)
    }
}

impl std::fmt::Display for UsersRecoveryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UsersRecoveryState::Idle => write!(f, "idle"),
            UsersRecoveryState::Running => write!(f, "running"),
            UsersRecoveryState::Done => write!(f, "done"),
            UsersRecoveryState::Failed => write!(f, "failed"),
        }
    }
}

// =============================================================================
// Accessors
// =============================================================================

impl OpenSearchService {
    /// Current disaster-recovery status, defaulted when the status block is absent
    pub fn dr_status(&self) -> DisasterRecoveryStatus {
        self.status
            .as_ref()
            .map(|s| s.disaster_recovery_status.clone())
            .unwrap_or_default()
    }

    /// Mutable disaster-recovery status, creating the status block if needed
    pub fn dr_status_mut(&mut self) -> &mut DisasterRecoveryStatus {
        &mut self
            .status
            .get_or_insert_with(OpenSearchServiceStatus::default)
            .disaster_recovery_status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing_is_case_insensitive() {
        assert_eq!(DrMode::parse("Standby"), Some(DrMode::Standby));
        assert_eq!(DrMode::parse("ACTIVE"), Some(DrMode::Active));
        assert_eq!(DrMode::parse("disable"), Some(DrMode::Disable));
        assert_eq!(DrMode::parse("primary"), None);

        let mode: DrMode = serde_json::from_value(serde_json::json!("aCtIvE")).unwrap();
        assert_eq!(mode, DrMode::Active);
        let mode: DrMode = serde_json::from_value(serde_json::json!("Disabled")).unwrap();
        assert_eq!(mode, DrMode::Disable);
        assert!(serde_json::from_value::<DrMode>(serde_json::json!("primary")).is_err());
        assert_eq!(serde_json::to_value(DrMode::Standby).unwrap(), serde_json::json!("standby"));
    }

    #[test]
    fn test_spec_deserializes_camel_case() {
        let spec: OpenSearchServiceSpec = serde_json::from_value(serde_json::json!({
            "disasterRecovery": {
                "mode": "Standby",
                "configMapName": "cm1",
                "replicationWatcherEnabled": true,
                "replicationWatcherInterval": 45
            }
        }))
        .unwrap();

        let dr = spec.disaster_recovery.unwrap();
        assert_eq!(dr.mode, DrMode::Standby);
        assert_eq!(dr.config_map_name, "cm1");
        assert!(dr.replication_watcher_enabled);
        assert_eq!(dr.replication_watcher_interval, 45);
        assert!(!dr.no_wait);
    }

    #[test]
    fn test_empty_status_has_no_users_history() {
        let status: DisasterRecoveryStatus = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(status.mode, None);
        assert_eq!(status.users_recovery_state, None);
    }

    #[test]
    fn test_users_state_parse_accepts_quoted_body() {
        assert_eq!(
            UsersRecoveryState::parse("\"done\"\n"),
            Some(UsersRecoveryState::Done)
        );
        assert_eq!(UsersRecoveryState::parse("unknown"), None);
    }

    #[test]
    fn test_resume_statuses() {
        assert!(SwitchoverStatus::Running.needs_resume());
        assert!(SwitchoverStatus::Failed.needs_resume());
        assert!(SwitchoverStatus::Queue.needs_resume());
        assert!(!SwitchoverStatus::Done.needs_resume());
    }
}
