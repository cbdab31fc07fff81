//! Replication Manager
//!
//! Imperative driver of the cross-cluster replication plugin on the local
//! (follower) cluster. Owns the single `dr-replication` autofollow rule bound to
//! the `leader-cluster` alias.

use crate::domain::ports::{RestResponse, SearchClient, SearchClientRef};
use crate::error::{Error, Result, StartFailure};
use crate::replication::types::{
    cat_indices_path, index_status_path, index_stop_path, is_service_index, AutofollowRule,
    AutofollowStats, CatIndex, FollowerStats, IndexPattern, IndexReplicationState,
    PluginErrorResponse, ReplicationStatus, TaskListing, AUTOFOLLOW_PATH, AUTOFOLLOW_STATS_PATH,
    CAT_ALL_INDICES_PATH, CLUSTER_SETTINGS_PATH, FOLLOWER_STATS_PATH, LEADER_ALIAS,
    REPLICATION_RULE_NAME, TASKS_PATH,
};
use reqwest::Method;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// ConfigMap key holding the remote seed address
pub const REMOTE_CLUSTER_KEY: &str = "remoteCluster";

/// ConfigMap key holding the replicated index pattern
pub const INDICES_PATTERN_KEY: &str = "indicesPattern";

// =============================================================================
// Configuration
// =============================================================================

/// Timing of the replication manager
#[derive(Debug, Clone)]
pub struct ReplicationManagerConfig {
    /// Polling attempts of the convergence check
    pub check_attempts: u32,
    /// Pause between convergence attempts
    pub check_interval: Duration,
    /// Pause after stopping replication of indices
    pub stop_settle: Duration,
    /// Pause between index deletion and configuring the connection
    pub delete_settle: Duration,
}

impl Default for ReplicationManagerConfig {
    fn default() -> Self {
        Self {
            check_attempts: 5,
            check_interval: Duration::from_secs(15),
            stop_settle: Duration::from_secs(3),
            delete_settle: Duration::from_secs(2),
        }
    }
}

// =============================================================================
// Replication Manager
// =============================================================================

/// Drives the replication plugin through a generic REST client
#[derive(Clone)]
pub struct ReplicationManager {
    client: SearchClientRef,
    remote_url: String,
    pattern: IndexPattern,
    config: ReplicationManagerConfig,
}

impl std::fmt::Debug for ReplicationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicationManager")
            .field("remote_url", &self.remote_url)
            .field("pattern", &self.pattern)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ReplicationManager {
    pub fn new(client: SearchClientRef, remote_url: impl Into<String>, pattern: IndexPattern) -> Self {
        Self {
            client,
            remote_url: remote_url.into(),
            pattern,
            config: ReplicationManagerConfig::default(),
        }
    }

    /// Build from the data of the DR ConfigMap
    pub fn from_config_data(client: SearchClientRef, data: &BTreeMap<String, String>) -> Result<Self> {
        let remote = data
            .get(REMOTE_CLUSTER_KEY)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| {
                Error::Configuration(format!("DR config has no [{}] key", REMOTE_CLUSTER_KEY))
            })?;
        let pattern = data.get(INDICES_PATTERN_KEY).ok_or_else(|| {
            Error::Configuration(format!("DR config has no [{}] key", INDICES_PATTERN_KEY))
        })?;
        Ok(Self::new(client, remote.trim(), IndexPattern::new(pattern)?))
    }

    pub fn with_config(mut self, config: ReplicationManagerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn pattern(&self) -> &IndexPattern {
        &self.pattern
    }

    pub fn remote_url(&self) -> &str {
        &self.remote_url
    }

    pub fn client(&self) -> SearchClientRef {
        self.client.clone()
    }

    // =========================================================================
    // Rule Lifecycle
    // =========================================================================

    /// Register the remote seed under the leader alias
    pub async fn configure(&self) -> Result<()> {
        let body = json!({
            "persistent": {
                "cluster": {
                    "remote": {
                        LEADER_ALIAS: {"seeds": [self.remote_url]}
                    }
                }
            }
        });
        self.client
            .send(Method::PUT, CLUSTER_SETTINGS_PATH, Some(body))
            .await?
            .error_for_status("create connection with the remote OpenSearch cluster")?;
        info!("Remote cluster [{}] registered as [{}]", self.remote_url, LEADER_ALIAS);
        Ok(())
    }

    /// Create the autofollow rule over the configured pattern
    pub async fn start(&self) -> Result<()> {
        let body = json!({
            "leader_alias": LEADER_ALIAS,
            "pattern": self.pattern.as_str(),
            "name": REPLICATION_RULE_NAME,
            "use_roles": {
                "leader_cluster_role": "all_access",
                "follower_cluster_role": "all_access"
            }
        });
        let response = self.client.send(Method::POST, AUTOFOLLOW_PATH, Some(body)).await?;
        if response.is_success() {
            info!("Autofollow rule [{}] created", REPLICATION_RULE_NAME);
            return Ok(());
        }
        Err(classify_start_failure(&response).into())
    }

    /// The DR autofollow rule, if it exists
    pub async fn autofollow_rule(&self) -> Result<Option<AutofollowRule>> {
        let stats: AutofollowStats = self
            .client
            .send(Method::GET, AUTOFOLLOW_STATS_PATH, None)
            .await?
            .error_for_status("read autofollow statistics")?
            .json()?;
        let rule = stats.dr_rule().cloned();
        if rule.is_none() {
            info!("Unable to find existing DR replication rule");
        }
        Ok(rule)
    }

    /// Delete the autofollow rule; an absent rule or a 404 counts as success
    pub async fn remove_replication_rule(&self) -> Result<()> {
        if self.autofollow_rule().await?.is_none() {
            info!("Skipping replication rule removal since it does not exist");
            return Ok(());
        }
        let body = json!({"leader_alias": LEADER_ALIAS, "name": REPLICATION_RULE_NAME});
        let response = self.client.send(Method::DELETE, AUTOFOLLOW_PATH, Some(body)).await?;
        if response.status == 404 {
            info!("Replication rule was already removed");
            return Ok(());
        }
        response.error_for_status("remove autofollow rule")?;
        info!("Autofollow rule [{}] removed", REPLICATION_RULE_NAME);
        Ok(())
    }

    // =========================================================================
    // Per-Index Replication
    // =========================================================================

    /// Indices that currently have follower stats
    pub async fn replicated_indices(&self) -> Result<Vec<String>> {
        let stats: FollowerStats = self
            .client
            .send(Method::GET, FOLLOWER_STATS_PATH, None)
            .await?
            .error_for_status("read follower statistics")?
            .json()?;
        Ok(stats.index_stats.into_keys().collect())
    }

    /// Stop replication of every replicated index
    pub async fn stop_replication(&self) -> Result<()> {
        let indices = self.replicated_indices().await?;
        if indices.is_empty() {
            return Ok(());
        }
        self.stop_indices_replication(&indices).await
    }

    /// Stop replication of the given indices, then let the cluster settle
    pub async fn stop_indices_replication(&self, indices: &[String]) -> Result<()> {
        if indices.is_empty() {
            return Ok(());
        }
        for index in indices {
            let response = self
                .client
                .send(Method::POST, &index_stop_path(index), Some(json!({})))
                .await?;
            if response.status >= 400 {
                return Err(Error::unexpected_status(
                    format!("stop replication for [{}] index", index),
                    response.status,
                    response.body,
                ));
            }
            info!("Replication was stopped for index [{}]", index);
        }
        tokio::time::sleep(self.config.stop_settle).await;
        Ok(())
    }

    /// Stop replication of pattern-matching indices that are still replicating
    pub async fn stop_indices_replication_by_pattern(&self, pattern: &str) -> Result<()> {
        let mut to_stop = Vec::new();
        for index in self.list_user_indices(pattern).await? {
            match self.index_replication_state(&index).await {
                Ok(state) if state.status != ReplicationStatus::ReplicationNotInProgress => {
                    to_stop.push(index)
                }
                Ok(_) => {}
                Err(e) => warn!("Cannot get replication status of [{}] index, skip it: {}", index, e),
            }
        }
        self.stop_indices_replication(&to_stop).await
    }

    /// Replication status of one index
    pub async fn index_replication_state(&self, index: &str) -> Result<IndexReplicationState> {
        self.client
            .send(Method::GET, &index_status_path(index), None)
            .await?
            .error_for_status(&format!("replication status of [{}]", index))?
            .json()
    }

    // =========================================================================
    // Index Deletion
    // =========================================================================

    /// Delete local indices matching the replicated pattern
    pub async fn delete_indices(&self) -> Result<()> {
        if !self.pattern.is_match_all() {
            return self
                .delete_indices_by_pattern_with_unlock(self.pattern.as_str())
                .await;
        }
        let all: Vec<CatIndex> = self
            .client
            .send(Method::GET, CAT_ALL_INDICES_PATH, None)
            .await?
            .error_for_status("list indices")?
            .json()?;
        for index in all.iter().filter(|i| !is_service_index(&i.index)) {
            self.delete_indices_by_pattern_with_unlock(&index.index).await?;
        }
        Ok(())
    }

    /// Delete by pattern; when rejected with 403 stop replication of the
    /// matching indices and retry once
    pub async fn delete_indices_by_pattern_with_unlock(&self, pattern: &str) -> Result<()> {
        let response = self.client.send(Method::DELETE, pattern, None).await?;
        match response.status {
            403 => {
                info!("Indices [{}] are locked by replication, stopping it first", pattern);
                let indices = self.list_user_indices(pattern).await?;
                self.stop_indices_replication(&indices).await?;
                self.delete_indices_by_pattern(pattern).await
            }
            404 => {
                debug!("No indices to delete by pattern [{}]", pattern);
                Ok(())
            }
            _ => {
                response.error_for_status(&format!("delete indices by pattern [{}]", pattern))?;
                info!("Indices deleted by pattern [{}]", pattern);
                Ok(())
            }
        }
    }

    /// Delete by pattern without fallback
    pub async fn delete_indices_by_pattern(&self, pattern: &str) -> Result<()> {
        let response = self.client.send(Method::DELETE, pattern, None).await?;
        match response.status {
            403 => {
                info!("No permissions to delete OpenSearch indices by pattern: [{}]", pattern);
                Err(Error::DeletePermissionDenied {
                    pattern: pattern.to_string(),
                })
            }
            404 => Ok(()),
            _ => {
                response.error_for_status(&format!("delete indices by pattern [{}]", pattern))?;
                Ok(())
            }
        }
    }

    /// Non-service indices matching `pattern`; no match yields an empty list
    async fn list_user_indices(&self, pattern: &str) -> Result<Vec<String>> {
        let response = self
            .client
            .send(Method::GET, &cat_indices_path(pattern), None)
            .await?;
        if response.status == 404 {
            return Ok(Vec::new());
        }
        let indices: Vec<CatIndex> = response
            .error_for_status(&format!("list indices by pattern [{}]", pattern))?
            .json()?;
        Ok(indices
            .into_iter()
            .map(|i| i.index)
            .filter(|i| !is_service_index(i))
            .collect())
    }

    // =========================================================================
    // Admin Tasks
    // =========================================================================

    /// Cancel leftover replication admin tasks. Listing failures are fatal,
    /// cancel failures are only logged.
    pub async fn delete_admin_replication_tasks(&self) -> Result<()> {
        let listing: TaskListing = self
            .client
            .send(Method::GET, TASKS_PATH, None)
            .await
            .map_err(|e| {
                error!("Admin replication tasks cannot be listed: {}", e);
                e
            })?
            .error_for_status("list tasks")?
            .json()?;

        let ids = listing.admin_replication_task_ids();
        info!("Admin replication tasks found: {:?}", ids);
        for id in ids {
            let path = format!("{}/{}/_cancel", TASKS_PATH, id);
            match self.client.send(Method::POST, &path, None).await {
                Ok(response) if response.is_success() => debug!("Task [{}] cancelled", id),
                Ok(response) => warn!(
                    "Admin replication task [{}] was not cancelled: [{}] {}",
                    id, response.status, response.body
                ),
                Err(e) => warn!("Admin replication task [{}] was not cancelled: {}", id, e),
            }
        }
        Ok(())
    }

    // =========================================================================
    // Checks
    // =========================================================================

    /// Wait until the given pattern-matching indices are caught up with the leader.
    ///
    /// Indices that are not syncing or bootstrapping fail the check at once. The
    /// rest are re-polled for a fixed number of attempts.
    pub async fn execute_replication_check(&self, index_names: &[String]) -> Result<()> {
        let mut in_progress: BTreeMap<String, i64> = BTreeMap::new();
        let mut failed = Vec::new();

        for index in index_names.iter().filter(|i| self.pattern.matches(i)) {
            let state = self.index_replication_state(index).await?;
            if !state.is_active() {
                failed.push(index.clone());
            } else if !state.is_caught_up() {
                in_progress.insert(index.clone(), state.details.leader_checkpoint);
            }
        }

        if !failed.is_empty() {
            error!("Replication check failed, indices are not replicating: {:?}", failed);
            return Err(Error::FailedIndices { indices: failed });
        }

        let attempts = self.config.check_attempts;
        for attempt in 1..=attempts {
            in_progress = self.update_in_progress(in_progress).await?;
            if in_progress.is_empty() {
                info!("Replication check is done");
                return Ok(());
            }
            info!(
                "Replicated indices still in progress (attempt {}/{}): {:?}",
                attempt,
                attempts,
                in_progress.keys().collect::<Vec<_>>()
            );
            if attempt < attempts {
                tokio::time::sleep(self.config.check_interval).await;
            }
        }

        Err(Error::ReplicationStuck {
            attempts,
            indices: in_progress.into_keys().collect(),
        })
    }

    async fn update_in_progress(&self, in_progress: BTreeMap<String, i64>) -> Result<BTreeMap<String, i64>> {
        let mut rest = BTreeMap::new();
        for (index, leader_checkpoint) in in_progress {
            let state = self.index_replication_state(&index).await?;
            if state.details.follower_checkpoint < leader_checkpoint {
                rest.insert(index, leader_checkpoint);
            }
        }
        Ok(rest)
    }

    /// Health check used by the watcher and before stopping replication
    pub async fn verify_replication(&self, allow_missing_rule: bool) -> Result<()> {
        info!("Start checking replication status");
        let rule = match self.autofollow_rule().await {
            Ok(rule) => rule,
            Err(e) => {
                error!("Cannot check autofollow replication rule: {}", e);
                None
            }
        };

        let rule = match rule {
            Some(rule) => rule,
            None if allow_missing_rule => return Ok(()),
            None => return Err(Error::NoAutofollowRule),
        };

        let failed = rule.failed_user_indices();
        if !failed.is_empty() {
            return Err(Error::FailedIndices { indices: failed });
        }

        let indices = match self.list_user_indices(self.pattern.as_str()).await {
            Ok(indices) => indices,
            Err(e) => {
                error!("Cannot get indices by pattern [{}]: {}", self.pattern, e);
                return Ok(());
            }
        };

        let mut failed = Vec::new();
        for index in indices {
            let state = match self.index_replication_state(&index).await {
                Ok(state) => state,
                Err(e) => {
                    error!("Cannot get replication status of [{}] index: {}", index, e);
                    continue;
                }
            };
            match state.status {
                ReplicationStatus::Failed => failed.push(index),
                ReplicationStatus::Paused if state.reason.contains("IndexNotFoundException") => {
                    info!(
                        "Replication for index [{}] is paused because the index was lost on the active side",
                        index
                    );
                }
                ReplicationStatus::Paused => failed.push(index),
                _ => {}
            }
        }

        if !failed.is_empty() {
            return Err(Error::FailedIndices { indices: failed });
        }
        info!("Replication works correctly, there are no failed indices");
        Ok(())
    }

    // =========================================================================
    // Composite Steps
    // =========================================================================

    /// Remove the rule, stop every replicating index and cancel admin tasks
    pub async fn remove_previous_replication(&self) -> Result<()> {
        self.remove_replication_rule().await.map_err(|e| {
            error!("Cannot delete autofollow replication rule: {}", e);
            e
        })?;

        info!("Stopping running replication for indices");
        self.stop_replication().await?;

        info!("Stopping replication for indices matching [{}]", self.pattern);
        self.stop_indices_replication_by_pattern(self.pattern.as_str())
            .await?;

        self.delete_admin_replication_tasks().await?;
        info!("Replication has been stopped");
        Ok(())
    }

    /// Delete local indices, register the remote and create the rule
    pub async fn run_replication_process(&self) -> Result<()> {
        info!("Deleting replicated indices");
        self.delete_indices().await?;
        tokio::time::sleep(self.config.delete_settle).await;

        info!("Configuring replication connection between clusters");
        self.configure().await?;

        info!("Starting autofollow replication");
        self.start().await?;
        info!("Replication has been started");
        Ok(())
    }

    /// Tear replication down and drop `.tasks` on a best-effort basis
    pub async fn stop_and_clean(&self) -> Result<()> {
        self.remove_previous_replication().await?;
        if let Err(e) = self.delete_indices_by_pattern(".tasks").await {
            warn!("Cannot delete .tasks index: {}", e);
        }
        Ok(())
    }
}

// =============================================================================
// Start Failure Classification
// =============================================================================

fn classify_start_failure(response: &RestResponse) -> StartFailure {
    let payload: PluginErrorResponse = match response.json() {
        Ok(payload) => payload,
        Err(_) => {
            return StartFailure::Other {
                status: response.status,
                details: response.body.clone(),
            }
        }
    };
    let err = &payload.error;
    let details = response.body.clone();

    match (response.status, err.kind.as_str()) {
        (500, "connect_transport_exception")
            if err.caused_by.reason == "handshake failed because connection reset" =>
        {
            StartFailure::CertificateMismatch { details }
        }
        (500, "connect_transport_exception") if err.caused_by.reason.starts_with("Connection refused") => {
            StartFailure::ConnectionRefused { details }
        }
        (404, "no_such_remote_cluster_exception") => StartFailure::UnknownRemoteAlias {
            alias: LEADER_ALIAS.to_string(),
            details,
        },
        (400, "illegal_argument_exception") if err.caused_by.kind == "unknown_host_exception" => {
            StartFailure::InvalidHostname {
                host: err.caused_by.reason.clone(),
                details,
            }
        }
        (status, _) => StartFailure::Other { status, details },
    }
}
