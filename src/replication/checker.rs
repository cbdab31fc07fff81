//! Replication Checker
//!
//! Turns autofollow statistics, index health and per-index replication status
//! into a tri-state verdict. Holds no state besides the client.

use crate::domain::ports::{SearchClient, SearchClientRef};
use crate::error::{Error, Result};
use crate::replication::types::{
    index_status_path, is_service_index, AutofollowStats, CatIndex, IndexPattern,
    IndexReplicationState, ReplicationStatus, ReplicationVerdict, AUTOFOLLOW_STATS_PATH,
    CAT_ALL_INDICES_PATH,
};
use reqwest::Method;
use tracing::{debug, error, info};

/// Evaluates replication health of the local (follower) cluster
#[derive(Clone)]
pub struct ReplicationChecker {
    client: SearchClientRef,
}

impl ReplicationChecker {
    pub fn new(client: SearchClientRef) -> Self {
        Self { client }
    }

    /// Compute the replication verdict. Remote failures are returned as errors,
    /// never folded into `Down`.
    pub async fn check_replication(&self) -> Result<ReplicationVerdict> {
        let response = self
            .client
            .send(Method::GET, AUTOFOLLOW_STATS_PATH, None)
            .await
            .map_err(|e| {
                error!("An error occurred during autofollow_stats request: {}", e);
                e
            })?;
        if response.status >= 500 {
            return Err(Error::unexpected_status(
                "autofollow_stats",
                response.status,
                response.body,
            ));
        }
        let stats: AutofollowStats = response.json()?;

        let rule = match stats.dr_rule() {
            Some(rule) => rule,
            None => {
                info!("Replication rule is not found, replication is down");
                return Ok(ReplicationVerdict::Down);
            }
        };

        let failed = rule.failed_user_indices();
        if !failed.is_empty() {
            info!("Replication rule has failed indices: {:?}", failed);
            return Ok(if rule.success_start_count > 0 {
                ReplicationVerdict::Degraded
            } else {
                ReplicationVerdict::Down
            });
        }
        if rule.failed_start_count > 0 {
            info!(
                "Replication rule has {} failed starts",
                rule.failed_start_count
            );
            return Ok(ReplicationVerdict::Degraded);
        }

        let pattern = IndexPattern::new(&rule.pattern)?;
        let indices = self.matching_indices(&pattern).await?;

        let unhealthy: Vec<&str> = indices
            .iter()
            .filter(|i| i.is_red())
            .map(|i| i.index.as_str())
            .collect();
        if !unhealthy.is_empty() {
            info!("The following indices are not healthy: {:?}", unhealthy);
            return Ok(ReplicationVerdict::Degraded);
        }

        for index in indices.iter().filter(|i| !is_service_index(&i.index)) {
            if self.is_replication_failed(&index.index).await? {
                info!("Replication of [{}] index failed", index.index);
                return Ok(ReplicationVerdict::Degraded);
            }
        }

        Ok(ReplicationVerdict::Up)
    }

    async fn matching_indices(&self, pattern: &IndexPattern) -> Result<Vec<CatIndex>> {
        let response = self
            .client
            .send(Method::GET, CAT_ALL_INDICES_PATH, None)
            .await?
            .error_for_status("list indices")?;
        let all: Vec<CatIndex> = response.json()?;
        Ok(all
            .into_iter()
            .filter(|i| pattern.matches(&i.index))
            .collect())
    }

    async fn is_replication_failed(&self, index: &str) -> Result<bool> {
        let response = self
            .client
            .send(Method::GET, &index_status_path(index), None)
            .await?;
        if response.status >= 500 {
            return Err(Error::unexpected_status(
                format!("replication status of [{}]", index),
                response.status,
                response.body,
            ));
        }
        match response.json::<IndexReplicationState>() {
            Ok(state) => Ok(state.status == ReplicationStatus::Failed),
            Err(e) => {
                debug!("Replication status of [{}] is not readable: {}", index, e);
                Ok(false)
            }
        }
    }
}
