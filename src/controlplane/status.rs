//! Optimistic status updates
//!
//! Read-modify-write of the DR status, retried with exponential backoff when
//! the write loses a race against another writer.

use crate::crd::{DisasterRecoveryStatus, OpenSearchService};
use crate::domain::ports::ResourceStore;
use crate::error::{Error, Result};
use backoff::{future::retry, ExponentialBackoff};
use chrono::Utc;
use std::time::Duration;
use tracing::debug;

/// Apply `mutate` to the latest DR status and write it back.
///
/// The write is skipped when the mutation changes nothing. Conflicts are
/// retried; any other error is returned at once.
pub async fn update_status_with_retry<F>(store: &dyn ResourceStore, mutate: F) -> Result<OpenSearchService>
where
    F: Fn(&mut DisasterRecoveryStatus) + Send + Sync,
{
    let policy = ExponentialBackoff {
        initial_interval: Duration::from_millis(100),
        max_interval: Duration::from_secs(2),
        max_elapsed_time: Some(Duration::from_secs(30)),
        ..ExponentialBackoff::default()
    };
    let mutate = &mutate;

    retry(policy, move || async move {
        let mut resource = store.get().await.map_err(backoff::Error::permanent)?;
        let before = resource.dr_status();
        let status = resource.dr_status_mut();
        mutate(status);
        if !changed(&before, status) {
            return Ok(resource);
        }
        status.last_transition_time = Some(Utc::now());

        store.replace_status(&resource).await.map_err(|e| match e {
            Error::Conflict { .. } => {
                debug!("Status update conflicted, retrying");
                backoff::Error::transient(e)
            }
            other => backoff::Error::permanent(other),
        })
    })
    .await
}

fn changed(before: &DisasterRecoveryStatus, after: &DisasterRecoveryStatus) -> bool {
    before.mode != after.mode
        || before.status != after.status
        || before.message != after.message
        || before.users_recovery_state != after.users_recovery_state
}
