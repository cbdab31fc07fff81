//! Users Recovery Coordinator
//!
//! On promotion to active, asks the DBaaS aggregator to restore user passwords
//! and follows the adapter until the procedure finishes.

use crate::controlplane::poll::{poll, poll_immediate};
use crate::controlplane::status::update_status_with_retry;
use crate::crd::UsersRecoveryState;
use crate::domain::ports::{ResourceStoreRef, UsersRecoveryApiRef};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Timing of the recovery workflow
#[derive(Debug, Clone)]
pub struct UsersRecoveryConfig {
    pub request_interval: Duration,
    pub request_timeout: Duration,
    pub state_interval: Duration,
    pub state_timeout: Duration,
}

impl Default for UsersRecoveryConfig {
    fn default() -> Self {
        Self {
            request_interval: Duration::from_secs(10),
            request_timeout: Duration::from_secs(240),
            state_interval: Duration::from_secs(5),
            state_timeout: Duration::from_secs(240),
        }
    }
}

/// Drives `idle -> running -> done|failed`
pub struct UsersRecoveryCoordinator {
    api: UsersRecoveryApiRef,
    store: ResourceStoreRef,
    config: UsersRecoveryConfig,
}

impl UsersRecoveryCoordinator {
    pub fn new(api: UsersRecoveryApiRef, store: ResourceStoreRef) -> Self {
        Self {
            api,
            store,
            config: UsersRecoveryConfig::default(),
        }
    }

    pub fn with_config(mut self, config: UsersRecoveryConfig) -> Self {
        self.config = config;
        self
    }

    /// Run the workflow from the state persisted before the switchover.
    ///
    /// No prior state means first install: nothing to recover. `Err` carries the
    /// reason the recovery ended in `failed`.
    pub async fn recover(&self, prior: Option<UsersRecoveryState>) -> Result<UsersRecoveryState> {
        let prior = match prior {
            None => {
                info!("Users recovery is not run during installation");
                return Ok(UsersRecoveryState::Done);
            }
            Some(state) => state,
        };

        if prior != UsersRecoveryState::Running {
            self.request_restore().await?;
            update_status_with_retry(self.store.as_ref(), |s| {
                s.users_recovery_state = Some(UsersRecoveryState::Running);
            })
            .await?;
        } else {
            info!("Users recovery is already running, resuming");
        }

        let state = self.wait_for_completion().await?;
        info!("Users recovery is finished with [{}] state", state);
        match state {
            UsersRecoveryState::Failed => Err(Error::UsersRecovery(
                "the adapter reported a failed password restore".into(),
            )),
            state => Ok(state),
        }
    }

    async fn request_restore(&self) -> Result<()> {
        let api = self.api.clone();
        poll_immediate(
            self.config.request_interval,
            self.config.request_timeout,
            "users restore request",
            || {
                let api = api.clone();
                async move {
                    match api.request_restore().await {
                        Ok(()) => true,
                        Err(e) => {
                            error!("Unable to restore user passwords via DBaaS aggregator: {}", e);
                            false
                        }
                    }
                }
            },
        )
        .await
        .map_err(|e| Error::UsersRecovery(format!("aggregator did not accept the restore request: {}", e)))
    }

    async fn wait_for_completion(&self) -> Result<UsersRecoveryState> {
        let api = self.api.clone();
        let last = Arc::new(Mutex::new(None));
        let observed = last.clone();

        poll(
            self.config.state_interval,
            self.config.state_timeout,
            "users restore state",
            || {
                let api = api.clone();
                let observed = observed.clone();
                async move {
                    match api.restore_state().await {
                        Ok(body) => match UsersRecoveryState::parse(&body) {
                            Some(state) => {
                                *observed.lock() = Some(state);
                                state.is_terminal()
                            }
                            None => {
                                warn!("Unexpected users recovery state: {}", body);
                                false
                            }
                        },
                        Err(e) => {
                            error!("Unable to get state of users recovery: {}", e);
                            false
                        }
                    }
                }
            },
        )
        .await
        .map_err(|e| Error::UsersRecovery(format!("users recovery did not finish: {}", e)))?;

        let state = *last.lock();
        state.ok_or_else(|| Error::UsersRecovery("users recovery state is unknown".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{DrMode, SwitchoverStatus};
    use crate::testing::{dr_spec, service, FakeResourceStore, FakeUsersApi};
    use assert_matches::assert_matches;

    fn coordinator(api: &Arc<FakeUsersApi>) -> (UsersRecoveryCoordinator, Arc<FakeResourceStore>) {
        let store = FakeResourceStore::new(service(
            dr_spec(DrMode::Active),
            Some(DrMode::Active),
            Some(SwitchoverStatus::Running),
        ));
        (UsersRecoveryCoordinator::new(api.clone(), store.clone()), store)
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_install_is_skipped() {
        let api = FakeUsersApi::with_states(&["running"]);
        let (coordinator, store) = coordinator(&api);

        let state = coordinator.recover(None).await.unwrap();
        assert_eq!(state, UsersRecoveryState::Done);
        assert_eq!(api.requests(), 0);
        assert!(store.history().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_requests_restore_and_polls_until_done() {
        let api = FakeUsersApi::with_states(&["running", "running", "\"done\""]);
        api.set_request_results(&[false, true]);
        let (coordinator, store) = coordinator(&api);

        let state = coordinator.recover(Some(UsersRecoveryState::Idle)).await.unwrap();

        assert_eq!(state, UsersRecoveryState::Done);
        assert_eq!(api.requests(), 2);
        assert_eq!(api.state_polls(), 3);
        assert_eq!(
            store.status().users_recovery_state,
            Some(UsersRecoveryState::Running)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_resumes_without_new_request() {
        let api = FakeUsersApi::with_states(&["done"]);
        let (coordinator, _store) = coordinator(&api);

        let state = coordinator.recover(Some(UsersRecoveryState::Running)).await.unwrap();
        assert_eq!(state, UsersRecoveryState::Done);
        assert_eq!(api.requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_state_is_an_error() {
        let api = FakeUsersApi::with_states(&["failed"]);
        let (coordinator, _store) = coordinator(&api);

        let result = coordinator.recover(Some(UsersRecoveryState::Done)).await;
        assert_matches!(result, Err(Error::UsersRecovery(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_poll_is_bounded() {
        let api = FakeUsersApi::with_states(&["running"]);
        let (coordinator, _store) = coordinator(&api);

        let started = tokio::time::Instant::now();
        let result = coordinator.recover(Some(UsersRecoveryState::Running)).await;
        assert_matches!(result, Err(Error::UsersRecovery(_)));
        assert_eq!(started.elapsed(), Duration::from_secs(240));
        assert_eq!(api.state_polls(), 48);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_requests_fail_after_timeout() {
        let api = FakeUsersApi::with_states(&["done"]);
        api.set_request_results(&[false]);
        let (coordinator, _store) = coordinator(&api);

        let result = coordinator.recover(Some(UsersRecoveryState::Idle)).await;
        assert_matches!(result, Err(Error::UsersRecovery(_)));
        // Immediate attempt plus one every 10s for 240s
        assert_eq!(api.requests(), 25);
        assert_eq!(api.state_polls(), 0);
    }
}
