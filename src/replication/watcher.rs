//! Replication Watcher
//!
//! Background task that, while the local cluster is a healthy standby,
//! periodically verifies replication and rebuilds it when it is broken. The
//! restart branch runs under the lock shared with the switchover orchestrator.

use crate::crd::{DrMode, OpenSearchService, SwitchoverStatus};
use crate::domain::ports::ResourceStoreRef;
use crate::error::{Error, Result};
use crate::metrics::{DrMetrics, Outcome};
use crate::replication::manager::ReplicationManager;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Lock serializing switchovers and watcher restarts of one resource
pub type SwitchoverLock = Arc<tokio::sync::Mutex<()>>;

/// Watcher lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Paused,
    Running,
}

/// Timing of the watcher loop
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Interval used when the resource does not set a positive one
    pub default_interval: Duration,
    /// Pause after a restart before the next check
    pub restart_wait: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            default_interval: Duration::from_secs(30),
            restart_wait: Duration::from_secs(60),
        }
    }
}

struct Lifecycle {
    state: WatcherState,
    generation: u64,
    token: CancellationToken,
}

/// Background replication sentinel for one resource
#[derive(Clone)]
pub struct ReplicationWatcher {
    lifecycle: Arc<Mutex<Lifecycle>>,
    lock: SwitchoverLock,
    store: ResourceStoreRef,
    metrics: Arc<DrMetrics>,
    config: WatcherConfig,
}

impl ReplicationWatcher {
    /// Create a paused watcher
    pub fn new(lock: SwitchoverLock, store: ResourceStoreRef, metrics: Arc<DrMetrics>) -> Self {
        Self {
            lifecycle: Arc::new(Mutex::new(Lifecycle {
                state: WatcherState::Paused,
                generation: 0,
                token: CancellationToken::new(),
            })),
            lock,
            store,
            metrics,
            config: WatcherConfig::default(),
        }
    }

    pub fn with_config(mut self, config: WatcherConfig) -> Self {
        self.config = config;
        self
    }

    pub fn state(&self) -> WatcherState {
        self.lifecycle.lock().state
    }

    pub fn lock(&self) -> SwitchoverLock {
        self.lock.clone()
    }

    /// Launch the monitoring loop unless one is already running.
    /// Returns whether a new loop was started.
    pub fn start(&self, interval_secs: i64, manager: ReplicationManager) -> bool {
        let (generation, token) = {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.state == WatcherState::Running {
                return false;
            }
            lifecycle.state = WatcherState::Running;
            lifecycle.generation += 1;
            lifecycle.token = CancellationToken::new();
            (lifecycle.generation, lifecycle.token.clone())
        };

        let interval = if interval_secs <= 0 {
            self.config.default_interval
        } else {
            Duration::from_secs(interval_secs as u64)
        };

        info!("Start Replication Watcher with interval {:?}", interval);
        let watcher = self.clone();
        tokio::spawn(async move {
            watcher.watch(generation, token, interval, manager).await;
        });
        true
    }

    /// Stop the loop at its next boundary
    pub fn pause(&self) {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state == WatcherState::Running {
            info!("Stop Replication Watcher");
        }
        lifecycle.state = WatcherState::Paused;
        lifecycle.token.cancel();
    }

    /// Pause only if `generation` is still the running loop
    fn stop_generation(&self, generation: u64) {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.generation == generation {
            lifecycle.state = WatcherState::Paused;
            lifecycle.token.cancel();
        }
    }

    /// The loop identified by `generation` is still the one allowed to act
    fn is_current(&self, generation: u64) -> bool {
        let lifecycle = self.lifecycle.lock();
        lifecycle.state == WatcherState::Running && lifecycle.generation == generation
    }

    async fn watch(
        &self,
        generation: u64,
        token: CancellationToken,
        interval: Duration,
        manager: ReplicationManager,
    ) {
        loop {
            if !self.is_current(generation) {
                info!("Replication Watcher was stopped, exit from watch loop");
                return;
            }

            match self.store.get().await {
                Ok(resource) if should_verify(&resource) => {
                    self.restart_on_failure(generation, &token, &manager).await;
                    if !self.is_current(generation) {
                        info!("Replication Watcher was stopped, exit from watch loop");
                        return;
                    }
                }
                Ok(_) => {}
                Err(Error::ResourceNotFound { kind, name }) => {
                    info!("{} [{}] was deleted, exit from watch loop", kind, name);
                    self.stop_generation(generation);
                    return;
                }
                Err(e) => error!("Replication Watcher cannot fetch the resource: {}", e),
            }

            tokio::select! {
                _ = token.cancelled() => {
                    info!("Replication Watcher was stopped, exit from watch loop");
                    return;
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    async fn restart_on_failure(
        &self,
        generation: u64,
        token: &CancellationToken,
        manager: &ReplicationManager,
    ) {
        let _guard = self.lock.lock().await;
        if !self.is_current(generation) {
            return;
        }

        let cause = match manager.verify_replication(false).await {
            Ok(()) => return,
            Err(e) => e,
        };
        if !self.is_current(generation) {
            return;
        }

        info!("Try to restart replication because of error: {}", cause);
        match restart_replication(manager).await {
            Ok(()) => {
                self.metrics.record_watcher_restart(Outcome::Success);
                info!("Replication was restarted");
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(self.config.restart_wait) => {}
                }
            }
            Err(e) => {
                self.metrics.record_watcher_restart(Outcome::Failure);
                error!("Replication cannot be restarted: {}", e);
            }
        }
    }
}

/// Spec and status both say standby and the last switchover finished
fn should_verify(resource: &OpenSearchService) -> bool {
    let spec_standby = resource
        .spec
        .disaster_recovery
        .as_ref()
        .map(|dr| dr.mode == DrMode::Standby)
        .unwrap_or(false);
    let status = resource.dr_status();
    spec_standby
        && status.mode == Some(DrMode::Standby)
        && status.status == Some(SwitchoverStatus::Done)
}

async fn restart_replication(manager: &ReplicationManager) -> Result<()> {
    info!("Restart replication");
    manager.remove_previous_replication().await?;
    manager.run_replication_process().await
}
