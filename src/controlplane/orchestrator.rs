//! Switchover Orchestrator - The "Brain"
//!
//! Reconciliation entry point of the DR subsystem. Decides whether a mode
//! transition or config change requires a switchover and, holding the lock
//! shared with the replication watcher, sequences:
//! - Client traffic gating
//! - Replication teardown and rebuild
//! - Convergence checks
//! - Users recovery on promotion
//! - Status persistence and watcher policy

use crate::controlplane::fingerprint::config_fingerprint;
use crate::controlplane::poll::poll;
use crate::controlplane::status::update_status_with_retry;
use crate::controlplane::users_recovery::{UsersRecoveryConfig, UsersRecoveryCoordinator};
use crate::crd::{
    DisasterRecoverySpec, DisasterRecoveryStatus, DrMode, OpenSearchService, SwitchoverStatus,
    UsersRecoveryState,
};
use crate::domain::ports::{
    ConfigSourceRef, DeploymentScalerRef, PeerProbeRef, ProbeOutcome, ResourceStoreRef,
    SearchClientRef, TrafficGateRef, UsersRecoveryApiRef,
};
use crate::error::{Error, Result};
use crate::metrics::{DrMetrics, Outcome};
use crate::replication::{
    ReplicationChecker, ReplicationManager, ReplicationManagerConfig, ReplicationVerdict,
    ReplicationWatcher,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const STARTED_MESSAGE: &str = "The switchover process for OpenSearch has been started";
const REPLICATION_STARTED_MESSAGE: &str = "The replication has started successfully";
const REPLICATION_STOPPED_MESSAGE: &str = "The replication has stopped successfully";
const NO_CHECK_MESSAGE: &str = "Switchover mode has been changed without replication check";

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Secondary regional client service gated together with the primary one
    pub secondary_service: Option<String>,
    /// Pause after disabling client traffic
    pub traffic_settle: Duration,
    /// Interval of the post-start health poll
    pub convergence_interval: Duration,
    /// Budget of the post-start health poll
    pub convergence_timeout: Duration,
    pub replication: ReplicationManagerConfig,
    pub users_recovery: UsersRecoveryConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            secondary_service: None,
            traffic_settle: Duration::from_secs(2),
            convergence_interval: Duration::from_secs(10),
            convergence_timeout: Duration::from_secs(240),
            replication: ReplicationManagerConfig::default(),
            users_recovery: UsersRecoveryConfig::default(),
        }
    }
}

// =============================================================================
// Collaborators
// =============================================================================

/// External collaborators of one OpenSearchService
#[derive(Clone)]
pub struct SwitchoverPorts {
    pub search: SearchClientRef,
    pub traffic: TrafficGateRef,
    pub scaler: DeploymentScalerRef,
    pub config_source: ConfigSourceRef,
    pub store: ResourceStoreRef,
    pub probe: PeerProbeRef,
    /// Present when the resource has a DBaaS adapter
    pub users_api: Option<UsersRecoveryApiRef>,
}

/// State threaded between reconciles of one resource
#[derive(Debug, Clone, Default)]
pub struct ReconcileContext {
    /// Fingerprint of the DR config seen by the previous reconcile
    pub fingerprint: Option<String>,
}

/// What a successful switchover reports
#[derive(Debug, Clone)]
struct SwitchoverReport {
    message: String,
    users_recovery_state: Option<UsersRecoveryState>,
}

impl SwitchoverReport {
    fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
            users_recovery_state: None,
        }
    }
}

/// Why the switchover path runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    /// Mode differs from status, or a previous attempt must be resumed
    ModeChange,
    /// Only the DR config changed
    ConfigChange,
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Drives DR switchovers for one OpenSearchService
pub struct SwitchoverOrchestrator {
    ports: SwitchoverPorts,
    watcher: ReplicationWatcher,
    metrics: Arc<DrMetrics>,
    config: OrchestratorConfig,
}

impl SwitchoverOrchestrator {
    pub fn new(
        ports: SwitchoverPorts,
        watcher: ReplicationWatcher,
        metrics: Arc<DrMetrics>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            ports,
            watcher,
            metrics,
            config,
        }
    }

    /// Reconcile the DR state of `resource`
    pub async fn reconcile(&self, resource: &OpenSearchService, ctx: &mut ReconcileContext) -> Result<()> {
        let dr = resource.spec.disaster_recovery.clone().ok_or_else(|| {
            Error::Configuration("spec.disasterRecovery is not set".into())
        })?;
        let observed = resource.dr_status();
        let mode_trigger = observed.mode != Some(dr.mode)
            || observed.status.map(|s| s.needs_resume()).unwrap_or(false);

        let (manager, fingerprint) = match self.load_replication(&dr).await {
            Ok(loaded) => loaded,
            Err(e) => {
                error!("DR configuration cannot be loaded: {}", e);
                if mode_trigger {
                    let message = switching_error(&e);
                    if let Err(write_err) = self.persist(dr.mode, SwitchoverStatus::Failed, &message, None).await {
                        error!("Disaster recovery status cannot be updated: {}", write_err);
                    }
                }
                return Err(e);
            }
        };

        let config_trigger = ctx
            .fingerprint
            .as_deref()
            .map(|previous| previous != fingerprint)
            .unwrap_or(false);

        let trigger = if mode_trigger {
            Some(Trigger::ModeChange)
        } else if config_trigger {
            Some(Trigger::ConfigChange)
        } else {
            None
        };

        let result = match trigger {
            Some(trigger) => self.switchover(resource, &dr, &observed, manager, trigger).await,
            None => {
                debug!("DR mode [{}] is already applied", dr.mode);
                let result = if dr.mode == DrMode::Active {
                    self.enable_traffic(resource).await
                } else {
                    Ok(())
                };
                self.apply_watcher_policy(&dr, manager);
                result
            }
        };

        ctx.fingerprint = Some(fingerprint);
        result
    }

    async fn load_replication(&self, dr: &DisasterRecoverySpec) -> Result<(ReplicationManager, String)> {
        let data = self.ports.config_source.config_data(&dr.config_map_name).await?;
        let fingerprint = config_fingerprint(&data)?;
        let manager = ReplicationManager::from_config_data(self.ports.search.clone(), &data)?
            .with_config(self.config.replication.clone());
        Ok((manager, fingerprint))
    }

    /// Run a switchover under the shared lock. Traffic restoration and the final
    /// status write happen on every exit path.
    async fn switchover(
        &self,
        resource: &OpenSearchService,
        dr: &DisasterRecoverySpec,
        observed: &DisasterRecoveryStatus,
        manager: ReplicationManager,
        trigger: Trigger,
    ) -> Result<()> {
        info!(mode = %dr.mode, ?trigger, "Switchover started");
        let started = Instant::now();

        self.watcher.pause();
        let lock = self.watcher.lock();
        let guard = lock.lock().await;

        let outcome = self
            .run_switchover(resource, dr, observed, &manager, trigger)
            .await;

        if dr.mode == DrMode::Active {
            if let Err(e) = self.enable_traffic(resource).await {
                error!("Client traffic cannot be enabled: {}", e);
            }
        }

        let (status, message, users_state) = match &outcome {
            Ok(report) => (
                SwitchoverStatus::Done,
                report.message.clone(),
                report.users_recovery_state,
            ),
            Err(e) => {
                error!("Switchover to [{}] mode failed: {}", dr.mode, e);
                (SwitchoverStatus::Failed, switching_error(e), None)
            }
        };
        let users_state = users_state.filter(|_| resource.spec.dbaas_adapter.is_some());
        let persisted = self.persist(dr.mode, status, &message, users_state).await;
        match &persisted {
            Ok(()) => info!("Disaster recovery status was updated"),
            Err(e) => error!("Disaster recovery status cannot be updated: {}", e),
        }

        let result = if outcome.is_ok() {
            Outcome::Success
        } else {
            Outcome::Failure
        };
        self.metrics
            .record_switchover(dr.mode, result, started.elapsed());

        self.apply_watcher_policy(dr, manager);
        drop(guard);

        match outcome {
            Ok(_) => persisted,
            Err(Error::PeerNotActive(reason)) => {
                warn!("Standby switchover aborted, peer is not active: {}", reason);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn run_switchover(
        &self,
        resource: &OpenSearchService,
        dr: &DisasterRecoverySpec,
        observed: &DisasterRecoveryStatus,
        manager: &ReplicationManager,
        trigger: Trigger,
    ) -> Result<SwitchoverReport> {
        let users_state = match observed.users_recovery_state {
            Some(UsersRecoveryState::Running) => UsersRecoveryState::Running,
            _ => UsersRecoveryState::Idle,
        };
        let users_state = resource.spec.dbaas_adapter.as_ref().map(|_| users_state);
        self.persist(dr.mode, SwitchoverStatus::Running, STARTED_MESSAGE, users_state)
            .await?;

        self.disable_traffic(resource).await?;
        tokio::time::sleep(self.config.traffic_settle).await;

        match dr.mode {
            DrMode::Standby => self.become_standby(manager).await,
            DrMode::Active | DrMode::Disable => {
                let check_needed = is_replication_check_needed(dr, observed);
                let mut report = self.stop_replication(manager, check_needed).await?;
                if dr.mode == DrMode::Active {
                    report.users_recovery_state =
                        self.promote(resource, dr, observed, trigger, &mut report).await?;
                }
                Ok(report)
            }
        }
    }

    // =========================================================================
    // Standby
    // =========================================================================

    async fn become_standby(&self, manager: &ReplicationManager) -> Result<SwitchoverReport> {
        info!("Removing previous replication rule");
        manager.remove_previous_replication().await?;

        self.check_peer(manager.remote_url()).await?;

        manager.run_replication_process().await?;
        self.wait_for_convergence(manager).await?;
        Ok(SwitchoverReport::new(REPLICATION_STARTED_MESSAGE))
    }

    /// Only a peer that refuses the connection is taken as active
    async fn check_peer(&self, remote: &str) -> Result<()> {
        info!("Checking connection with the other side [{}]", remote);
        match self.ports.probe.probe(remote).await {
            ProbeOutcome::PeerActive => {
                info!("Other side is active");
                Ok(())
            }
            ProbeOutcome::Responded(status) => Err(Error::PeerNotActive(format!(
                "the other side answered with HTTP {}, move it into active mode first",
                status
            ))),
            ProbeOutcome::Unreachable(reason) => Err(Error::PeerNotActive(format!(
                "the other side cannot be reached ({}), move it into active mode first",
                reason
            ))),
        }
    }

    async fn wait_for_convergence(&self, manager: &ReplicationManager) -> Result<()> {
        let checker = ReplicationChecker::new(manager.client());
        let metrics = self.metrics.clone();
        poll(
            self.config.convergence_interval,
            self.config.convergence_timeout,
            "replication to become healthy",
            || {
                let checker = checker.clone();
                let metrics = metrics.clone();
                async move {
                    match checker.check_replication().await {
                        Ok(verdict) => {
                            metrics.set_verdict(verdict);
                            if verdict == ReplicationVerdict::Up {
                                info!("Replication is healthy");
                                true
                            } else {
                                info!("Replication is not healthy yet: {}", verdict);
                                false
                            }
                        }
                        Err(e) => {
                            error!("Unable to get replication state: {}", e);
                            false
                        }
                    }
                }
            },
        )
        .await?;

        let indices = manager.replicated_indices().await?;
        manager.execute_replication_check(&indices).await
    }

    // =========================================================================
    // Active / Disable
    // =========================================================================

    async fn stop_replication(&self, manager: &ReplicationManager, check_needed: bool) -> Result<SwitchoverReport> {
        manager.verify_replication(true).await?;

        let message = if check_needed {
            let indices = manager.replicated_indices().await?;
            info!("Start replication check");
            manager.execute_replication_check(&indices).await?;
            REPLICATION_STOPPED_MESSAGE
        } else {
            NO_CHECK_MESSAGE
        };

        manager.stop_and_clean().await?;
        Ok(SwitchoverReport::new(message))
    }

    /// Reopen the cluster to clients and restore users. A users recovery
    /// failure is reported, not propagated.
    async fn promote(
        &self,
        resource: &OpenSearchService,
        dr: &DisasterRecoverySpec,
        observed: &DisasterRecoveryStatus,
        trigger: Trigger,
        report: &mut SwitchoverReport,
    ) -> Result<Option<UsersRecoveryState>> {
        self.enable_traffic(resource).await?;

        let (adapter, api) = match (&resource.spec.dbaas_adapter, &self.ports.users_api) {
            (Some(adapter), Some(api)) if trigger == Trigger::ModeChange => (adapter, api.clone()),
            _ => return Ok(None),
        };

        self.ports.scaler.scale(&adapter.name, 1, !dr.no_wait).await?;

        info!("Start users recovery");
        let coordinator = UsersRecoveryCoordinator::new(api, self.ports.store.clone())
            .with_config(self.config.users_recovery.clone());
        match coordinator.recover(observed.users_recovery_state).await {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                error!("Users recovery failed: {}", e);
                report.message = format!("{}. {}", report.message, e);
                Ok(Some(UsersRecoveryState::Failed))
            }
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn client_services(&self, resource: &OpenSearchService) -> Vec<String> {
        let mut services = vec![resource.metadata.name.clone().unwrap_or_default()];
        if let Some(secondary) = self.config.secondary_service.as_ref().filter(|s| !s.is_empty()) {
            services.push(secondary.clone());
        }
        services
    }

    async fn disable_traffic(&self, resource: &OpenSearchService) -> Result<()> {
        for service in self.client_services(resource) {
            info!("Disable client service [{}]", service);
            self.ports.traffic.disable(&service).await?;
        }
        Ok(())
    }

    async fn enable_traffic(&self, resource: &OpenSearchService) -> Result<()> {
        for service in self.client_services(resource) {
            debug!("Enable client service [{}]", service);
            self.ports.traffic.enable(&service).await?;
        }
        Ok(())
    }

    async fn persist(
        &self,
        mode: DrMode,
        status: SwitchoverStatus,
        message: &str,
        users_state: Option<UsersRecoveryState>,
    ) -> Result<()> {
        update_status_with_retry(self.ports.store.as_ref(), |s| {
            s.mode = Some(mode);
            s.status = Some(status);
            if !message.is_empty() {
                s.message = message.to_string();
            }
            if let Some(users_state) = users_state {
                s.users_recovery_state = Some(users_state);
            }
        })
        .await
        .map(|_| ())
    }

    fn apply_watcher_policy(&self, dr: &DisasterRecoverySpec, manager: ReplicationManager) {
        if dr.replication_watcher_enabled {
            self.watcher
                .start(dr.replication_watcher_interval, manager);
        } else {
            self.watcher.pause();
        }
    }
}

/// The replicated data must be verified before stopping replication
pub fn is_replication_check_needed(dr: &DisasterRecoverySpec, observed: &DisasterRecoveryStatus) -> bool {
    if dr.no_wait || dr.mode != DrMode::Active {
        return false;
    }
    observed.mode != Some(DrMode::Active) || observed.status == Some(SwitchoverStatus::Failed)
}

fn switching_error(e: &Error) -> String {
    format!("Error occurred during OpenSearch switching: {}", e)
}
