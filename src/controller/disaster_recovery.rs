//! Disaster Recovery Subsystem
//!
//! Adapts the switchover orchestrator to the subsystem capability and keeps
//! the per-resource state that must outlive a single reconcile.

use crate::controlplane::{ReconcileContext, SwitchoverOrchestrator};
use crate::controller::subsystem::SubsystemReconciler;
use crate::crd::OpenSearchService;
use crate::domain::ports::ResourceStoreRef;
use crate::error::Result;
use crate::metrics::DrMetrics;
use crate::replication::{ReplicationWatcher, SwitchoverLock};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

/// State of one resource kept across reconciles
pub struct DrRuntime {
    watcher: ReplicationWatcher,
    context: Mutex<ReconcileContext>,
}

impl DrRuntime {
    pub fn new(store: ResourceStoreRef, metrics: Arc<DrMetrics>) -> Self {
        let lock: SwitchoverLock = Arc::new(tokio::sync::Mutex::new(()));
        Self {
            watcher: ReplicationWatcher::new(lock, store, metrics),
            context: Mutex::new(ReconcileContext::default()),
        }
    }

    pub fn watcher(&self) -> &ReplicationWatcher {
        &self.watcher
    }

    pub fn fingerprint(&self) -> Option<String> {
        self.context.lock().fingerprint.clone()
    }
}

/// Runtimes of every resource with DR enabled, keyed by `namespace/name`
#[derive(Default)]
pub struct DrRuntimes {
    runtimes: DashMap<String, Arc<DrRuntime>>,
}

impl DrRuntimes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runtime of `key`, created on first use
    pub fn get_or_insert_with(&self, key: &str, create: impl FnOnce() -> DrRuntime) -> Arc<DrRuntime> {
        self.runtimes
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(create()))
            .clone()
    }

    /// Drop the runtime of `key` and stop its watcher
    pub fn release(&self, key: &str) -> bool {
        match self.runtimes.remove(key) {
            Some((_, runtime)) => {
                runtime.watcher.pause();
                info!("Disaster recovery runtime of [{}] was released", key);
                true
            }
            None => false,
        }
    }

    pub fn pause_all(&self) {
        for runtime in self.runtimes.iter() {
            runtime.watcher.pause();
        }
    }

    pub fn len(&self) -> usize {
        self.runtimes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runtimes.is_empty()
    }
}

/// DR subsystem of one OpenSearchService
pub struct DisasterRecoverySubsystem {
    resource: Arc<OpenSearchService>,
    orchestrator: SwitchoverOrchestrator,
    runtime: Arc<DrRuntime>,
}

impl DisasterRecoverySubsystem {
    pub fn new(
        resource: Arc<OpenSearchService>,
        orchestrator: SwitchoverOrchestrator,
        runtime: Arc<DrRuntime>,
    ) -> Self {
        Self {
            resource,
            orchestrator,
            runtime,
        }
    }
}

#[async_trait]
impl SubsystemReconciler for DisasterRecoverySubsystem {
    fn name(&self) -> &'static str {
        "disaster-recovery"
    }

    async fn reconcile(&self) -> Result<()> {
        let mut ctx = self.runtime.context.lock().clone();
        let result = self.orchestrator.reconcile(&self.resource, &mut ctx).await;
        *self.runtime.context.lock() = ctx;
        result
    }

    async fn configure(&self) -> Result<()> {
        Ok(())
    }

    async fn status(&self) -> Result<()> {
        let status = self.resource.dr_status();
        info!(
            mode = ?status.mode,
            status = ?status.status,
            watcher = ?self.runtime.watcher.state(),
            "Disaster recovery state"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::subsystem::run_subsystems;
    use crate::controlplane::{OrchestratorConfig, SwitchoverPorts};
    use crate::crd::{DrMode, SwitchoverStatus};
    use crate::domain::ports::ProbeOutcome;
    use crate::replication::WatcherState;
    use crate::testing::{
        dr_spec, service, FakeConfigSource, FakePeerProbe, FakeResourceStore, FakeScaler,
        FakeSearchClient, FakeTrafficGate,
    };

    #[tokio::test(start_paused = true)]
    async fn test_release_pauses_watcher_and_forgets_runtime() {
        let resource = service(dr_spec(DrMode::Standby), Some(DrMode::Standby), Some(SwitchoverStatus::Done));
        let store = FakeResourceStore::new(resource);
        let metrics = Arc::new(DrMetrics::new().unwrap());
        let runtimes = DrRuntimes::new();

        let first = runtimes.get_or_insert_with("ns/opensearch", || DrRuntime::new(store.clone(), metrics.clone()));
        let again = runtimes.get_or_insert_with("ns/opensearch", || DrRuntime::new(store.clone(), metrics.clone()));
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(runtimes.len(), 1);

        let search = FakeSearchClient::new();
        let manager = crate::replication::ReplicationManager::new(
            search.clone(),
            "leader:9300",
            crate::replication::IndexPattern::new("logs-*").unwrap(),
        );
        first.watcher().start(30, manager);
        assert_eq!(first.watcher().state(), WatcherState::Running);

        assert!(runtimes.release("ns/opensearch"));
        assert!(runtimes.is_empty());
        assert_eq!(first.watcher().state(), WatcherState::Paused);
        assert!(!runtimes.release("ns/opensearch"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fingerprint_survives_between_reconciles() {
        let resource = service(dr_spec(DrMode::Active), Some(DrMode::Active), Some(SwitchoverStatus::Done));
        let store = FakeResourceStore::new(resource.clone());
        let search = FakeSearchClient::new();
        let config_source = FakeConfigSource::with_dr_config("cm1", "leader:9300", "logs-*");
        let metrics = Arc::new(DrMetrics::new().unwrap());
        let runtime = Arc::new(DrRuntime::new(store.clone(), metrics.clone()));

        let subsystem = |resource: &OpenSearchService| -> Box<dyn SubsystemReconciler> {
            let ports = SwitchoverPorts {
                search: search.clone(),
                traffic: FakeTrafficGate::with_journal(Default::default()),
                scaler: FakeScaler::with_journal(Default::default()),
                config_source: config_source.clone(),
                store: store.clone(),
                probe: FakePeerProbe::returning(ProbeOutcome::PeerActive),
                users_api: None,
            };
            let orchestrator = SwitchoverOrchestrator::new(
                ports,
                runtime.watcher().clone(),
                metrics.clone(),
                OrchestratorConfig::default(),
            );
            Box::new(DisasterRecoverySubsystem::new(
                Arc::new(resource.clone()),
                orchestrator,
                runtime.clone(),
            ))
        };

        run_subsystems(&[subsystem(&resource)]).await.unwrap();
        let first = runtime.fingerprint();
        assert!(first.is_some());
        assert!(search.calls().is_empty());

        // Same config on the next reconcile: still nothing to do
        run_subsystems(&[subsystem(&resource)]).await.unwrap();
        assert_eq!(runtime.fingerprint(), first);
        assert!(search.calls().is_empty());
        assert_eq!(runtime.watcher().state(), WatcherState::Paused);

        // Changed remote: the next reconcile runs a switchover
        config_source.set("cm1", "other-leader:9300", "logs-*");
        run_subsystems(&[subsystem(&resource)]).await.unwrap_err();
        assert_ne!(runtime.fingerprint(), first);
        assert!(!search.calls().is_empty());
    }
}
