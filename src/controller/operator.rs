//! OpenSearchService Controller
//!
//! kube-runtime controller loop. Every reconcile assembles the subsystem list
//! of the resource, wires its adapters and runs the driver.

use crate::controller::disaster_recovery::{DisasterRecoverySubsystem, DrRuntime, DrRuntimes};
use crate::controller::subsystem::{run_subsystems, SubsystemReconciler};
use crate::controlplane::backends::{
    build_http_client, DbaasUsersRecoveryClient, HttpPeerProbe, RestClient, RestClientConfig,
    ADAPTER_PASSWORD_KEY, ADAPTER_USERNAME_KEY, AGGREGATOR_PASSWORD_KEY, AGGREGATOR_USERNAME_KEY,
};
use crate::controlplane::platform::{
    KubeConfigSource, KubeDeploymentScaler, KubeResourceStore, KubeTrafficGate,
};
use crate::controlplane::{OrchestratorConfig, SwitchoverOrchestrator, SwitchoverPorts};
use crate::crd::OpenSearchService;
use crate::domain::ports::{ConfigSource, Credentials, UsersRecoveryApiRef};
use crate::error::{Error, ErrorAction, Result};
use crate::metrics::DrMetrics;
use futures::StreamExt;
use kube::api::{ListParams, Patch, PatchParams};
use kube::runtime::controller::{Action, Controller as KubeController};
use kube::runtime::watcher::Config;
use kube::{Api, Client, Resource, ResourceExt};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Secret keys of the local cluster credentials
const USERNAME_KEY: &str = "username";
const PASSWORD_KEY: &str = "password";

/// Held while the resource owns a DR runtime in this operator
pub const DR_FINALIZER: &str = "opensearch.billyronks.io/dr-runtime";

// =============================================================================
// Configuration
// =============================================================================

/// Operator-wide settings
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    /// Namespace to watch; all namespaces when unset
    pub namespace: Option<String>,
    /// Overrides the in-namespace OpenSearch URL
    pub opensearch_url: Option<String>,
    /// Secondary regional client service gated with the primary one
    pub secondary_service: Option<String>,
    /// Root CA of the OpenSearch cluster
    pub ca_cert: PathBuf,
    /// Root CA of the DBaaS endpoints
    pub dbaas_ca_cert: PathBuf,
    /// Timeout of outbound HTTP requests
    pub http_timeout: Duration,
    /// Requeue interval after a successful reconcile
    pub requeue_after: Duration,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            opensearch_url: None,
            secondary_service: None,
            ca_cert: PathBuf::from("/certs/crt.pem"),
            dbaas_ca_cert: PathBuf::from("/tls/dbaas/ca.crt"),
            http_timeout: Duration::from_secs(30),
            requeue_after: Duration::from_secs(300),
        }
    }
}

// =============================================================================
// Context
// =============================================================================

/// Shared state of the controller
pub struct OperatorContext {
    client: Client,
    config: OperatorConfig,
    metrics: Arc<DrMetrics>,
    runtimes: DrRuntimes,
}

impl OperatorContext {
    pub fn new(client: Client, config: OperatorConfig, metrics: Arc<DrMetrics>) -> Self {
        Self {
            client,
            config,
            metrics,
            runtimes: DrRuntimes::new(),
        }
    }

    fn runtime(&self, key: &str, namespace: &str, name: &str) -> Arc<DrRuntime> {
        self.runtimes.get_or_insert_with(key, || {
            let store = Arc::new(KubeResourceStore::new(self.client.clone(), namespace, name));
            DrRuntime::new(store, self.metrics.clone())
        })
    }

    /// Wire the adapters of one resource
    async fn ports(&self, resource: &OpenSearchService, namespace: &str) -> Result<SwitchoverPorts> {
        let name = resource.name_any();
        let config_source = Arc::new(KubeConfigSource::new(self.client.clone(), namespace));

        let mut rest = RestClientConfig::for_service(&name, self.config.ca_cert.clone())
            .with_timeout(self.config.http_timeout);
        if let Some(url) = &self.config.opensearch_url {
            rest = rest.with_url(url.clone());
        }
        if let Some(secret) = &resource.spec.credentials_secret_name {
            rest = rest.with_credentials(
                config_source
                    .credentials(secret, USERNAME_KEY, PASSWORD_KEY)
                    .await?,
            );
        }

        let users_api: Option<UsersRecoveryApiRef> = match &resource.spec.dbaas_adapter {
            Some(adapter) => {
                let adapter_credentials = config_source
                    .credentials(&adapter.secret_name, ADAPTER_USERNAME_KEY, ADAPTER_PASSWORD_KEY)
                    .await?;
                let aggregator_credentials = config_source
                    .credentials(&adapter.secret_name, AGGREGATOR_USERNAME_KEY, AGGREGATOR_PASSWORD_KEY)
                    .await
                    .unwrap_or_else(|e| {
                        debug!("Aggregator credentials are not available: {}", e);
                        Credentials::default()
                    });
                let http = build_http_client(Some(&self.config.dbaas_ca_cert), self.config.http_timeout)?;
                Some(Arc::new(DbaasUsersRecoveryClient::new(
                    http,
                    adapter,
                    adapter_credentials,
                    aggregator_credentials,
                )))
            }
            None => None,
        };

        Ok(SwitchoverPorts {
            search: Arc::new(RestClient::new(rest)?),
            traffic: Arc::new(KubeTrafficGate::new(self.client.clone(), namespace)),
            scaler: Arc::new(KubeDeploymentScaler::new(self.client.clone(), namespace)),
            config_source,
            store: Arc::new(KubeResourceStore::new(self.client.clone(), namespace, &name)),
            probe: Arc::new(HttpPeerProbe::new(HttpPeerProbe::DEFAULT_TIMEOUT)?),
            users_api,
        })
    }

    fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            secondary_service: self.config.secondary_service.clone(),
            ..OrchestratorConfig::default()
        }
    }
}

// =============================================================================
// Controller
// =============================================================================

/// Run the controller until a shutdown signal arrives
pub async fn run(ctx: Arc<OperatorContext>) -> Result<()> {
    info!("Starting OpenSearchService controller");

    let services: Api<OpenSearchService> = match &ctx.config.namespace {
        Some(namespace) => Api::namespaced(ctx.client.clone(), namespace),
        None => Api::all(ctx.client.clone()),
    };

    if let Err(e) = services.list(&ListParams::default().limit(1)).await {
        error!("Failed to list OpenSearchServices. Is the CRD installed? Error: {}", e);
        return Err(Error::Kube(e));
    }

    KubeController::new(services, Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx.clone())
        .for_each(|result| async move {
            match result {
                Ok((obj, action)) => debug!(name = %obj.name, ?action, "Reconciliation successful"),
                Err(e) => error!(error = %e, "Reconciliation error"),
            }
        })
        .await;

    ctx.runtimes.pause_all();
    info!("Controller stopped");
    Ok(())
}

/// Reconcile one OpenSearchService
async fn reconcile(resource: Arc<OpenSearchService>, ctx: Arc<OperatorContext>) -> Result<Action> {
    let name = resource.name_any();
    let namespace = resource.namespace().unwrap_or_default();
    let key = format!("{}/{}", namespace, name);
    debug!(name = %name, namespace = %namespace, "Reconciling OpenSearchService");

    let api: Api<OpenSearchService> = Api::namespaced(ctx.client.clone(), &namespace);
    let holds_finalizer = has_finalizer(&resource);

    if resource.meta().deletion_timestamp.is_some() || resource.spec.disaster_recovery.is_none() {
        ctx.runtimes.release(&key);
        if holds_finalizer {
            remove_finalizer(&api, &resource).await?;
        }
        return Ok(Action::await_change());
    }

    if !holds_finalizer {
        add_finalizer(&api, &resource).await?;
        return Ok(Action::requeue(Duration::from_secs(1)));
    }

    let runtime = ctx.runtime(&key, &namespace, &name);
    let ports = ctx.ports(&resource, &namespace).await?;
    let orchestrator = SwitchoverOrchestrator::new(
        ports,
        runtime.watcher().clone(),
        ctx.metrics.clone(),
        ctx.orchestrator_config(),
    );
    let subsystems: Vec<Box<dyn SubsystemReconciler>> = vec![Box::new(DisasterRecoverySubsystem::new(
        resource.clone(),
        orchestrator,
        runtime,
    ))];

    run_subsystems(&subsystems).await?;
    Ok(Action::requeue(ctx.config.requeue_after))
}

fn has_finalizer(resource: &OpenSearchService) -> bool {
    resource.finalizers().iter().any(|f| f == DR_FINALIZER)
}

/// Finalizer list of `resource` with ours added or removed
fn finalizers_with(resource: &OpenSearchService, present: bool) -> Vec<String> {
    let mut finalizers: Vec<String> = resource
        .finalizers()
        .iter()
        .filter(|f| f.as_str() != DR_FINALIZER)
        .cloned()
        .collect();
    if present {
        finalizers.push(DR_FINALIZER.to_string());
    }
    finalizers
}

async fn add_finalizer(api: &Api<OpenSearchService>, resource: &OpenSearchService) -> Result<()> {
    debug!(name = %resource.name_any(), "Adding finalizer");
    patch_finalizers(api, resource, finalizers_with(resource, true)).await
}

async fn remove_finalizer(api: &Api<OpenSearchService>, resource: &OpenSearchService) -> Result<()> {
    debug!(name = %resource.name_any(), "Removing finalizer");
    patch_finalizers(api, resource, finalizers_with(resource, false)).await
}

async fn patch_finalizers(
    api: &Api<OpenSearchService>,
    resource: &OpenSearchService,
    finalizers: Vec<String>,
) -> Result<()> {
    let patch = serde_json::json!({
        "metadata": {
            "resourceVersion": resource.metadata.resource_version,
            "finalizers": finalizers
        }
    });
    api.patch(&resource.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

fn error_policy(resource: Arc<OpenSearchService>, error: &Error, _ctx: Arc<OperatorContext>) -> Action {
    error!(name = %resource.name_any(), "Reconciliation failed: {}", error);
    requeue_action(error)
}

fn requeue_action(error: &Error) -> Action {
    match error.action() {
        ErrorAction::RequeueWithBackoff => Action::requeue(Duration::from_secs(30)),
        ErrorAction::RequeueAfter(duration) => Action::requeue(duration),
        ErrorAction::NoRequeue => Action::await_change(),
    }
}
