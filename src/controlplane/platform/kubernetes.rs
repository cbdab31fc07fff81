//! Kubernetes Adapters
//!
//! kube-backed implementations of the cluster-facing ports: client Service
//! gating, deployment scaling, ConfigMap/Secret lookup and the status store
//! of one OpenSearchService.

use crate::controlplane::poll::poll;
use crate::crd::OpenSearchService;
use crate::domain::ports::{ConfigSource, Credentials, DeploymentScaler, ResourceStore, TrafficGate};
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use k8s_openapi::ByteString;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

/// Selector key that makes a Service match no pods
pub const DISABLED_SELECTOR_KEY: &str = "none";

const FIELD_MANAGER: &str = "opensearch-dr-operator";

fn not_found(kind: &str, name: &str, e: kube::Error) -> Error {
    match e {
        kube::Error::Api(err) if err.code == 404 => Error::ResourceNotFound {
            kind: kind.to_string(),
            name: name.to_string(),
        },
        other => Error::Kube(other),
    }
}

// =============================================================================
// Traffic Gate
// =============================================================================

/// Toggles client Services by adding or removing an unmatched selector
#[derive(Clone)]
pub struct KubeTrafficGate {
    client: Client,
    namespace: String,
}

impl KubeTrafficGate {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    async fn patch_selector(&self, service: &str, value: serde_json::Value) -> Result<()> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), &self.namespace);
        let patch = selector_patch(value);
        api.patch(service, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| not_found("Service", service, e))?;
        Ok(())
    }
}

fn selector_patch(value: serde_json::Value) -> serde_json::Value {
    json!({"spec": {"selector": {DISABLED_SELECTOR_KEY: value}}})
}

#[async_trait]
impl TrafficGate for KubeTrafficGate {
    async fn disable(&self, service: &str) -> Result<()> {
        self.patch_selector(service, json!("true")).await?;
        info!(service = %service, "Client traffic disabled");
        Ok(())
    }

    async fn enable(&self, service: &str) -> Result<()> {
        self.patch_selector(service, serde_json::Value::Null).await?;
        debug!(service = %service, "Client traffic enabled");
        Ok(())
    }
}

// =============================================================================
// Deployment Scaler
// =============================================================================

/// Scales Deployments via merge patch
#[derive(Clone)]
pub struct KubeDeploymentScaler {
    client: Client,
    namespace: String,
    interval: Duration,
    timeout: Duration,
}

impl KubeDeploymentScaler {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(120),
        }
    }
}

#[async_trait]
impl DeploymentScaler for KubeDeploymentScaler {
    async fn scale(&self, name: &str, replicas: i32, wait: bool) -> Result<()> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), &self.namespace);
        let patch = json!({"spec": {"replicas": replicas}});
        api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
            .map_err(|e| not_found("Deployment", name, e))?;
        info!(name = %name, replicas = %replicas, "Deployment scaled");

        if !wait {
            return Ok(());
        }

        poll(
            self.interval,
            self.timeout,
            &format!("deployment {} to have {} ready replicas", name, replicas),
            || {
                let api = api.clone();
                async move {
                    match api.get(name).await {
                        Ok(deployment) => ready_replicas(&deployment) == replicas,
                        Err(e) => {
                            debug!(name = %name, "Deployment cannot be read: {}", e);
                            false
                        }
                    }
                }
            },
        )
        .await
    }
}

fn ready_replicas(deployment: &Deployment) -> i32 {
    deployment
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0)
}

// =============================================================================
// Config Source
// =============================================================================

/// Reads ConfigMaps and Secrets of one namespace
#[derive(Clone)]
pub struct KubeConfigSource {
    client: Client,
    namespace: String,
}

impl KubeConfigSource {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }
}

#[async_trait]
impl ConfigSource for KubeConfigSource {
    async fn config_data(&self, name: &str) -> Result<BTreeMap<String, String>> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &self.namespace);
        let config_map = api
            .get(name)
            .await
            .map_err(|e| not_found("ConfigMap", name, e))?;
        Ok(config_map.data.unwrap_or_default())
    }

    async fn credentials(
        &self,
        secret: &str,
        username_key: &str,
        password_key: &str,
    ) -> Result<Credentials> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &self.namespace);
        let data = api
            .get(secret)
            .await
            .map_err(|e| not_found("Secret", secret, e))?
            .data
            .unwrap_or_default();
        Ok(Credentials::new(
            secret_value(&data, secret, username_key)?,
            secret_value(&data, secret, password_key)?,
        ))
    }
}

fn secret_value(data: &BTreeMap<String, ByteString>, secret: &str, key: &str) -> Result<String> {
    let raw = data.get(key).ok_or_else(|| {
        Error::Configuration(format!("secret [{}] has no [{}] key", secret, key))
    })?;
    String::from_utf8(raw.0.clone()).map_err(|_| {
        Error::Configuration(format!("secret [{}] key [{}] is not valid UTF-8", secret, key))
    })
}

// =============================================================================
// Resource Store
// =============================================================================

/// Status store of one OpenSearchService
#[derive(Clone)]
pub struct KubeResourceStore {
    api: Api<OpenSearchService>,
    name: String,
}

impl KubeResourceStore {
    pub fn new(client: Client, namespace: &str, name: impl Into<String>) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            name: name.into(),
        }
    }
}

#[async_trait]
impl ResourceStore for KubeResourceStore {
    async fn get(&self) -> Result<OpenSearchService> {
        self.api
            .get(&self.name)
            .await
            .map_err(|e| not_found("OpenSearchService", &self.name, e))
    }

    async fn replace_status(&self, resource: &OpenSearchService) -> Result<OpenSearchService> {
        // resourceVersion in the patch makes the API server reject stale writes
        let patch = json!({
            "metadata": {"resourceVersion": resource.metadata.resource_version},
            "status": resource.status,
        });
        self.api
            .patch_status(&self.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| match e {
                kube::Error::Api(err) if err.code == 409 => Error::Conflict {
                    kind: "OpenSearchService".into(),
                    name: self.name.clone(),
                },
                other => not_found("OpenSearchService", &self.name, other),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use k8s_openapi::api::apps::v1::DeploymentStatus;

    #[test]
    fn test_selector_patch() {
        assert_eq!(
            selector_patch(json!("true")),
            json!({"spec": {"selector": {"none": "true"}}})
        );
        assert_eq!(
            selector_patch(serde_json::Value::Null),
            json!({"spec": {"selector": {"none": null}}})
        );
    }

    #[test]
    fn test_secret_value() {
        let mut data = BTreeMap::new();
        data.insert("username".to_string(), ByteString(b"admin".to_vec()));

        assert_eq!(secret_value(&data, "creds", "username").unwrap(), "admin");
        assert_matches!(
            secret_value(&data, "creds", "password"),
            Err(Error::Configuration(_))
        );
    }

    #[test]
    fn test_ready_replicas_defaults_to_zero() {
        let mut deployment = Deployment::default();
        assert_eq!(ready_replicas(&deployment), 0);

        deployment.status = Some(DeploymentStatus {
            ready_replicas: Some(1),
            ..Default::default()
        });
        assert_eq!(ready_replicas(&deployment), 1);
    }
}
