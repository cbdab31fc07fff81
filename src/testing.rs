//! In-memory fakes of the domain ports, shared by unit tests.
//!
//! Every fake appends to an optional [`Journal`] so tests can assert on the
//! relative order of calls across collaborators.

use crate::crd::{
    DbaasAdapterSpec, DisasterRecoverySpec, DisasterRecoveryStatus, DrMode, OpenSearchService,
    OpenSearchServiceSpec, OpenSearchServiceStatus, SwitchoverStatus,
};
use crate::domain::ports::{
    ConfigSource, Credentials, DeploymentScaler, PeerProbe, ProbeOutcome, ResourceStore,
    RestResponse, SearchClient, TrafficGate, UsersRecoveryApi,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Method;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

// =============================================================================
// Journal
// =============================================================================

#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn record(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    /// Position of the first entry starting with `prefix`
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.0.lock().iter().position(|e| e.starts_with(prefix))
    }
}

// =============================================================================
// Search Client
// =============================================================================

#[derive(Clone)]
pub enum Reply {
    Response(RestResponse),
    TransportError(String),
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: Method,
    pub path: String,
    pub body: Option<serde_json::Value>,
}

/// Routes exact `(method, path)` pairs to scripted replies. The last reply of a
/// route repeats; unknown routes answer 404.
#[derive(Default)]
pub struct FakeSearchClient {
    routes: Mutex<HashMap<(Method, String), VecDeque<Reply>>>,
    calls: Mutex<Vec<RecordedCall>>,
    journal: Journal,
}

impl FakeSearchClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_journal(journal: Journal) -> Arc<Self> {
        Arc::new(Self {
            journal,
            ..Default::default()
        })
    }

    /// Replace the replies of a route with a single sticky JSON reply
    pub fn on(&self, method: Method, path: &str, status: u16, body: serde_json::Value) {
        self.on_sequence(method, path, vec![(status, body)]);
    }

    pub fn on_sequence(&self, method: Method, path: &str, replies: Vec<(u16, serde_json::Value)>) {
        let queue = replies
            .into_iter()
            .map(|(status, body)| Reply::Response(RestResponse::new(status, body.to_string())))
            .collect();
        self.routes.lock().insert((method, path.to_string()), queue);
    }

    pub fn on_text(&self, method: Method, path: &str, status: u16, body: &str) {
        let queue = VecDeque::from(vec![Reply::Response(RestResponse::new(status, body))]);
        self.routes.lock().insert((method, path.to_string()), queue);
    }

    pub fn fail(&self, method: Method, path: &str, message: &str) {
        let queue = VecDeque::from(vec![Reply::TransportError(message.to_string())]);
        self.routes.lock().insert((method, path.to_string()), queue);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn count(&self, method: Method, path: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.method == method && c.path == path)
            .count()
    }

    /// Calls that change remote state
    pub fn mutating_calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.method != Method::GET)
            .cloned()
            .collect()
    }

    pub fn reset_calls(&self) {
        self.calls.lock().clear();
    }
}

#[async_trait]
impl SearchClient for FakeSearchClient {
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<RestResponse> {
        self.journal.record(format!("search:{} {}", method, path));
        self.calls.lock().push(RecordedCall {
            method: method.clone(),
            path: path.to_string(),
            body,
        });

        let reply = {
            let mut routes = self.routes.lock();
            match routes.get_mut(&(method, path.to_string())) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };

        match reply {
            Some(Reply::Response(response)) => Ok(response),
            Some(Reply::TransportError(message)) => Err(Error::Internal(message)),
            None => Ok(RestResponse::new(404, r#"{"error":"no route"}"#)),
        }
    }
}

// =============================================================================
// Kubernetes Collaborators
// =============================================================================

#[derive(Default)]
pub struct FakeTrafficGate {
    pub journal: Journal,
    events: Mutex<Vec<String>>,
}

impl FakeTrafficGate {
    pub fn with_journal(journal: Journal) -> Arc<Self> {
        Arc::new(Self {
            journal,
            ..Default::default()
        })
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl TrafficGate for FakeTrafficGate {
    async fn disable(&self, service: &str) -> Result<()> {
        let entry = format!("traffic:disable:{}", service);
        self.journal.record(entry.clone());
        self.events.lock().push(entry);
        Ok(())
    }

    async fn enable(&self, service: &str) -> Result<()> {
        let entry = format!("traffic:enable:{}", service);
        self.journal.record(entry.clone());
        self.events.lock().push(entry);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeScaler {
    pub journal: Journal,
    scaled: Mutex<Vec<(String, i32, bool)>>,
}

impl FakeScaler {
    pub fn with_journal(journal: Journal) -> Arc<Self> {
        Arc::new(Self {
            journal,
            ..Default::default()
        })
    }

    pub fn scaled(&self) -> Vec<(String, i32, bool)> {
        self.scaled.lock().clone()
    }
}

#[async_trait]
impl DeploymentScaler for FakeScaler {
    async fn scale(&self, name: &str, replicas: i32, wait: bool) -> Result<()> {
        self.journal.record(format!("scale:{}:{}", name, replicas));
        self.scaled.lock().push((name.to_string(), replicas, wait));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeConfigSource {
    maps: Mutex<HashMap<String, BTreeMap<String, String>>>,
}

impl FakeConfigSource {
    pub fn with_dr_config(name: &str, remote: &str, pattern: &str) -> Arc<Self> {
        let source = Self::default();
        source.set(name, remote, pattern);
        Arc::new(source)
    }

    pub fn set(&self, name: &str, remote: &str, pattern: &str) {
        let mut data = BTreeMap::new();
        data.insert("remoteCluster".to_string(), remote.to_string());
        data.insert("indicesPattern".to_string(), pattern.to_string());
        self.maps.lock().insert(name.to_string(), data);
    }
}

#[async_trait]
impl ConfigSource for FakeConfigSource {
    async fn config_data(&self, name: &str) -> Result<BTreeMap<String, String>> {
        self.maps
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "ConfigMap".into(),
                name: name.into(),
            })
    }

    async fn credentials(&self, _secret: &str, _u: &str, _p: &str) -> Result<Credentials> {
        Ok(Credentials::new("admin", "admin"))
    }
}

/// Resource store with a version counter and optional injected conflicts
pub struct FakeResourceStore {
    resource: Mutex<OpenSearchService>,
    version: AtomicUsize,
    conflicts: AtomicUsize,
    history: Mutex<Vec<DisasterRecoveryStatus>>,
    journal: Journal,
    deleted: AtomicBool,
    reads: AtomicUsize,
}

impl FakeResourceStore {
    pub fn new(resource: OpenSearchService) -> Arc<Self> {
        Self::with_journal(resource, Journal::default())
    }

    pub fn with_journal(mut resource: OpenSearchService, journal: Journal) -> Arc<Self> {
        resource.metadata.resource_version = Some("1".into());
        Arc::new(Self {
            resource: Mutex::new(resource),
            version: AtomicUsize::new(1),
            conflicts: AtomicUsize::new(0),
            history: Mutex::new(Vec::new()),
            journal,
            deleted: AtomicBool::new(false),
            reads: AtomicUsize::new(0),
        })
    }

    /// Make the next `n` status replacements fail with a conflict
    pub fn inject_conflicts(&self, n: usize) {
        self.conflicts.store(n, Ordering::SeqCst);
    }

    pub fn current(&self) -> OpenSearchService {
        self.resource.lock().clone()
    }

    pub fn status(&self) -> DisasterRecoveryStatus {
        self.current().dr_status()
    }

    /// Every status written, in order
    pub fn history(&self) -> Vec<DisasterRecoveryStatus> {
        self.history.lock().clone()
    }

    /// Remove the resource; every later read is NotFound
    pub fn delete(&self) {
        self.deleted.store(true, Ordering::SeqCst);
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Mutate the stored resource out of band (simulates a user edit)
    pub fn edit(&self, f: impl FnOnce(&mut OpenSearchService)) {
        let mut resource = self.resource.lock();
        f(&mut resource);
        let v = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        resource.metadata.resource_version = Some(v.to_string());
    }
}

#[async_trait]
impl ResourceStore for FakeResourceStore {
    async fn get(&self) -> Result<OpenSearchService> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.deleted.load(Ordering::SeqCst) {
            return Err(Error::ResourceNotFound {
                kind: "OpenSearchService".into(),
                name: "opensearch".into(),
            });
        }
        Ok(self.resource.lock().clone())
    }

    async fn replace_status(&self, resource: &OpenSearchService) -> Result<OpenSearchService> {
        if self
            .conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            // Someone else wrote in between: bump the version
            let mut stored = self.resource.lock();
            let v = self.version.fetch_add(1, Ordering::SeqCst) + 1;
            stored.metadata.resource_version = Some(v.to_string());
            return Err(Error::Conflict {
                kind: "OpenSearchService".into(),
                name: "opensearch".into(),
            });
        }

        let mut stored = self.resource.lock();
        if stored.metadata.resource_version != resource.metadata.resource_version {
            return Err(Error::Conflict {
                kind: "OpenSearchService".into(),
                name: "opensearch".into(),
            });
        }
        stored.status = resource.status.clone();
        let v = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        stored.metadata.resource_version = Some(v.to_string());

        let status = stored.dr_status();
        self.journal.record(format!(
            "status:{}",
            status.status.map(|s| s.to_string()).unwrap_or_default()
        ));
        self.history.lock().push(status);
        Ok(stored.clone())
    }
}

// =============================================================================
// Peer Probe
// =============================================================================

pub struct FakePeerProbe {
    outcome: Mutex<ProbeOutcome>,
    probes: AtomicUsize,
}

impl FakePeerProbe {
    pub fn returning(outcome: ProbeOutcome) -> Arc<Self> {
        Arc::new(Self {
            outcome: Mutex::new(outcome),
            probes: AtomicUsize::new(0),
        })
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerProbe for FakePeerProbe {
    async fn probe(&self, _address: &str) -> ProbeOutcome {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.outcome.lock().clone()
    }
}

// =============================================================================
// Users Recovery
// =============================================================================

/// Scripted aggregator/adapter pair
#[derive(Default)]
pub struct FakeUsersApi {
    request_results: Mutex<VecDeque<bool>>,
    states: Mutex<VecDeque<String>>,
    requests: AtomicUsize,
    state_polls: AtomicUsize,
}

impl FakeUsersApi {
    /// Every restore request succeeds; adapter reports the given states in order (last repeats)
    pub fn with_states(states: &[&str]) -> Arc<Self> {
        let api = Self::default();
        *api.states.lock() = states.iter().map(|s| s.to_string()).collect();
        Arc::new(api)
    }

    pub fn set_request_results(&self, results: &[bool]) {
        *self.request_results.lock() = results.iter().copied().collect();
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn state_polls(&self) -> usize {
        self.state_polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UsersRecoveryApi for FakeUsersApi {
    async fn request_restore(&self) -> Result<()> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let ok = {
            let mut results = self.request_results.lock();
            match results.len() {
                0 => true,
                1 => results[0],
                _ => results.pop_front().unwrap_or(true),
            }
        };
        if ok {
            Ok(())
        } else {
            Err(Error::unexpected_status("restore-password", 503, "unavailable"))
        }
    }

    async fn restore_state(&self) -> Result<String> {
        self.state_polls.fetch_add(1, Ordering::SeqCst);
        let mut states = self.states.lock();
        let state = if states.len() > 1 {
            states.pop_front()
        } else {
            states.front().cloned()
        };
        state.ok_or_else(|| Error::Internal("no state scripted".into()))
    }
}

// =============================================================================
// Resource Builders
// =============================================================================

pub fn dr_spec(mode: DrMode) -> DisasterRecoverySpec {
    DisasterRecoverySpec {
        mode,
        no_wait: false,
        config_map_name: "cm1".into(),
        replication_watcher_enabled: false,
        replication_watcher_interval: 0,
    }
}

pub fn dbaas_adapter() -> DbaasAdapterSpec {
    DbaasAdapterSpec {
        name: "dbaas-opensearch-adapter".into(),
        adapter_address: "http://adapter:8080".into(),
        aggregator_address: "http://aggregator:8080".into(),
        physical_database_identifier: "opensearch-1".into(),
        secret_name: "dbaas-adapter-secret".into(),
    }
}

/// Build an `OpenSearchService` named `opensearch` in namespace `dr`
pub fn service(
    spec: DisasterRecoverySpec,
    status_mode: Option<DrMode>,
    status: Option<SwitchoverStatus>,
) -> OpenSearchService {
    let mut resource = OpenSearchService::new(
        "opensearch",
        OpenSearchServiceSpec {
            disaster_recovery: Some(spec),
            dbaas_adapter: None,
            credentials_secret_name: None,
        },
    );
    resource.metadata.namespace = Some("dr".into());
    resource.status = Some(OpenSearchServiceStatus {
        disaster_recovery_status: DisasterRecoveryStatus {
            mode: status_mode,
            status,
            ..Default::default()
        },
    });
    resource
}
