//! OpenSearch REST Client
//!
//! reqwest-backed [`SearchClient`]. Every HTTP status is handed back to the
//! caller. Failed connects are retried for every method, timeouts only for GET.

use crate::domain::ports::{Credentials, RestResponse, SearchClient};
use crate::error::{Error, Result};
use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use reqwest::{Certificate, Client, Method};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the REST client
#[derive(Debug, Clone)]
pub struct RestClientConfig {
    /// Base URL of the cluster, e.g. `https://opensearch-internal:9200`
    pub url: String,
    pub credentials: Credentials,
    /// PEM file with the root CA; ignored when the file does not exist
    pub ca_cert: Option<PathBuf>,
    /// Per-request timeout
    pub timeout: Duration,
    /// Budget for retrying transport failures
    pub retry_budget: Duration,
}

impl Default for RestClientConfig {
    fn default() -> Self {
        Self {
            url: "http://opensearch-internal:9200".to_string(),
            credentials: Credentials::default(),
            ca_cert: None,
            timeout: Duration::from_secs(30),
            retry_budget: Duration::from_secs(10),
        }
    }
}

impl RestClientConfig {
    /// URL of an in-namespace cluster; HTTPS is chosen when the CA file exists
    pub fn for_service(name: &str, ca_cert: impl Into<PathBuf>) -> Self {
        let ca_cert = ca_cert.into();
        let protocol = if ca_cert.exists() { "https" } else { "http" };
        Self {
            url: format!("{}://{}-internal:9200", protocol, name),
            ca_cert: Some(ca_cert),
            ..Self::default()
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Build a reqwest client trusting the CA in `ca_cert` when present
pub fn build_http_client(ca_cert: Option<&Path>, timeout: Duration) -> Result<Client> {
    let mut builder = Client::builder().timeout(timeout);
    if let Some(path) = ca_cert.filter(|p| p.exists()) {
        let pem = std::fs::read(path)?;
        let certificate = Certificate::from_pem(&pem)?;
        builder = builder.add_root_certificate(certificate);
        debug!("Trusting root CA from {}", path.display());
    }
    Ok(builder.build()?)
}

// =============================================================================
// REST Client
// =============================================================================

/// REST client for one OpenSearch cluster
#[derive(Clone)]
pub struct RestClient {
    http: Client,
    base_url: String,
    credentials: Credentials,
    retry_budget: Duration,
}

impl RestClient {
    pub fn new(config: RestClientConfig) -> Result<Self> {
        let http = build_http_client(config.ca_cert.as_deref(), config.timeout)?;
        Ok(Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
            credentials: config.credentials,
            retry_budget: config.retry_budget,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl SearchClient for RestClient {
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<RestResponse> {
        let url = self.url(path);
        let policy = ExponentialBackoff {
            initial_interval: Duration::from_millis(200),
            max_interval: Duration::from_secs(2),
            max_elapsed_time: Some(self.retry_budget),
            ..ExponentialBackoff::default()
        };

        let (http, credentials, method, url, body) =
            (&self.http, &self.credentials, &method, &url, &body);

        let response = retry(policy, move || async move {
            let mut request = http.request(method.clone(), url);
            if credentials.is_complete() {
                request = request.basic_auth(&credentials.username, Some(&credentials.password));
            }
            if let Some(body) = body {
                request = request.json(body);
            }
            request.send().await.map_err(|e| {
                if is_transient(method, &e) {
                    warn!("{} {} failed, retrying: {}", method, url, e);
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
        })
        .await
        .map_err(Error::Http)?;

        let status = response.status().as_u16();
        let text = response.text().await?;
        debug!("{} {} -> {}", method, path, status);
        Ok(RestResponse::new(status, text))
    }
}

/// A timed-out write may already be applied by the cluster
fn is_transient(method: &Method, error: &reqwest::Error) -> bool {
    error.is_connect() || (error.is_timeout() && *method == Method::GET)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{basic_auth, body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer, credentials: Credentials) -> RestClient {
        RestClient::new(
            RestClientConfig::default()
                .with_url(server.uri())
                .with_credentials(credentials),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_send_with_basic_auth_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/_cluster/settings"))
            .and(basic_auth("admin", "secret"))
            .and(body_json(json!({"persistent": {}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"acknowledged": true})))
            .expect(1)
            .mount(&server)
            .await;

        let response = client(&server, Credentials::new("admin", "secret"))
            .send(Method::PUT, "_cluster/settings", Some(json!({"persistent": {}})))
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert!(response.body.contains("acknowledged"));
    }

    #[tokio::test]
    async fn test_error_statuses_are_returned() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/logs-*"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .expect(1)
            .mount(&server)
            .await;

        let response = client(&server, Credentials::default())
            .send(Method::DELETE, "logs-*", None)
            .await
            .unwrap();

        assert_eq!(response, RestResponse::new(403, "forbidden"));
    }

    #[tokio::test]
    async fn test_connection_failure_is_an_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);

        let mut config = RestClientConfig::default().with_url(format!("http://{}", address));
        config.retry_budget = Duration::from_millis(300);
        let result = RestClient::new(config)
            .unwrap()
            .send(Method::GET, "_cluster/health", None)
            .await;

        assert!(matches!(result, Err(Error::Http(_))));
    }

    fn slow_client(server: &MockServer) -> RestClient {
        let mut config = RestClientConfig::default()
            .with_url(server.uri())
            .with_timeout(Duration::from_millis(100));
        config.retry_budget = Duration::from_millis(800);
        RestClient::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_timed_out_write_is_not_resent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_plugins/_replication/_autofollow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let result = slow_client(&server)
            .send(Method::POST, "_plugins/_replication/_autofollow", Some(json!({})))
            .await;

        assert!(matches!(result, Err(Error::Http(e)) if e.is_timeout()));
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_timed_out_read_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_cluster/health"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let result = slow_client(&server)
            .send(Method::GET, "_cluster/health", None)
            .await;

        assert!(matches!(result, Err(Error::Http(_))));
        assert!(server.received_requests().await.unwrap().len() > 1);
    }

    #[test]
    fn test_service_url_without_ca_is_plain_http() {
        let config = RestClientConfig::for_service("opensearch", "/nonexistent/crt.pem");
        assert_eq!(config.url, "http://opensearch-internal:9200");
    }

    #[test]
    fn test_service_url_with_ca_is_https() {
        let ca = tempfile::NamedTempFile::new().unwrap();
        let config = RestClientConfig::for_service("opensearch", ca.path());
        assert_eq!(config.url, "https://opensearch-internal:9200");
        assert_eq!(config.ca_cert.as_deref(), Some(ca.path()));
    }

    #[test]
    fn test_unreadable_ca_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = build_http_client(Some(dir.path()), Duration::from_secs(1));
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
