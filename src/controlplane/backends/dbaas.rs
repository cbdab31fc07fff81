//! DBaaS Users Recovery Client
//!
//! Password-restore endpoints: the request goes to the aggregator, the state
//! is read from the adapter. Both use basic auth.

use crate::crd::DbaasAdapterSpec;
use crate::domain::ports::{Credentials, UsersRecoveryApi};
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::json;
use tracing::{debug, info};

const RESTORE_PATH: &str = "api/v3/dbaas/internal/physical_databases/users/restore-password";
const RESTORE_STATE_PATH: &str = "api/v2/dbaas/adapter/opensearch/users/restore-password/state";

/// Secret keys of the adapter credentials
pub const ADAPTER_USERNAME_KEY: &str = "username";
pub const ADAPTER_PASSWORD_KEY: &str = "password";
/// Secret keys of the aggregator credentials
pub const AGGREGATOR_USERNAME_KEY: &str = "registration-auth-username";
pub const AGGREGATOR_PASSWORD_KEY: &str = "registration-auth-password";

/// reqwest-backed [`UsersRecoveryApi`]
pub struct DbaasUsersRecoveryClient {
    http: Client,
    adapter_address: String,
    aggregator_address: String,
    physical_database_id: String,
    adapter_credentials: Credentials,
    aggregator_credentials: Credentials,
}

impl DbaasUsersRecoveryClient {
    pub fn new(
        http: Client,
        adapter: &DbaasAdapterSpec,
        adapter_credentials: Credentials,
        aggregator_credentials: Credentials,
    ) -> Self {
        Self {
            http,
            adapter_address: adapter.adapter_address.trim_end_matches('/').to_string(),
            aggregator_address: adapter.aggregator_address.trim_end_matches('/').to_string(),
            physical_database_id: adapter.physical_database_identifier.clone(),
            adapter_credentials,
            aggregator_credentials,
        }
    }
}

fn authorized(request: RequestBuilder, credentials: &Credentials) -> RequestBuilder {
    if credentials.is_complete() {
        request.basic_auth(&credentials.username, Some(&credentials.password))
    } else {
        request
    }
}

#[async_trait]
impl UsersRecoveryApi for DbaasUsersRecoveryClient {
    async fn request_restore(&self) -> Result<()> {
        let url = format!("{}/{}", self.aggregator_address, RESTORE_PATH);
        let body = json!({
            "physicalDbId": self.physical_database_id,
            "type": "opensearch",
            "settings": {}
        });
        info!("Requesting users password restore for [{}]", self.physical_database_id);

        let response = authorized(self.http.post(&url).json(&body), &self.aggregator_credentials)
            .send()
            .await?;
        let status = response.status().as_u16();
        if status == 200 {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(Error::unexpected_status("restore users passwords", status, body))
    }

    async fn restore_state(&self) -> Result<String> {
        let url = format!("{}/{}", self.adapter_address, RESTORE_STATE_PATH);
        let response = authorized(self.http.get(&url), &self.adapter_credentials)
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        if status != 200 {
            return Err(Error::unexpected_status("read users restore state", status, body));
        }
        debug!("Users restore state: {}", body);
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use wiremock::matchers::{basic_auth, body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(aggregator: &MockServer, adapter: &MockServer) -> DbaasUsersRecoveryClient {
        let spec = DbaasAdapterSpec {
            name: "dbaas-opensearch-adapter".into(),
            adapter_address: adapter.uri(),
            aggregator_address: format!("{}/", aggregator.uri()),
            physical_database_identifier: "dr-opensearch".into(),
            secret_name: "dbaas-adapter-secret".into(),
        };
        DbaasUsersRecoveryClient::new(
            Client::new(),
            &spec,
            Credentials::new("adapter", "adapter-pass"),
            Credentials::new("aggregator", "aggregator-pass"),
        )
    }

    #[tokio::test]
    async fn test_restore_request_is_sent_to_aggregator() {
        let aggregator = MockServer::start().await;
        let adapter = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("/{}", RESTORE_PATH)))
            .and(basic_auth("aggregator", "aggregator-pass"))
            .and(body_json(json!({
                "physicalDbId": "dr-opensearch",
                "type": "opensearch",
                "settings": {}
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&aggregator)
            .await;

        client(&aggregator, &adapter).request_restore().await.unwrap();
    }

    #[tokio::test]
    async fn test_restore_request_only_accepts_200() {
        let aggregator = MockServer::start().await;
        let adapter = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&aggregator)
            .await;

        let result = client(&aggregator, &adapter).request_restore().await;
        assert_matches!(result, Err(Error::UnexpectedStatus { status: 202, .. }));
    }

    #[tokio::test]
    async fn test_state_is_read_from_adapter() {
        let aggregator = MockServer::start().await;
        let adapter = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/{}", RESTORE_STATE_PATH)))
            .and(basic_auth("adapter", "adapter-pass"))
            .respond_with(ResponseTemplate::new(200).set_body_string("running"))
            .mount(&adapter)
            .await;

        let state = client(&aggregator, &adapter).restore_state().await.unwrap();
        assert_eq!(state, "running");
    }
}
