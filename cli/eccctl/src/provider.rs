//! Status provider backed by the console API.

use async_trait::async_trait;
use ecc_reconcile::{PowerState, ProviderError, StatusProvider};
use serde::{Deserialize, Serialize};

use crate::client::ApiClient;

/// Instances the logged-in user may toggle, as `[id, state]` pairs.
const MY_INSTANCES_PATH: &str = "/my-instances";

#[derive(Debug, Serialize)]
struct InstanceRef<'a> {
    id: &'a str,
}

/// One entry of the my-instances listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnedInstance {
    pub id: String,
    pub state: String,
}

impl From<(String, String)> for OwnedInstance {
    fn from((id, state): (String, String)) -> Self {
        Self { id, state }
    }
}

/// Fetch the instances the current user may toggle.
pub async fn my_instances(client: &ApiClient) -> Result<Vec<OwnedInstance>, ProviderError> {
    let rows: Vec<(String, String)> = client
        .get(MY_INSTANCES_PATH)
        .await
        .map_err(|e| e.into_provider_error())?;
    Ok(rows.into_iter().map(OwnedInstance::from).collect())
}

/// Reads state from the my-instances listing and toggles through it.
pub struct ApiStatusProvider {
    client: ApiClient,
}

impl ApiStatusProvider {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StatusProvider for ApiStatusProvider {
    async fn get_state(&self, resource_id: &str) -> Result<PowerState, ProviderError> {
        my_instances(&self.client)
            .await?
            .into_iter()
            .find(|instance| instance.id == resource_id)
            .map(|instance| PowerState::from_remote(&instance.state))
            .ok_or_else(|| ProviderError::NotFound(resource_id.to_string()))
    }

    async fn request_transition(&self, resource_id: &str) -> Result<(), ProviderError> {
        self.client
            .post_unit(MY_INSTANCES_PATH, &InstanceRef { id: resource_id })
            .await
            .map_err(|e| e.into_provider_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use ecc_reconcile::{Outcome, PollPolicy, Poller};
    use std::time::Duration;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(server: &MockServer) -> ApiStatusProvider {
        let config = Config {
            api_url: format!("{}/api", server.uri()),
            ..Config::default()
        };
        ApiStatusProvider::new(ApiClient::new(&config, None).unwrap())
    }

    async fn mount_states(server: &MockServer, rows: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path("/api/my-instances"))
            .respond_with(ResponseTemplate::new(200).set_body_json(rows))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_get_state_picks_instance() {
        let server = MockServer::start().await;
        mount_states(
            &server,
            serde_json::json!([["i-aaa", "running"], ["i-bbb", "stopping"]]),
        )
        .await;

        let provider = provider_for(&server);
        assert_eq!(provider.get_state("i-aaa").await, Ok(PowerState::Running));
        assert_eq!(
            provider.get_state("i-bbb").await,
            Ok(PowerState::Transitioning)
        );
        assert_eq!(
            provider.get_state("i-ccc").await,
            Err(ProviderError::NotFound("i-ccc".to_string()))
        );
    }

    #[tokio::test]
    async fn test_request_transition_posts_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/my-instances"))
            .and(body_json(serde_json::json!({"id": "i-aaa"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::Value::Null))
            .expect(1)
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        assert!(provider.request_transition("i-aaa").await.is_ok());
    }

    #[tokio::test]
    async fn test_server_error_is_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/my-instances"))
            .respond_with(
                ResponseTemplate::new(500)
                    .set_body_json(serde_json::json!({"detail": "Internal Server Error"})),
            )
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        assert_eq!(
            provider.request_transition("i-aaa").await,
            Err(ProviderError::Rejected {
                status: 500,
                message: "Internal Server Error".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_poller_converges_over_http() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/my-instances"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::Value::Null))
            .mount(&server)
            .await;
        mount_states(&server, serde_json::json!([["i-aaa", "running"]])).await;

        let policy = PollPolicy::default().with_interval(Duration::from_millis(20));
        let poller = Poller::new(provider_for(&server), policy).unwrap();
        let handle = poller
            .request_transition("i-aaa", PowerState::Stopped)
            .await
            .unwrap();

        assert_eq!(handle.outcome().await, Outcome::Converged(PowerState::Running));
    }
}
