//! HTTP client for API communication.

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, COOKIE, SET_COOKIE};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use crate::config::{Config, Credentials};
use crate::error::CliError;

/// API client for the console backend.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    /// Create a new API client from config and credentials.
    pub fn new(config: &Config, credentials: Option<&Credentials>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(creds) = credentials {
            headers.insert(
                COOKIE,
                HeaderValue::from_str(&creds.cookie).context("Invalid session cookie format")?,
            );
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.poll.request_timeout())
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: config.api_url().trim_end_matches('/').to_string(),
        })
    }

    /// Build a URL for an endpoint.
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Make a GET request.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, CliError> {
        debug!(path, "GET");
        let response = self.client.get(self.url(path)).send().await?;

        self.handle_response(response).await
    }

    /// Make a POST request.
    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, CliError> {
        debug!(path, "POST");
        let response = self.client.post(self.url(path)).json(body).send().await?;

        self.handle_response(response).await
    }

    /// Make a POST request and ignore the response body.
    pub async fn post_unit<B: Serialize>(&self, path: &str, body: &B) -> Result<(), CliError> {
        debug!(path, "POST");
        let response = self.client.post(self.url(path)).json(body).send().await?;

        self.handle_empty(response).await
    }

    /// Make a PATCH request.
    pub async fn patch<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, CliError> {
        debug!(path, "PATCH");
        let response = self.client.patch(self.url(path)).json(body).send().await?;

        self.handle_response(response).await
    }

    /// Make a DELETE request.
    pub async fn delete(&self, path: &str) -> Result<(), CliError> {
        debug!(path, "DELETE");
        let response = self.client.delete(self.url(path)).send().await?;

        self.handle_empty(response).await
    }

    /// Log in with a form post and return the session cookie (`name=value`).
    pub async fn login(&self, email: &str, password: &str) -> Result<String, CliError> {
        let response = self
            .client
            .post(self.url("/login/"))
            .form(&[("username", email), ("password", password)])
            .send()
            .await?;

        if !response.status().is_success() {
            return self.handle_error(response).await;
        }

        session_cookie(response.headers()).ok_or_else(|| {
            CliError::Other(anyhow::anyhow!(
                "Login succeeded but the server did not set a session cookie"
            ))
        })
    }

    /// Handle a successful or error response.
    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, CliError> {
        let status = response.status();

        if status.is_success() {
            response
                .json()
                .await
                .map_err(|e| CliError::Other(anyhow::anyhow!("Failed to parse response: {}", e)))
        } else {
            self.handle_error(response).await
        }
    }

    /// Handle a response whose body does not matter.
    async fn handle_empty(&self, response: reqwest::Response) -> Result<(), CliError> {
        if response.status().is_success() {
            Ok(())
        } else {
            self.handle_error(response).await
        }
    }

    /// Handle an error response.
    async fn handle_error<T>(&self, response: reqwest::Response) -> Result<T, CliError> {
        let status = response.status().as_u16();

        if status == 401 {
            return Err(CliError::NotAuthenticated);
        }

        let body: serde_json::Value = response.json().await.unwrap_or(serde_json::Value::Null);
        Err(CliError::api(status, error_detail(&body)))
    }
}

/// Extract a readable message from an error body (`{"detail": ...}`).
fn error_detail(body: &serde_json::Value) -> String {
    match body.get("detail") {
        Some(serde_json::Value::String(detail)) => detail.clone(),
        // Validation errors: [{"loc": [...], "msg": "...", ...}]
        Some(serde_json::Value::Array(items)) => {
            let messages: Vec<&str> = items
                .iter()
                .filter_map(|item| item.get("msg").and_then(|m| m.as_str()))
                .collect();
            if messages.is_empty() {
                "Request rejected".to_string()
            } else {
                messages.join("; ")
            }
        }
        Some(other) => other.to_string(),
        None => "Unknown error".to_string(),
    }
}

/// The first `Set-Cookie` header, reduced to `name=value`.
fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| value.split(';').next())
        .map(str::trim)
        .find(|pair| pair.contains('=') && !pair.ends_with('='))
        .map(str::to_string)
}
