// ABOUTME: HTTP provider for remote sandbox platforms exposing a JSON REST API
// ABOUTME: Authenticates with a bearer platform token and maps HTTP failures to ProviderError

use super::{
    CommandSpec, ExecResult, Provider, ProviderError, ProvisionRequest, RemoteSandbox, Result,
};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, error, info};

/// Remote sandbox platform reached over HTTPS
pub struct HttpProvider {
    client: Client,
    api_url: String,
    token: String,
}

impl HttpProvider {
    /// Create a new provider for the given API base URL and platform token
    pub fn new(api_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(ProviderError::ConfigError(
                "Platform token is required".to_string(),
            ));
        }

        // No request timeout: agent commands may legitimately run for a long time
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ProviderError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/sandboxes{}", self.api_url, path)
    }

    fn map_send_error(e: reqwest::Error) -> ProviderError {
        if e.is_connect() {
            ProviderError::ConnectionError(format!("Failed to connect to sandbox platform: {}", e))
        } else {
            ProviderError::ConnectionError(e.to_string())
        }
    }

    /// Turn non-success statuses into errors, passing 404s through as NotFound
    async fn check(response: Response, sandbox_id: Option<&str>) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());

        if status == StatusCode::NOT_FOUND {
            return Err(ProviderError::NotFound(
                sandbox_id.map(str::to_string).unwrap_or(body),
            ));
        }

        error!("Sandbox platform error: {} - {}", status, body);
        Err(ProviderError::ApiError {
            status: status.as_u16(),
            message: body,
        })
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
        response
            .json::<T>()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl Provider for HttpProvider {
    async fn create(&self, request: &ProvisionRequest) -> Result<RemoteSandbox> {
        info!(
            repo = %request.source.url,
            branch = %request.source.branch,
            "Provisioning remote sandbox"
        );

        let response = self
            .client
            .post(self.url(""))
            .bearer_auth(&self.token)
            .json(request)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        let sandbox: RemoteSandbox = Self::decode(Self::check(response, None).await?).await?;
        info!(sandbox_id = %sandbox.id, "Remote sandbox provisioned");
        Ok(sandbox)
    }

    async fn get(&self, sandbox_id: &str) -> Result<RemoteSandbox> {
        let response = self
            .client
            .get(self.url(&format!("/{}", sandbox_id)))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        Self::decode(Self::check(response, Some(sandbox_id)).await?).await
    }

    async fn run_command(&self, sandbox_id: &str, command: &CommandSpec) -> Result<ExecResult> {
        debug!(
            sandbox_id = %sandbox_id,
            cmd = %command.cmd,
            detached = command.detached,
            "Running sandbox command"
        );

        let response = self
            .client
            .post(self.url(&format!("/{}/commands", sandbox_id)))
            .bearer_auth(&self.token)
            .json(command)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        Self::decode(Self::check(response, Some(sandbox_id)).await?).await
    }

    async fn stop(&self, sandbox_id: &str) -> Result<()> {
        let response = self
            .client
            .post(self.url(&format!("/{}/stop", sandbox_id)))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        Self::check(response, Some(sandbox_id)).await?;
        Ok(())
    }
}
