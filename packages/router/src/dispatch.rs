// ABOUTME: Sandbox dispatcher sending execution requests to a leased instance's endpoint
// ABOUTME: HTTP implementation posts JSON to {endpoint}/execute and classifies failures

use async_trait::async_trait;
use corral_core::{ErrorKind, ExecuteRequest, ExecuteResponse};
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The sandbox could not be reached or did not answer in time
    #[error("Dispatch transport error: {0}")]
    Transport(String),

    /// The sandbox answered with something that is not an execution response
    #[error("Dispatch protocol error: {0}")]
    Protocol(String),
}

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(_) => ErrorKind::Transport,
            Self::Protocol(_) => ErrorKind::Protocol,
        }
    }
}

#[async_trait]
pub trait SandboxDispatcher: Send + Sync {
    async fn dispatch(
        &self,
        endpoint: &str,
        request: &ExecuteRequest,
        timeout: Duration,
    ) -> Result<ExecuteResponse, DispatchError>;
}

pub const EXECUTE_ROUTE: &str = "execute";

pub struct HttpDispatcher {
    client: Client,
}

impl HttpDispatcher {
    pub fn new() -> Result<Self, DispatchError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| DispatchError::Transport(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn execute_url(endpoint: &str) -> String {
        format!("{}/{}", endpoint.trim_end_matches('/'), EXECUTE_ROUTE)
    }
}

#[async_trait]
impl SandboxDispatcher for HttpDispatcher {
    async fn dispatch(
        &self,
        endpoint: &str,
        request: &ExecuteRequest,
        timeout: Duration,
    ) -> Result<ExecuteResponse, DispatchError> {
        let url = Self::execute_url(endpoint);
        debug!(request_id = %request.request_id, "POST {}", url);

        let response = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DispatchError::Transport(format!("{} timed out after {:?}", url, timeout))
                } else if e.is_connect() {
                    DispatchError::Transport(format!("could not connect to {}: {}", url, e))
                } else {
                    DispatchError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DispatchError::Transport(format!(
                "sandbox answered HTTP {}: {}",
                status, body
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| DispatchError::Transport(format!("failed to read response body: {}", e)))?;

        serde_json::from_slice::<ExecuteResponse>(&body)
            .map_err(|e| DispatchError::Protocol(format!("malformed execution response: {}", e)))
    }
}
