// ABOUTME: Tool server transport posting JSON-RPC messages to an HTTP endpoint
// ABOUTME: Each request is one POST; connection state only tracks the initialize handshake

use reqwest::Client;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};

use super::{initialize_params, RpcRequest, RpcResponse, DEFAULT_REQUEST_TIMEOUT};
use crate::error::{Result, ToolError};

pub struct HttpTransport {
    name: String,
    url: String,
    headers: BTreeMap<String, String>,
    client: Client,
    connected: AtomicBool,
    next_id: AtomicU64,
}

impl HttpTransport {
    pub fn new(
        name: &str,
        url: &str,
        headers: BTreeMap<String, String>,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            name: name.to_string(),
            url: url.to_string(),
            headers,
            client,
            connected: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        })
    }

    pub async fn connect(&self) -> Result<()> {
        if self.connected.load(Ordering::SeqCst) {
            return Err(ToolError::AlreadyConnected(self.name.clone()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.post(&RpcRequest::call(id, "initialize", Some(initialize_params())))
            .await?
            .ok_or_else(|| ToolError::Protocol("empty initialize response".to_string()))?
            .into_result()?;
        self.post(&RpcRequest::notification("notifications/initialized"))
            .await?;

        self.connected.store(true, Ordering::SeqCst);
        info!("Connected to tool server {} at {}", self.name, self.url);
        Ok(())
    }

    pub async fn disconnect(&self) -> Result<()> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Err(ToolError::NotConnected(self.name.clone()));
        }
        info!("Disconnected from tool server {}", self.name);
        Ok(())
    }

    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(ToolError::NotConnected(self.name.clone()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        debug!("-> {} {} #{}", self.name, method, id);

        self.post(&RpcRequest::call(id, method, params))
            .await?
            .ok_or_else(|| ToolError::Protocol(format!("empty response to {}", method)))?
            .into_result()
    }

    /// Send one message; notifications yield `None` without reading the body
    async fn post(&self, message: &RpcRequest<'_>) -> Result<Option<RpcResponse>> {
        let mut request = self.client.post(&self.url).json(message);
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ToolError::Transport(format!("{}: {}", self.name, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::Transport(format!(
                "{} answered HTTP {}",
                self.name, status
            )));
        }

        if message.is_notification() {
            return Ok(None);
        }

        let body = response
            .json::<RpcResponse>()
            .await
            .map_err(|e| ToolError::Protocol(format!("{}: {}", self.name, e)))?;
        Ok(Some(body))
    }
}
