// ABOUTME: Closed set of tool server transports behind one capability interface
// ABOUTME: Server configuration, JSON-RPC framing and the tools/list and tools/call mappings

use corral_core::{ToolCall, ToolDefinition, ToolResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{Result, ToolError};

pub mod http;
pub mod stdio;

pub use http::HttpTransport;
pub use stdio::StdioTransport;

pub(crate) const PROTOCOL_VERSION: &str = "2024-11-05";
pub(crate) const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// One entry of the tool server list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolServerConfig {
    pub name: String,
    #[serde(flatten)]
    pub transport: TransportConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
        #[serde(default, rename = "timeoutSecs")]
        timeout_secs: Option<u64>,
    },
    Http {
        url: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
        #[serde(default, rename = "timeoutSecs")]
        timeout_secs: Option<u64>,
    },
}

impl ToolServerConfig {
    /// Parse a raw server entry, rejecting transport types we do not speak
    pub fn from_value(value: &Value) -> Result<Self> {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidConfig("tool server entry needs a type".to_string()))?;

        if !matches!(kind, "stdio" | "http") {
            return Err(ToolError::UnknownTransport(kind.to_string()));
        }

        let config: Self = serde_json::from_value(value.clone())
            .map_err(|e| ToolError::InvalidConfig(e.to_string()))?;
        if config.name.is_empty() {
            return Err(ToolError::InvalidConfig(
                "tool server entry needs a name".to_string(),
            ));
        }
        Ok(config)
    }
}

/// A connection to one tool server
pub enum ToolTransport {
    Stdio(StdioTransport),
    Http(HttpTransport),
}

impl ToolTransport {
    pub fn from_config(config: &ToolServerConfig) -> Result<Self> {
        match &config.transport {
            TransportConfig::Stdio {
                command,
                args,
                env,
                timeout_secs,
            } => Ok(Self::Stdio(StdioTransport::new(
                &config.name,
                command,
                args.clone(),
                env.clone(),
                timeout_secs.map(Duration::from_secs),
            ))),
            TransportConfig::Http {
                url,
                headers,
                timeout_secs,
            } => Ok(Self::Http(HttpTransport::new(
                &config.name,
                url,
                headers.clone(),
                timeout_secs.map(Duration::from_secs),
            )?)),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Stdio(_) => "stdio",
            Self::Http(_) => "http",
        }
    }

    /// Open the connection and complete the initialize handshake
    pub async fn connect(&self) -> Result<()> {
        match self {
            Self::Stdio(t) => t.connect().await,
            Self::Http(t) => t.connect().await,
        }
    }

    pub async fn disconnect(&self) -> Result<()> {
        match self {
            Self::Stdio(t) => t.disconnect().await,
            Self::Http(t) => t.disconnect().await,
        }
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        match self {
            Self::Stdio(t) => t.request(method, params).await,
            Self::Http(t) => t.request(method, params).await,
        }
    }

    pub async fn fetch_definitions(&self) -> Result<Vec<ToolDefinition>> {
        let result = self.request("tools/list", Some(json!({}))).await?;
        parse_tool_list(result)
    }

    pub async fn execute_tool(&self, call: &ToolCall) -> Result<ToolResult> {
        let params = json!({
            "name": call.tool_name,
            "arguments": call.arguments,
        });
        let result = self.request("tools/call", Some(params)).await?;
        Ok(parse_call_result(call, result))
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct RpcRequest<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

impl<'a> RpcRequest<'a> {
    pub(crate) fn call(id: u64, method: &'a str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id: Some(id),
            method,
            params,
        }
    }

    pub(crate) fn notification(method: &'a str) -> Self {
        Self {
            jsonrpc: "2.0",
            id: None,
            method,
            params: None,
        }
    }

    pub(crate) fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct RpcResponse {
    #[serde(default)]
    pub(crate) id: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

impl RpcResponse {
    pub(crate) fn into_result(self) -> Result<Value> {
        if let Some(error) = self.error {
            return Err(ToolError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        self.result
            .ok_or_else(|| ToolError::Protocol("response has neither result nor error".to_string()))
    }
}

pub(crate) fn initialize_params() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": "corral",
            "version": env!("CARGO_PKG_VERSION"),
        },
    })
}

#[derive(Debug, Deserialize)]
struct ToolListResult {
    tools: Vec<ToolDefinition>,
}

fn parse_tool_list(result: Value) -> Result<Vec<ToolDefinition>> {
    let list: ToolListResult = serde_json::from_value(result)
        .map_err(|e| ToolError::Protocol(format!("malformed tools/list result: {}", e)))?;
    Ok(list.tools)
}

/// A single text block collapses to a string; anything richer is passed through
fn parse_call_result(call: &ToolCall, mut result: Value) -> ToolResult {
    let is_error = result
        .get("isError")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let content = result.get_mut("content").map(Value::take);
    let content = match content {
        Some(Value::Array(blocks)) if blocks.len() == 1 && blocks[0]["type"] == "text" => {
            blocks[0]["text"].clone()
        }
        Some(content) => content,
        None => result,
    };

    ToolResult {
        tool_use_id: call.tool_use_id.clone(),
        content,
        is_error,
    }
}
