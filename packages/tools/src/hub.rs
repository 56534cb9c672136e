// ABOUTME: Tool hub holding connected tool servers and their cached tool definitions
// ABOUTME: Routes tool calls by tool name and reports every failure inside the tool result

use async_trait::async_trait;
use corral_config::CorralSettings;
use corral_core::{ToolCall, ToolDefinition, ToolExecutor, ToolResult};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::{Result, ToolError};
use crate::transport::{ToolServerConfig, ToolTransport};

/// Separator for server-qualified tool names, e.g. `fs/read_file`
pub const QUALIFIED_SEPARATOR: char = '/';

struct ConnectedServer {
    transport: Arc<ToolTransport>,
    tools: BTreeMap<String, ToolDefinition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolServerStatus {
    pub name: String,
    pub transport: String,
    pub tool_count: usize,
}

#[derive(Default)]
pub struct ToolHub {
    servers: RwLock<BTreeMap<String, ConnectedServer>>,
}

impl ToolHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect every configured server; unreachable ones are logged and skipped
    pub async fn from_settings(settings: &CorralSettings) -> Result<Self> {
        let hub = Self::new();
        let entries = settings
            .load_tool_servers()
            .map_err(|e| ToolError::InvalidConfig(e.to_string()))?;

        for entry in entries {
            let config = match ToolServerConfig::from_value(&entry) {
                Ok(config) => config,
                Err(e) => {
                    warn!("Skipping tool server entry: {}", e);
                    continue;
                }
            };
            let name = config.name.clone();
            if let Err(e) = hub.connect_server(config).await {
                warn!("Tool server {} unavailable: {}", name, e);
            }
        }

        Ok(hub)
    }

    /// Connect a server and cache its tool definitions
    pub async fn connect_server(&self, config: ToolServerConfig) -> Result<Vec<ToolDefinition>> {
        if self.servers.read().await.contains_key(&config.name) {
            return Err(ToolError::AlreadyConnected(config.name));
        }

        let transport = Arc::new(ToolTransport::from_config(&config)?);
        transport.connect().await?;

        let definitions = match transport.fetch_definitions().await {
            Ok(definitions) => definitions,
            Err(e) => {
                let _ = transport.disconnect().await;
                return Err(e);
            }
        };

        let mut servers = self.servers.write().await;
        if servers.contains_key(&config.name) {
            drop(servers);
            let _ = transport.disconnect().await;
            return Err(ToolError::AlreadyConnected(config.name));
        }

        info!(
            "Connected tool server {} ({}) with {} tools",
            config.name,
            transport.kind(),
            definitions.len()
        );
        servers.insert(
            config.name,
            ConnectedServer {
                transport,
                tools: definitions
                    .iter()
                    .map(|d| (d.name.clone(), d.clone()))
                    .collect(),
            },
        );
        Ok(definitions)
    }

    pub async fn disconnect_server(&self, name: &str) -> Result<()> {
        let server = self
            .servers
            .write()
            .await
            .remove(name)
            .ok_or_else(|| ToolError::NotConnected(name.to_string()))?;

        if let Err(e) = server.transport.disconnect().await {
            warn!("Error disconnecting tool server {}: {}", name, e);
        }
        Ok(())
    }

    pub async fn list_servers(&self) -> Vec<ToolServerStatus> {
        self.servers
            .read()
            .await
            .iter()
            .map(|(name, server)| ToolServerStatus {
                name: name.clone(),
                transport: server.transport.kind().to_string(),
                tool_count: server.tools.len(),
            })
            .collect()
    }

    pub async fn list_tools(&self, server: &str) -> Result<Vec<ToolDefinition>> {
        self.servers
            .read()
            .await
            .get(server)
            .map(|s| s.tools.values().cloned().collect())
            .ok_or_else(|| ToolError::NotConnected(server.to_string()))
    }

    pub async fn get_tool_definition(&self, server: &str, tool: &str) -> Option<ToolDefinition> {
        self.servers
            .read()
            .await
            .get(server)
            .and_then(|s| s.tools.get(tool).cloned())
    }

    /// Re-fetch a server's definitions, replacing the cache
    pub async fn refresh_tools(&self, server: &str) -> Result<usize> {
        let transport = self
            .servers
            .read()
            .await
            .get(server)
            .map(|s| s.transport.clone())
            .ok_or_else(|| ToolError::NotConnected(server.to_string()))?;

        let definitions = transport.fetch_definitions().await?;
        let count = definitions.len();

        if let Some(entry) = self.servers.write().await.get_mut(server) {
            entry.tools = definitions.into_iter().map(|d| (d.name.clone(), d)).collect();
        }
        Ok(count)
    }

    /// Find the server owning a tool; qualified names pick the server explicitly,
    /// bare names go to the first server (by name) exposing the tool
    async fn resolve(&self, tool_name: &str) -> Result<(Arc<ToolTransport>, String)> {
        let servers = self.servers.read().await;

        if let Some((server, tool)) = tool_name.split_once(QUALIFIED_SEPARATOR) {
            if let Some(entry) = servers.get(server) {
                if entry.tools.contains_key(tool) {
                    return Ok((entry.transport.clone(), tool.to_string()));
                }
            }
        }

        servers
            .values()
            .find(|s| s.tools.contains_key(tool_name))
            .map(|s| (s.transport.clone(), tool_name.to_string()))
            .ok_or_else(|| ToolError::UnknownTool(tool_name.to_string()))
    }

    pub async fn call(&self, call: &ToolCall) -> Result<ToolResult> {
        let (transport, tool_name) = self.resolve(&call.tool_name).await?;

        let routed = ToolCall {
            tool_use_id: call.tool_use_id.clone(),
            tool_name,
            arguments: call.arguments.clone(),
        };
        transport.execute_tool(&routed).await
    }
}

#[async_trait]
impl ToolExecutor for ToolHub {
    async fn execute_tool(&self, call: &ToolCall) -> ToolResult {
        match self.call(call).await {
            Ok(result) => result,
            Err(e) => {
                warn!(
                    tool = %call.tool_name,
                    tool_use_id = %call.tool_use_id,
                    "Tool call failed: {}",
                    e
                );
                ToolResult::error(&call.tool_use_id, format!("Error executing tool: {}", e))
            }
        }
    }
}
