// ABOUTME: Data model shared across Corral packages
// ABOUTME: Definitions, pool specs, sandbox instances, request/response envelopes and the sandbox wire protocol

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// DEFINITIONS
// ============================================================================

/// Application definition stored as `app_definition.yaml` in the app's repository
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppDefinition {
    pub app_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub config: BTreeMap<String, Value>,
    #[serde(default)]
    pub sandbox_pools: Vec<SandboxPoolSpec>,
    #[serde(default)]
    pub components: BTreeMap<String, ComponentDefinition>,
}

fn default_version() -> String {
    "0.1.0".to_string()
}

impl AppDefinition {
    /// Configuration block handed to the sandbox for tool access
    pub fn tool_access_config(&self) -> Value {
        self.config
            .get("tool_access_config")
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default()))
    }

    /// Configuration block handed to the sandbox for state access
    pub fn state_access_config(&self) -> Value {
        self.config
            .get("state_access_config")
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default()))
    }

    /// Find a pool spec by name, or the first declared pool when no name is given
    pub fn pool(&self, pool_name: Option<&str>) -> Option<&SandboxPoolSpec> {
        match pool_name {
            Some(name) => self.sandbox_pools.iter().find(|p| p.pool_name == name),
            None => self.sandbox_pools.first(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentDefinition {
    pub component_id: String,
    /// Handler kind the sandbox runtime dispatches on (e.g. "workflow", "prompt", "jit")
    pub handler_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_pool_name: Option<String>,
    #[serde(default)]
    pub task_details: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_matcher: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_cores: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SandboxPoolSpec {
    pub pool_name: String,
    pub image_reference: String,
    #[serde(default)]
    pub min_instances: u32,
    #[serde(default = "default_max_instances")]
    pub max_instances: u32,
    #[serde(default)]
    pub resource_limits: ResourceLimits,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Port the sandbox serves its execution route on; falls back to the configured default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
}

fn default_max_instances() -> u32 {
    1
}

// ============================================================================
// DEFINITION STORE
// ============================================================================

/// Immutable commit identifier of an app's definition tree
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(String);

impl Revision {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Revision {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    pub is_directory: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub revision: Revision,
    pub author: String,
    pub email: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// SANDBOX INSTANCES
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Pending,
    Creating,
    Running,
    Stopping,
    Stopped,
    Error,
    NotFound,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::Creating => "creating",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Error => "error",
            Self::NotFound => "not_found",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Error | Self::NotFound)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SandboxInstance {
    pub sandbox_id: String,
    pub app_id: String,
    pub pool_name: String,
    pub status: InstanceStatus,
    /// Held by an in-flight request in this process
    pub leased: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i64>,
    pub details: Option<String>,
}

/// Application status re-derived on demand from definition HEAD and live instances
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationStatus {
    pub app_id: String,
    pub name: String,
    pub version: String,
    pub revision: Option<Revision>,
    pub component_count: usize,
    pub instances: Vec<SandboxInstance>,
    pub running_instances: usize,
    pub leased_instances: usize,
}

/// Handle returned by allocation; the router dispatches to `endpoint`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxLease {
    pub sandbox_id: String,
    pub app_id: String,
    pub pool_name: String,
    pub endpoint: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseDisposition {
    /// Hand the instance back to its pool (or tear it down if the pool is full of idle instances)
    Return,
    /// Force-stop and remove, used for instances that timed out or misbehaved
    Discard,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkFailure {
    pub sandbox_id: String,
    pub error: String,
}

/// Outcome of a best-effort bulk lifecycle operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<BulkFailure>,
}

impl BulkReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn record(&mut self, sandbox_id: &str, result: Result<(), impl fmt::Display>) {
        match result {
            Ok(()) => self.succeeded.push(sandbox_id.to_string()),
            Err(e) => self.failed.push(BulkFailure {
                sandbox_id: sandbox_id.to_string(),
                error: e.to_string(),
            }),
        }
    }
}

// ============================================================================
// TOOLS, EVENTS, LOGS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub tool_use_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResult {
    pub tool_use_id: String,
    pub content: Value,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResult {
    pub fn error(tool_use_id: &str, message: impl Into<String>) -> Self {
        Self {
            tool_use_id: tool_use_id.to_string(),
            content: Value::String(message.into()),
            is_error: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub input_schema: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub event_type: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Identifiers attached to framework log lines for correlation
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CorrelationIds {
    pub request_id: Option<String>,
    pub app_id: Option<String>,
    pub component_id: Option<String>,
    pub trace_id: Option<String>,
    pub sandbox_id: Option<String>,
}

// ============================================================================
// REQUEST / RESPONSE ENVELOPES
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestEnvelope {
    /// Generated by the router when empty
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub app_id: String,
    #[serde(default)]
    pub component_id: String,
    #[serde(default)]
    pub input_data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

/// Error kinds surfaced at the router boundary
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RouteErrorKind {
    InvalidRequest,
    ComponentNotFound,
    SandboxUnavailable,
    DispatchTransportError,
    DispatchProtocolError,
    ExecutionFailed,
    InternalError,
}

impl RouteErrorKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::ComponentNotFound => "component_not_found",
            Self::SandboxUnavailable => "sandbox_unavailable",
            Self::DispatchTransportError => "dispatch_transport_error",
            Self::DispatchProtocolError => "dispatch_protocol_error",
            Self::ExecutionFailed => "execution_failed",
            Self::InternalError => "internal_error",
        }
    }
}

impl fmt::Display for RouteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseEnvelope {
    pub request_id: String,
    pub app_id: String,
    pub component_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<RouteErrorKind>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub tool_results: Vec<ToolResult>,
    #[serde(default)]
    pub events: Vec<Event>,
    #[serde(default)]
    pub logs: Vec<String>,
}

impl ResponseEnvelope {
    pub fn failure(
        request: &RequestEnvelope,
        kind: RouteErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            request_id: request.request_id.clone(),
            app_id: request.app_id.clone(),
            component_id: request.component_id.clone(),
            success: false,
            result: None,
            message: Some(message.into()),
            error_kind: Some(kind),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            events: Vec::new(),
            logs: Vec::new(),
        }
    }
}

// ============================================================================
// SANDBOX EXECUTION PROTOCOL
// ============================================================================

/// Body of `POST {endpoint}/execute`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecuteRequest {
    pub app_id: String,
    pub component_id: String,
    pub component_type: String,
    pub component_definition: Value,
    pub input_data: Value,
    pub tool_access_config: Value,
    pub state_access_config: Value,
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecuteResponse {
    pub status: String,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub logs: Vec<String>,
    #[serde(default)]
    pub metrics: BTreeMap<String, Value>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub state_changes: BTreeMap<String, Value>,
    #[serde(default)]
    pub events: Vec<Event>,
    #[serde(default)]
    pub error: Option<String>,
}
