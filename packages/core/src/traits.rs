// ABOUTME: Collaborator interfaces injected into the pool manager and router
// ABOUTME: Registry, allocator, tool executor, event/log/metric sinks and runtime state writer

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{PoolError, RegistryError, SinkError};
use crate::types::{
    AppDefinition, ComponentDefinition, CorrelationIds, Event, LogLevel, ReleaseDisposition,
    SandboxInstance, SandboxLease, SandboxPoolSpec, ToolCall, ToolResult,
};

/// Read side of the Application Registry
#[async_trait]
pub trait ApplicationRegistry: Send + Sync {
    async fn get_application_details(&self, app_id: &str) -> Result<AppDefinition, RegistryError>;

    async fn get_component_definition(
        &self,
        app_id: &str,
        component_id: &str,
    ) -> Result<ComponentDefinition, RegistryError>;

    async fn get_sandbox_requirements(
        &self,
        app_id: &str,
    ) -> Result<Vec<SandboxPoolSpec>, RegistryError>;
}

/// The slice of the pool manager the router depends on
#[async_trait]
pub trait SandboxAllocator: Send + Sync {
    /// Lease an instance; `pool_name` selects a pool, `None` means the app's first pool
    async fn allocate(
        &self,
        app_id: &str,
        pool_name: Option<&str>,
    ) -> Result<SandboxLease, PoolError>;

    async fn release(
        &self,
        app_id: &str,
        sandbox_id: &str,
        disposition: ReleaseDisposition,
    ) -> Result<(), PoolError>;
}

/// Read-only view of the instances a pool manager currently runs for an app
#[async_trait]
pub trait SandboxInspector: Send + Sync {
    async fn status(&self, app_id: &str) -> Result<Vec<SandboxInstance>, PoolError>;
}

/// Executes a tool call; failures are reported inside the result, never raised
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute_tool(&self, call: &ToolCall) -> ToolResult;
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: Event) -> Result<(), SinkError>;
}

pub trait FrameworkLogger: Send + Sync {
    fn log_framework_message(
        &self,
        level: LogLevel,
        message: &str,
        component: &str,
        ids: &CorrelationIds,
        metadata: &Value,
    ) -> Result<(), SinkError>;
}

pub trait MetricsRecorder: Send + Sync {
    fn increment_counter(&self, name: &str, labels: &[(&str, &str)]) -> Result<(), SinkError>;

    fn observe_histogram(
        &self,
        name: &str,
        value: f64,
        labels: &[(&str, &str)],
    ) -> Result<(), SinkError>;
}

/// Applies sandbox-reported runtime state changes to an app's runtime namespace
#[async_trait]
pub trait RuntimeStateWriter: Send + Sync {
    async fn set_runtime_value(&self, app_id: &str, key: &str, value: Value)
        -> Result<(), SinkError>;

    async fn delete_runtime_value(&self, app_id: &str, key: &str) -> Result<(), SinkError>;
}
