// ABOUTME: Core types, collaborator traits, and error taxonomy for Corral
// ABOUTME: Foundational package shared by the state, sandbox, tools and router packages

pub mod error;
pub mod sinks;
pub mod telemetry;
pub mod traits;
pub mod types;
pub mod utils;
pub mod validation;

// Re-export main types
pub use types::{
    AppDefinition, ApplicationStatus, BulkFailure, BulkReport, CommitInfo, ComponentDefinition, CorrelationIds,
    Event, ExecOutput, ExecuteRequest, ExecuteResponse, FileEntry, InstanceStatus, LogLevel,
    ReleaseDisposition, RequestEnvelope, ResourceLimits, ResponseEnvelope, Revision,
    RouteErrorKind, SandboxInstance, SandboxLease, SandboxPoolSpec, ToolCall, ToolDefinition,
    ToolResult,
};

// Re-export errors
pub use error::{ErrorKind, PoolError, RegistryError, SinkError};

// Re-export collaborator traits
pub use traits::{
    ApplicationRegistry, EventPublisher, FrameworkLogger, MetricsRecorder, RuntimeStateWriter,
    SandboxAllocator, SandboxInspector, ToolExecutor,
};

// Re-export default sinks
pub use sinks::{
    BroadcastEventBus, HistogramSummary, InMemoryMetrics, TracingFrameworkLogger, HISTOGRAM_BUCKETS,
};

// Re-export utilities
pub use utils::{generate_request_id, namespaced_key};

// Re-export validation
pub use validation::{
    normalize_repo_path, validate_app_id, validate_component_id, ValidationError, MAX_ID_LENGTH,
};
