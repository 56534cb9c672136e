// ABOUTME: Request router driving one request through resolve, allocate, dispatch and release
// ABOUTME: Every exit path yields a response envelope and a leased sandbox is released exactly once

use corral_config::CorralSettings;
use corral_core::{
    generate_request_id, validate_app_id, validate_component_id, AppDefinition,
    ApplicationRegistry, ComponentDefinition, CorrelationIds, ErrorKind, Event, EventPublisher,
    ExecuteRequest, ExecuteResponse, FrameworkLogger, LogLevel, MetricsRecorder,
    ReleaseDisposition, RequestEnvelope, ResponseEnvelope, RouteErrorKind, RuntimeStateWriter,
    SandboxAllocator, SandboxLease, ToolCall, ToolExecutor, ToolResult, TracingFrameworkLogger,
};
use futures::FutureExt;
use serde_json::{json, Value};
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::dispatch::{DispatchError, SandboxDispatcher};

pub const DEFAULT_COMPONENT_NAME: &str = "RequestRouter";
pub const REQUESTS_METRIC: &str = "router_requests_total";
pub const DISPATCH_DURATION_METRIC: &str = "router_dispatch_duration_seconds";

const SANDBOX_LOG_COMPONENT: &str = "Sandbox";

#[derive(Debug, Clone)]
pub struct RouterOptions {
    pub dispatch_timeout: Duration,
    /// Component name attached to framework log lines
    pub component_name: String,
    pub requests_metric: String,
    pub dispatch_duration_metric: String,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            dispatch_timeout: Duration::from_secs(corral_config::settings::DEFAULT_DISPATCH_TIMEOUT_SECS),
            component_name: DEFAULT_COMPONENT_NAME.to_string(),
            requests_metric: REQUESTS_METRIC.to_string(),
            dispatch_duration_metric: DISPATCH_DURATION_METRIC.to_string(),
        }
    }
}

impl RouterOptions {
    pub fn from_settings(settings: &CorralSettings) -> Self {
        Self {
            dispatch_timeout: settings.dispatch_timeout,
            ..Self::default()
        }
    }
}

/// A step failure that ends the request
struct RouteFailure {
    kind: RouteErrorKind,
    message: String,
}

impl RouteFailure {
    fn new(kind: RouteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    fn into_envelope(self, request: &RequestEnvelope) -> ResponseEnvelope {
        ResponseEnvelope::failure(request, self.kind, self.message)
    }
}

struct Resolved {
    app: AppDefinition,
    component: ComponentDefinition,
}

/// Discards a lease from a background task if the routing future is dropped before release
struct PendingRelease {
    allocator: Arc<dyn SandboxAllocator>,
    lease: Option<SandboxLease>,
    request_id: String,
}

impl PendingRelease {
    fn new(allocator: Arc<dyn SandboxAllocator>, lease: &SandboxLease, request_id: &str) -> Self {
        Self {
            allocator,
            lease: Some(lease.clone()),
            request_id: request_id.to_string(),
        }
    }

    fn disarm(mut self) {
        self.lease = None;
    }
}

impl Drop for PendingRelease {
    fn drop(&mut self) {
        let Some(lease) = self.lease.take() else {
            return;
        };

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(
                request_id = %self.request_id,
                sandbox_id = %lease.sandbox_id,
                "Routing abandoned outside a runtime; sandbox lease left behind"
            );
            return;
        };

        warn!(
            request_id = %self.request_id,
            sandbox_id = %lease.sandbox_id,
            "Routing abandoned mid-flight; discarding sandbox"
        );
        let allocator = self.allocator.clone();
        runtime.spawn(async move {
            if let Err(e) = allocator
                .release(&lease.app_id, &lease.sandbox_id, ReleaseDisposition::Discard)
                .await
            {
                warn!(sandbox_id = %lease.sandbox_id, "Failed to release abandoned sandbox: {}", e);
            }
        });
    }
}

pub struct RequestRouter {
    registry: Arc<dyn ApplicationRegistry>,
    allocator: Arc<dyn SandboxAllocator>,
    dispatcher: Arc<dyn SandboxDispatcher>,
    logger: Arc<dyn FrameworkLogger>,
    tools: Option<Arc<dyn ToolExecutor>>,
    events: Option<Arc<dyn EventPublisher>>,
    metrics: Option<Arc<dyn MetricsRecorder>>,
    state: Option<Arc<dyn RuntimeStateWriter>>,
    options: RouterOptions,
}

impl RequestRouter {
    pub fn new(
        registry: Arc<dyn ApplicationRegistry>,
        allocator: Arc<dyn SandboxAllocator>,
        dispatcher: Arc<dyn SandboxDispatcher>,
    ) -> Self {
        Self {
            registry,
            allocator,
            dispatcher,
            logger: Arc::new(TracingFrameworkLogger),
            tools: None,
            events: None,
            metrics: None,
            state: None,
            options: RouterOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RouterOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn FrameworkLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_tool_executor(mut self, tools: Arc<dyn ToolExecutor>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_event_publisher(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_state_writer(mut self, state: Arc<dyn RuntimeStateWriter>) -> Self {
        self.state = Some(state);
        self
    }

    pub fn options(&self) -> &RouterOptions {
        &self.options
    }

    /// Route one request. Never fails: every outcome is reported in the envelope.
    pub async fn route(&self, mut request: RequestEnvelope) -> ResponseEnvelope {
        if request.request_id.is_empty() {
            request.request_id = generate_request_id();
        }

        let started = Instant::now();
        let response = match AssertUnwindSafe(self.process(&request)).catch_unwind().await {
            Ok(response) => response,
            Err(panic) => ResponseEnvelope::failure(
                &request,
                RouteErrorKind::InternalError,
                format!("Internal error while routing: {}", panic_message(panic.as_ref())),
            ),
        };

        self.record_outcome(&request, &response, started.elapsed());
        response
    }

    async fn process(&self, request: &RequestEnvelope) -> ResponseEnvelope {
        if let Err(failure) = validate(request) {
            return failure.into_envelope(request);
        }

        let resolved = match self.resolve(request).await {
            Ok(resolved) => resolved,
            Err(failure) => return failure.into_envelope(request),
        };

        let lease = match self
            .allocator
            .allocate(&request.app_id, resolved.component.target_pool_name.as_deref())
            .await
        {
            Ok(lease) => lease,
            Err(e) => {
                return RouteFailure::new(
                    RouteErrorKind::SandboxUnavailable,
                    format!("Could not allocate a sandbox: {}", e),
                )
                .into_envelope(request)
            }
        };

        debug!(
            request_id = %request.request_id,
            app_id = %request.app_id,
            sandbox_id = %lease.sandbox_id,
            "Allocated sandbox in pool {}",
            lease.pool_name
        );

        // From here on the lease is ours; nothing below may return before release
        let pending = PendingRelease::new(self.allocator.clone(), &lease, &request.request_id);
        let (response, disposition) =
            match AssertUnwindSafe(self.execute(request, &resolved, &lease))
                .catch_unwind()
                .await
            {
                Ok(outcome) => outcome,
                Err(panic) => (
                    ResponseEnvelope::failure(
                        request,
                        RouteErrorKind::InternalError,
                        format!(
                            "Internal error while executing in sandbox: {}",
                            panic_message(panic.as_ref())
                        ),
                    ),
                    ReleaseDisposition::Discard,
                ),
            };

        self.release(request, &lease, disposition).await;
        pending.disarm();
        response
    }

    async fn resolve(&self, request: &RequestEnvelope) -> Result<Resolved, RouteFailure> {
        let app = self
            .registry
            .get_application_details(&request.app_id)
            .await
            .map_err(|e| registry_failure(e.kind(), e.to_string()))?;

        let component = self
            .registry
            .get_component_definition(&request.app_id, &request.component_id)
            .await
            .map_err(|e| registry_failure(e.kind(), e.to_string()))?;

        Ok(Resolved { app, component })
    }

    /// Dispatch and interpret; the disposition tells release whether the instance is reusable
    async fn execute(
        &self,
        request: &RequestEnvelope,
        resolved: &Resolved,
        lease: &SandboxLease,
    ) -> (ResponseEnvelope, ReleaseDisposition) {
        let component_definition = match serde_json::to_value(&resolved.component) {
            Ok(value) => value,
            Err(e) => {
                return (
                    RouteFailure::new(
                        RouteErrorKind::InternalError,
                        format!("Could not encode component definition: {}", e),
                    )
                    .into_envelope(request),
                    ReleaseDisposition::Return,
                )
            }
        };

        let execute_request = ExecuteRequest {
            app_id: request.app_id.clone(),
            component_id: request.component_id.clone(),
            component_type: resolved.component.handler_type.clone(),
            component_definition,
            input_data: request.input_data.clone(),
            tool_access_config: resolved.app.tool_access_config(),
            state_access_config: resolved.app.state_access_config(),
            request_id: request.request_id.clone(),
            trace_id: request.trace_id.clone(),
        };

        let timeout = self.options.dispatch_timeout;
        debug!(
            request_id = %request.request_id,
            sandbox_id = %lease.sandbox_id,
            "Dispatching to {}",
            lease.endpoint
        );

        let started = Instant::now();
        let dispatched = tokio::time::timeout(
            timeout,
            self.dispatcher
                .dispatch(&lease.endpoint, &execute_request, timeout),
        )
        .await;
        self.observe_dispatch(request, started.elapsed());

        let reply = match dispatched {
            Err(_) => {
                return (
                    RouteFailure::new(
                        RouteErrorKind::DispatchTransportError,
                        format!(
                            "Sandbox {} did not answer within {:?}",
                            lease.sandbox_id, timeout
                        ),
                    )
                    .into_envelope(request),
                    ReleaseDisposition::Discard,
                )
            }
            Ok(Err(DispatchError::Transport(message))) => {
                return (
                    RouteFailure::new(RouteErrorKind::DispatchTransportError, message)
                        .into_envelope(request),
                    ReleaseDisposition::Discard,
                )
            }
            Ok(Err(DispatchError::Protocol(message))) => {
                return (
                    RouteFailure::new(RouteErrorKind::DispatchProtocolError, message)
                        .into_envelope(request),
                    ReleaseDisposition::Discard,
                )
            }
            Ok(Ok(reply)) => reply,
        };

        (
            self.interpret(request, lease, reply).await,
            ReleaseDisposition::Return,
        )
    }

    async fn interpret(
        &self,
        request: &RequestEnvelope,
        lease: &SandboxLease,
        reply: ExecuteResponse,
    ) -> ResponseEnvelope {
        let ids = correlation(request, Some(&lease.sandbox_id));
        self.forward_logs(&reply.logs, &ids);

        let failure = match reply.status.as_str() {
            "success" => None,
            "error" | "failure" => Some(RouteFailure::new(
                RouteErrorKind::ExecutionFailed,
                reply.error.clone().unwrap_or_else(|| {
                    format!("Component {} reported status {}", request.component_id, reply.status)
                }),
            )),
            other => Some(RouteFailure::new(
                RouteErrorKind::DispatchProtocolError,
                format!("Unknown execution status '{}'", other),
            )),
        };
        if let Some(failure) = failure {
            let mut envelope = failure.into_envelope(request);
            envelope.logs = reply.logs;
            return envelope;
        }

        self.apply_state_changes(&request.app_id, reply.state_changes, &ids)
            .await;
        let tool_results = self.execute_tools(&reply.tool_calls).await;
        self.publish_events(&reply.events, &ids).await;

        ResponseEnvelope {
            request_id: request.request_id.clone(),
            app_id: request.app_id.clone(),
            component_id: request.component_id.clone(),
            success: true,
            result: reply.output,
            message: None,
            error_kind: None,
            tool_calls: reply.tool_calls,
            tool_results,
            events: reply.events,
            logs: reply.logs,
        }
    }

    async fn release(
        &self,
        request: &RequestEnvelope,
        lease: &SandboxLease,
        disposition: ReleaseDisposition,
    ) {
        match self
            .allocator
            .release(&lease.app_id, &lease.sandbox_id, disposition)
            .await
        {
            Ok(()) => debug!(
                request_id = %request.request_id,
                sandbox_id = %lease.sandbox_id,
                "Released sandbox ({:?})",
                disposition
            ),
            Err(e) => warn!(
                request_id = %request.request_id,
                app_id = %lease.app_id,
                sandbox_id = %lease.sandbox_id,
                "Failed to release sandbox: {}",
                e
            ),
        }
    }

    /// Null values delete the key; anything else is written as-is
    async fn apply_state_changes(
        &self,
        app_id: &str,
        changes: BTreeMap<String, Value>,
        ids: &CorrelationIds,
    ) {
        if changes.is_empty() {
            return;
        }
        let Some(state) = &self.state else {
            warn!(
                request_id = ids.request_id.as_deref().unwrap_or("-"),
                "Dropping {} state changes: no runtime state writer configured",
                changes.len()
            );
            return;
        };

        for (key, value) in changes {
            let applied = if value.is_null() {
                state.delete_runtime_value(app_id, &key).await
            } else {
                state.set_runtime_value(app_id, &key, value).await
            };
            if let Err(e) = applied {
                warn!(
                    request_id = ids.request_id.as_deref().unwrap_or("-"),
                    app_id,
                    "Failed to apply state change for {}: {}",
                    key,
                    e
                );
            }
        }
    }

    async fn execute_tools(&self, calls: &[ToolCall]) -> Vec<ToolResult> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            let result = match &self.tools {
                Some(tools) => tools.execute_tool(call).await,
                None => ToolResult::error(&call.tool_use_id, "No tool executor configured"),
            };
            results.push(result);
        }
        results
    }

    async fn publish_events(&self, events: &[Event], ids: &CorrelationIds) {
        let Some(publisher) = &self.events else {
            return;
        };
        for event in events {
            if let Err(e) = publisher.publish(event.clone()).await {
                warn!(
                    request_id = ids.request_id.as_deref().unwrap_or("-"),
                    "Failed to publish event {}: {}",
                    event.event_type,
                    e
                );
            }
        }
    }

    fn forward_logs(&self, logs: &[String], ids: &CorrelationIds) {
        for line in logs {
            if let Err(e) = self.logger.log_framework_message(
                LogLevel::Info,
                line,
                SANDBOX_LOG_COMPONENT,
                ids,
                &Value::Null,
            ) {
                debug!("Framework logger rejected a sandbox log line: {}", e);
            }
        }
    }

    fn observe_dispatch(&self, request: &RequestEnvelope, elapsed: Duration) {
        let Some(metrics) = &self.metrics else {
            return;
        };
        if let Err(e) = metrics.observe_histogram(
            &self.options.dispatch_duration_metric,
            elapsed.as_secs_f64(),
            &[
                ("app_id", request.app_id.as_str()),
                ("component_id", request.component_id.as_str()),
            ],
        ) {
            debug!("Metrics recorder rejected an observation: {}", e);
        }
    }

    /// One metric and one framework log line per terminal state
    fn record_outcome(
        &self,
        request: &RequestEnvelope,
        response: &ResponseEnvelope,
        elapsed: Duration,
    ) {
        let outcome = response
            .error_kind
            .map(|kind| kind.as_str().to_string())
            .unwrap_or_else(|| "success".to_string());

        if let Some(metrics) = &self.metrics {
            if let Err(e) = metrics.increment_counter(
                &self.options.requests_metric,
                &[
                    ("app_id", request.app_id.as_str()),
                    ("component_id", request.component_id.as_str()),
                    ("outcome", outcome.as_str()),
                ],
            ) {
                debug!("Metrics recorder rejected a counter: {}", e);
            }
        }

        let (level, message) = match (response.error_kind, &response.message) {
            (None, _) => (LogLevel::Info, "Request completed".to_string()),
            (Some(kind), message) => (
                outcome_level(kind),
                format!(
                    "Request failed: {}",
                    message.as_deref().unwrap_or(kind.as_str())
                ),
            ),
        };
        let metadata = json!({
            "outcome": outcome,
            "durationMs": elapsed.as_millis() as u64,
        });
        if let Err(e) = self.logger.log_framework_message(
            level,
            &message,
            &self.options.component_name,
            &correlation(request, None),
            &metadata,
        ) {
            debug!("Framework logger rejected a message: {}", e);
        }

        if response.success {
            info!(
                request_id = %request.request_id,
                app_id = %request.app_id,
                component_id = %request.component_id,
                "Routed request in {:?}",
                elapsed
            );
        }
    }
}

fn validate(request: &RequestEnvelope) -> Result<(), RouteFailure> {
    if request.app_id.is_empty() || request.component_id.is_empty() {
        return Err(RouteFailure::new(
            RouteErrorKind::InvalidRequest,
            "Invalid request: appId and componentId are required",
        ));
    }
    validate_app_id(&request.app_id)
        .and_then(|_| validate_component_id(&request.component_id))
        .map_err(|e| RouteFailure::new(RouteErrorKind::InvalidRequest, format!("Invalid request: {}", e)))
}

fn registry_failure(kind: ErrorKind, message: String) -> RouteFailure {
    let kind = match kind {
        ErrorKind::NotFound => RouteErrorKind::ComponentNotFound,
        ErrorKind::Validation => RouteErrorKind::InvalidRequest,
        _ => RouteErrorKind::InternalError,
    };
    RouteFailure::new(kind, message)
}

fn outcome_level(kind: RouteErrorKind) -> LogLevel {
    match kind {
        RouteErrorKind::InvalidRequest
        | RouteErrorKind::ComponentNotFound
        | RouteErrorKind::ExecutionFailed => LogLevel::Warn,
        _ => LogLevel::Error,
    }
}

fn correlation(request: &RequestEnvelope, sandbox_id: Option<&str>) -> CorrelationIds {
    CorrelationIds {
        request_id: Some(request.request_id.clone()),
        app_id: Some(request.app_id.clone()).filter(|s| !s.is_empty()),
        component_id: Some(request.component_id.clone()).filter(|s| !s.is_empty()),
        trace_id: request.trace_id.clone(),
        sandbox_id: sandbox_id.map(str::to_string),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic".to_string()
    }
}
