// ABOUTME: End-to-end routing tests against a mocked sandbox execution endpoint
// ABOUTME: Exercises the HTTP dispatcher through the router, including timeouts and bad replies

use async_trait::async_trait;
use corral_core::{
    AppDefinition, ApplicationRegistry, ComponentDefinition, PoolError, RegistryError,
    ReleaseDisposition, RequestEnvelope, RouteErrorKind, SandboxAllocator, SandboxLease,
    SandboxPoolSpec,
};
use corral_router::{HttpDispatcher, RequestRouter, RouterOptions};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct DemoRegistry;

#[async_trait]
impl ApplicationRegistry for DemoRegistry {
    async fn get_application_details(&self, app_id: &str) -> Result<AppDefinition, RegistryError> {
        if app_id != "demo" {
            return Err(RegistryError::ApplicationNotFound(app_id.to_string()));
        }
        Ok(serde_json::from_value(json!({
            "appId": "demo",
            "name": "Demo",
            "sandboxPools": [{"poolName": "default", "imageReference": "demo/runtime:1"}]
        }))
        .unwrap())
    }

    async fn get_component_definition(
        &self,
        app_id: &str,
        component_id: &str,
    ) -> Result<ComponentDefinition, RegistryError> {
        if component_id != "greeter" {
            return Err(RegistryError::ComponentNotFound {
                app_id: app_id.to_string(),
                component_id: component_id.to_string(),
            });
        }
        Ok(ComponentDefinition {
            component_id: "greeter".to_string(),
            handler_type: "prompt".to_string(),
            target_pool_name: None,
            task_details: json!({"template": "Hello, {name}!"}),
            route_matcher: None,
        })
    }

    async fn get_sandbox_requirements(
        &self,
        _app_id: &str,
    ) -> Result<Vec<SandboxPoolSpec>, RegistryError> {
        Ok(Vec::new())
    }
}

/// Leases a single sandbox living at `endpoint`
struct SingleSandbox {
    endpoint: String,
    releases: Mutex<Vec<ReleaseDisposition>>,
}

impl SingleSandbox {
    fn at(endpoint: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            endpoint: endpoint.into(),
            releases: Mutex::new(Vec::new()),
        })
    }

    fn releases(&self) -> Vec<ReleaseDisposition> {
        self.releases.lock().unwrap().clone()
    }
}

#[async_trait]
impl SandboxAllocator for SingleSandbox {
    async fn allocate(
        &self,
        app_id: &str,
        _pool_name: Option<&str>,
    ) -> Result<SandboxLease, PoolError> {
        Ok(SandboxLease {
            sandbox_id: "sb-demo".to_string(),
            app_id: app_id.to_string(),
            pool_name: "default".to_string(),
            endpoint: self.endpoint.clone(),
        })
    }

    async fn release(
        &self,
        _app_id: &str,
        _sandbox_id: &str,
        disposition: ReleaseDisposition,
    ) -> Result<(), PoolError> {
        self.releases.lock().unwrap().push(disposition);
        Ok(())
    }
}

fn router_for(sandbox: Arc<SingleSandbox>, dispatch_timeout: Duration) -> RequestRouter {
    RequestRouter::new(
        Arc::new(DemoRegistry),
        sandbox,
        Arc::new(HttpDispatcher::new().unwrap()),
    )
    .with_options(RouterOptions {
        dispatch_timeout,
        ..RouterOptions::default()
    })
}

fn greet_ada() -> RequestEnvelope {
    RequestEnvelope {
        request_id: "req-ada".to_string(),
        app_id: "demo".to_string(),
        component_id: "greeter".to_string(),
        input_data: json!({"name": "Ada"}),
        trace_id: None,
    }
}

#[tokio::test]
async fn test_greeter_round_trip_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/execute"))
        .and(body_partial_json(json!({
            "app_id": "demo",
            "component_id": "greeter",
            "component_type": "prompt",
            "input_data": {"name": "Ada"},
            "request_id": "req-ada"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "output": "Hello, Ada!",
            "logs": ["greeted Ada"],
            "metrics": {"duration_ms": 3}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let sandbox = SingleSandbox::at(server.uri());
    let response = router_for(sandbox.clone(), Duration::from_secs(5))
        .route(greet_ada())
        .await;

    assert!(response.success, "unexpected failure: {:?}", response.message);
    assert_eq!(response.result, Some(json!("Hello, Ada!")));
    assert_eq!(response.logs, vec!["greeted Ada".to_string()]);
    assert_eq!(sandbox.releases(), vec![ReleaseDisposition::Return]);
}

#[tokio::test]
async fn test_slow_sandbox_times_out_and_is_discarded() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/execute"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"status": "success", "output": "Hello, Ada!"}))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let sandbox = SingleSandbox::at(server.uri());
    let response = router_for(sandbox.clone(), Duration::from_millis(200))
        .route(greet_ada())
        .await;

    assert!(!response.success);
    assert_eq!(response.error_kind, Some(RouteErrorKind::DispatchTransportError));
    assert_eq!(sandbox.releases(), vec![ReleaseDisposition::Discard]);
}

#[tokio::test]
async fn test_server_error_is_transport_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/execute"))
        .respond_with(ResponseTemplate::new(503).set_body_string("warming up"))
        .mount(&server)
        .await;

    let sandbox = SingleSandbox::at(server.uri());
    let response = router_for(sandbox.clone(), Duration::from_secs(5))
        .route(greet_ada())
        .await;

    assert_eq!(response.error_kind, Some(RouteErrorKind::DispatchTransportError));
    assert!(response.message.unwrap_or_default().contains("503"));
    assert_eq!(sandbox.releases().len(), 1);
}

#[tokio::test]
async fn test_undecodable_reply_is_protocol_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/execute"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
        .mount(&server)
        .await;

    let sandbox = SingleSandbox::at(server.uri());
    let response = router_for(sandbox.clone(), Duration::from_secs(5))
        .route(greet_ada())
        .await;

    assert_eq!(response.error_kind, Some(RouteErrorKind::DispatchProtocolError));
    assert_eq!(sandbox.releases(), vec![ReleaseDisposition::Discard]);
}

#[tokio::test]
async fn test_unreachable_sandbox_is_transport_error() {
    let sandbox = SingleSandbox::at("http://127.0.0.1:9");
    let response = router_for(sandbox.clone(), Duration::from_secs(5))
        .route(greet_ada())
        .await;

    assert_eq!(response.error_kind, Some(RouteErrorKind::DispatchTransportError));
    assert_eq!(sandbox.releases(), vec![ReleaseDisposition::Discard]);
}

#[tokio::test]
async fn test_unknown_component_never_leases() {
    let sandbox = SingleSandbox::at("http://127.0.0.1:9");
    let mut request = greet_ada();
    request.component_id = "farewell".to_string();

    let response = router_for(sandbox.clone(), Duration::from_secs(5))
        .route(request)
        .await;

    assert_eq!(response.error_kind, Some(RouteErrorKind::ComponentNotFound));
    assert!(sandbox.releases().is_empty());
}
