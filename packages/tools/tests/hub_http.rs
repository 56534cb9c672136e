// ABOUTME: Tool hub tests against a mocked HTTP JSON-RPC tool server
// ABOUTME: Covers discovery, routing by bare and qualified names, and error reporting in results

use corral_core::{ToolCall, ToolExecutor};
use corral_tools::{ToolError, ToolHub, ToolServerConfig};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn tool_server() -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/rpc"))
        .and(body_partial_json(json!({"method": "initialize"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {
                "protocolVersion": "2024-11-05",
                "capabilities": {"tools": {}},
                "serverInfo": {"name": "search", "version": "1.0.0"}
            }
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rpc"))
        .and(body_partial_json(json!({"method": "notifications/initialized"})))
        .respond_with(ResponseTemplate::new(202))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rpc"))
        .and(body_partial_json(json!({"method": "tools/list"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 2,
            "result": {
                "tools": [
                    {"name": "greet", "description": "Greets someone", "inputSchema": {"type": "object"}},
                    {"name": "explode", "description": "Always fails"}
                ]
            }
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rpc"))
        .and(body_partial_json(json!({
            "method": "tools/call",
            "params": {"name": "greet", "arguments": {"name": "Ada"}}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 3,
            "result": {"content": [{"type": "text", "text": "Hello, Ada!"}]}
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rpc"))
        .and(body_partial_json(json!({
            "method": "tools/call",
            "params": {"name": "explode"}
        })))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    server
}

fn config(server: &MockServer) -> ToolServerConfig {
    ToolServerConfig::from_value(&json!({
        "name": "search",
        "type": "http",
        "url": format!("{}/rpc", server.uri()),
        "timeoutSecs": 5
    }))
    .unwrap()
}

fn call(tool_name: &str) -> ToolCall {
    ToolCall {
        tool_use_id: "tu-1".to_string(),
        tool_name: tool_name.to_string(),
        arguments: json!({"name": "Ada"}),
    }
}

#[tokio::test]
async fn test_connect_caches_definitions() {
    let server = tool_server().await;
    let hub = ToolHub::new();

    let tools = hub.connect_server(config(&server)).await.unwrap();
    assert_eq!(tools.len(), 2);

    let servers = hub.list_servers().await;
    assert_eq!(servers.len(), 1);
    assert_eq!(servers[0].transport, "http");
    assert_eq!(servers[0].tool_count, 2);

    let greet = hub.get_tool_definition("search", "greet").await.unwrap();
    assert_eq!(greet.description, "Greets someone");
    assert_eq!(hub.refresh_tools("search").await.unwrap(), 2);
}

#[tokio::test]
async fn test_execute_routes_bare_and_qualified_names() {
    let server = tool_server().await;
    let hub = ToolHub::new();
    hub.connect_server(config(&server)).await.unwrap();

    let result = hub.execute_tool(&call("greet")).await;
    assert!(!result.is_error);
    assert_eq!(result.content, json!("Hello, Ada!"));
    assert_eq!(result.tool_use_id, "tu-1");

    let qualified = hub.execute_tool(&call("search/greet")).await;
    assert_eq!(qualified.content, json!("Hello, Ada!"));
}

#[tokio::test]
async fn test_failures_are_reported_in_the_result() {
    let server = tool_server().await;
    let hub = ToolHub::new();
    hub.connect_server(config(&server)).await.unwrap();

    let unknown = hub.execute_tool(&call("teleport")).await;
    assert!(unknown.is_error);
    assert!(unknown.content.as_str().unwrap().contains("Unknown tool"));

    let failed = hub.execute_tool(&call("explode")).await;
    assert!(failed.is_error);
    assert!(failed.content.as_str().unwrap().contains("HTTP 500"));
}

#[tokio::test]
async fn test_connection_lifecycle() {
    let server = tool_server().await;
    let hub = ToolHub::new();
    hub.connect_server(config(&server)).await.unwrap();

    assert!(matches!(
        hub.connect_server(config(&server)).await,
        Err(ToolError::AlreadyConnected(_))
    ));

    hub.disconnect_server("search").await.unwrap();
    assert!(hub.list_servers().await.is_empty());
    assert!(hub.execute_tool(&call("greet")).await.is_error);
    assert!(matches!(
        hub.disconnect_server("search").await,
        Err(ToolError::NotConnected(_))
    ));
    assert!(matches!(
        hub.list_tools("search").await,
        Err(ToolError::NotConnected(_))
    ));
}

#[tokio::test]
async fn test_unreachable_server_is_a_transport_error() {
    let hub = ToolHub::new();
    let config = ToolServerConfig::from_value(&json!({
        "name": "offline",
        "type": "http",
        "url": "http://127.0.0.1:9/rpc",
        "timeoutSecs": 2
    }))
    .unwrap();

    let err = hub.connect_server(config).await.unwrap_err();
    assert_eq!(err.kind(), corral_core::ErrorKind::Transport);
    assert!(hub.list_servers().await.is_empty());
}
