// ABOUTME: Tool hub connecting Corral sandboxes to external tool servers
// ABOUTME: Stdio and HTTP JSON-RPC transports selected from configuration

pub mod error;
pub mod hub;
pub mod transport;

pub use error::{Result, ToolError};
pub use hub::{ToolHub, ToolServerStatus, QUALIFIED_SEPARATOR};
pub use transport::{HttpTransport, StdioTransport, ToolServerConfig, ToolTransport, TransportConfig};
