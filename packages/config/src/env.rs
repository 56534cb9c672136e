// ABOUTME: Environment variable name constants
// ABOUTME: Centralized definitions of all environment variable names used across Corral

// State Manager
pub const CORRAL_DEFINITION_ROOT: &str = "CORRAL_DEFINITION_ROOT";
pub const CORRAL_RUNTIME_STORE_URL: &str = "CORRAL_RUNTIME_STORE_URL";
pub const CORRAL_COMMIT_AUTHOR_NAME: &str = "CORRAL_COMMIT_AUTHOR_NAME";
pub const CORRAL_COMMIT_AUTHOR_EMAIL: &str = "CORRAL_COMMIT_AUTHOR_EMAIL";

// Request Router
pub const CORRAL_DISPATCH_TIMEOUT_SECS: &str = "CORRAL_DISPATCH_TIMEOUT_SECS";
pub const CORRAL_ALLOCATE_TIMEOUT_SECS: &str = "CORRAL_ALLOCATE_TIMEOUT_SECS";

// Sandbox Pool Manager
pub const CORRAL_SANDBOX_EXEC_PORT: &str = "CORRAL_SANDBOX_EXEC_PORT";
pub const CORRAL_SANDBOX_STOP_TIMEOUT_SECS: &str = "CORRAL_SANDBOX_STOP_TIMEOUT_SECS";
pub const CORRAL_LABEL_PREFIX: &str = "CORRAL_LABEL_PREFIX";
pub const CORRAL_IMAGE_PULL_TIMEOUT_SECS: &str = "CORRAL_IMAGE_PULL_TIMEOUT_SECS";

// Tool hub
pub const CORRAL_TOOL_SERVERS: &str = "CORRAL_TOOL_SERVERS";

// Logging
pub const RUST_LOG: &str = "RUST_LOG";

// System Environment Variables
pub const HOME: &str = "HOME";
pub const USERPROFILE: &str = "USERPROFILE"; // Windows
