// ABOUTME: Error taxonomy shared across Corral packages
// ABOUTME: ErrorKind classification plus pool, registry and sink error types

use std::fmt;
use thiserror::Error;

/// Coarse classification every crate-level error maps onto
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad input; no side effects happened
    Validation,
    NotFound,
    /// Stale base revision or lost compare-and-swap
    Conflict,
    /// Store or runtime backend unreachable, or capacity exhausted
    Unavailable,
    Transport,
    Protocol,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Unavailable => "unavailable",
            Self::Transport => "transport",
            Self::Protocol => "protocol",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by sandbox pool operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("Invalid request: {0}")]
    Invalid(String),

    /// No pool spec, or the pool's image cannot be found
    #[error("Resource unavailable for application {app_id}: {reason}")]
    ResourceUnavailable { app_id: String, reason: String },

    #[error("Image not found: {0}")]
    ImageNotFound(String),

    #[error("Pool {pool_name} for application {app_id} is at capacity ({max_instances} instances)")]
    CapacityExceeded {
        app_id: String,
        pool_name: String,
        max_instances: u32,
    },

    #[error("Sandbox {sandbox_id} does not belong to application {app_id}")]
    OwnershipMismatch { app_id: String, sandbox_id: String },

    #[error("Sandbox {0} is not leased")]
    NotLeased(String),

    #[error("Sandbox not found: {0}")]
    NotFound(String),

    #[error("Allocation timed out after {millis}ms")]
    Timeout { millis: u64 },

    #[error("Sandbox runtime unavailable: {0}")]
    Unavailable(String),

    #[error("Sandbox runtime error: {0}")]
    Backend(String),
}

impl PoolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Invalid(_) | Self::OwnershipMismatch { .. } => ErrorKind::Validation,
            Self::NotFound(_) | Self::ImageNotFound(_) => ErrorKind::NotFound,
            Self::NotLeased(_) => ErrorKind::Conflict,
            Self::ResourceUnavailable { .. }
            | Self::CapacityExceeded { .. }
            | Self::Timeout { .. }
            | Self::Unavailable(_) => ErrorKind::Unavailable,
            Self::Backend(_) => ErrorKind::Internal,
        }
    }
}

/// Errors raised by the Application Registry collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Invalid application data: {0}")]
    Invalid(String),

    #[error("Application not found: {0}")]
    ApplicationNotFound(String),

    #[error("Component {component_id} not found in application {app_id}")]
    ComponentNotFound {
        app_id: String,
        component_id: String,
    },

    #[error("Application already exists: {0}")]
    AlreadyExists(String),

    #[error("Registry backend error: {0}")]
    Backend(String),
}

impl RegistryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Invalid(_) => ErrorKind::Validation,
            Self::ApplicationNotFound(_) | Self::ComponentNotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyExists(_) => ErrorKind::Conflict,
            Self::Backend(_) => ErrorKind::Internal,
        }
    }
}

/// Failure of a fire-and-forget collaborator; recorded and swallowed by callers
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("Event bus has no subscribers")]
    NoSubscribers,

    #[error("Sink error: {0}")]
    Other(String),
}

impl SinkError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Unavailable
    }
}
