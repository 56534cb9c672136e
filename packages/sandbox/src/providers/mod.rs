// ABOUTME: Provider trait for the container runtime behind sandbox pools
// ABOUTME: Defines the lifecycle, listing, exec and image operations the pool manager needs

use async_trait::async_trait;
use corral_core::{ErrorKind, InstanceStatus, PoolError};
use std::collections::HashMap;
use thiserror::Error;

pub mod docker;

pub use docker::DockerProvider;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Runtime daemon unreachable
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Container not found: {0}")]
    NotFound(String),

    #[error("Image not found: {0}")]
    ImageNotFound(String),

    #[error("Image error: {0}")]
    ImageError(String),

    #[error("Container error: {0}")]
    ContainerError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl ProviderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConnectionError(_) => ErrorKind::Unavailable,
            Self::NotFound(_) | Self::ImageNotFound(_) => ErrorKind::NotFound,
            Self::ImageError(_) | Self::ContainerError(_) | Self::InternalError(_) => {
                ErrorKind::Internal
            }
        }
    }
}

impl From<ProviderError> for PoolError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::ConnectionError(msg) => PoolError::Unavailable(msg),
            ProviderError::NotFound(id) => PoolError::NotFound(id),
            ProviderError::ImageNotFound(image) => PoolError::ImageNotFound(image),
            other => PoolError::Backend(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;

/// Container configuration for creating sandbox instances
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    pub image: String,
    pub name: String,
    pub env_vars: HashMap<String, String>,
    /// Port the instance serves its execution route on; published on loopback
    pub exec_port: u16,
    pub cpu_cores: Option<f32>,
    pub memory_mb: Option<u64>,
    pub command: Option<Vec<String>>,
    pub labels: HashMap<String, String>,
}

/// Container runtime information
#[derive(Debug, Clone)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub status: ContainerStatus,
    pub labels: HashMap<String, String>,
    pub ip_address: Option<String>,
    pub ports: HashMap<u16, u16>, // container_port -> host_port
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
    pub exit_code: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContainerStatus {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Stopped,
    Dead,
    Error(String),
}

impl ContainerStatus {
    /// Map runtime state onto the instance lifecycle; a non-zero exit surfaces as `Error`
    pub fn to_instance_status(&self, exit_code: Option<i64>) -> InstanceStatus {
        match self {
            Self::Created => InstanceStatus::Pending,
            Self::Restarting => InstanceStatus::Creating,
            Self::Running | Self::Paused => InstanceStatus::Running,
            Self::Removing => InstanceStatus::Stopping,
            Self::Stopped => match exit_code {
                Some(code) if code != 0 => InstanceStatus::Error,
                _ => InstanceStatus::Stopped,
            },
            Self::Dead | Self::Error(_) => InstanceStatus::Error,
        }
    }
}

/// Execution result from running a command in a container
#[derive(Debug, Clone)]
pub struct ExecResult {
    pub exit_code: i64,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Provider trait for container runtimes
#[async_trait]
pub trait Provider: Send + Sync {
    /// Check if the runtime is reachable
    async fn is_available(&self) -> Result<bool>;

    /// Create and start a new container, returning its id
    async fn create_container(&self, config: &ContainerConfig) -> Result<String>;

    async fn start_container(&self, container_id: &str) -> Result<()>;

    async fn stop_container(&self, container_id: &str, timeout_secs: u64) -> Result<()>;

    async fn restart_container(&self, container_id: &str, timeout_secs: u64) -> Result<()>;

    /// Remove a container; `force` kills it first if still running
    async fn remove_container(&self, container_id: &str, force: bool) -> Result<()>;

    async fn get_container_info(&self, container_id: &str) -> Result<ContainerInfo>;

    /// List managed containers carrying every given label
    async fn list_containers(
        &self,
        labels: &HashMap<String, String>,
        include_stopped: bool,
    ) -> Result<Vec<ContainerInfo>>;

    /// Execute a command in a running container
    async fn exec_command(&self, container_id: &str, command: Vec<String>) -> Result<ExecResult>;

    /// Pull an image if it doesn't exist locally
    async fn pull_image(&self, image: &str) -> Result<()>;

    async fn image_exists(&self, image: &str) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crashed_container_surfaces_as_error() {
        assert_eq!(
            ContainerStatus::Stopped.to_instance_status(Some(137)),
            InstanceStatus::Error
        );
        assert_eq!(
            ContainerStatus::Stopped.to_instance_status(Some(0)),
            InstanceStatus::Stopped
        );
        assert_eq!(
            ContainerStatus::Dead.to_instance_status(None),
            InstanceStatus::Error
        );
    }

    #[test]
    fn test_provider_errors_map_to_pool_errors() {
        assert_eq!(
            PoolError::from(ProviderError::ConnectionError("refused".into())),
            PoolError::Unavailable("refused".into())
        );
        assert_eq!(
            PoolError::from(ProviderError::ImageNotFound("corral/runtime".into())),
            PoolError::ImageNotFound("corral/runtime".into())
        );
        assert!(matches!(
            PoolError::from(ProviderError::ContainerError("boom".into())),
            PoolError::Backend(_)
        ));
    }
}
