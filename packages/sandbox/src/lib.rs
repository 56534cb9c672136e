// ABOUTME: Sandbox Pool Manager for Corral applications
// ABOUTME: Container provider abstraction, Docker provider, lease table and per-app pool manager

pub mod leases;
pub mod manager;
pub mod providers;

pub use leases::{LeaseRecord, LeaseTable};
pub use manager::{PoolManagerConfig, SandboxPoolManager};
pub use providers::{
    ContainerConfig, ContainerInfo, ContainerStatus, DockerProvider, ExecResult, Provider,
    ProviderError,
};
