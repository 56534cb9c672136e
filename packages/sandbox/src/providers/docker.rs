// ABOUTME: Docker provider for sandbox pools built on the bollard client
// ABOUTME: Labels every container with its owning app and pool so listings are the source of truth

use super::{ContainerConfig, ContainerInfo, ContainerStatus, ExecResult, Provider, ProviderError, Result};
use async_trait::async_trait;
use bollard::{
    container::{
        Config, CreateContainerOptions, ListContainersOptions, LogOutput, RemoveContainerOptions,
        RestartContainerOptions, StartContainerOptions, StopContainerOptions,
    },
    exec::{CreateExecOptions, StartExecResults},
    image::CreateImageOptions,
    Docker,
};
use corral_config::CorralSettings;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const DEFAULT_PULL_TIMEOUT: Duration = Duration::from_secs(600);

pub struct DockerProvider {
    client: Docker,
    label_prefix: String,
    /// Images pulled by this process, keyed by reference
    image_cache: Arc<RwLock<HashMap<String, chrono::DateTime<chrono::Utc>>>>,
    pull_timeout: Duration,
}

impl DockerProvider {
    /// Connect to the local daemon using the default socket
    pub fn new(label_prefix: impl Into<String>) -> Result<Self> {
        let client = Docker::connect_with_defaults()
            .map_err(|e| ProviderError::ConnectionError(e.to_string()))?;
        Ok(Self::with_client(client, label_prefix, DEFAULT_PULL_TIMEOUT))
    }

    pub fn from_settings(settings: &CorralSettings) -> Result<Self> {
        let client = Docker::connect_with_defaults()
            .map_err(|e| ProviderError::ConnectionError(e.to_string()))?;
        Ok(Self::with_client(
            client,
            settings.label_prefix.clone(),
            settings.image_pull_timeout,
        ))
    }

    pub fn with_client(client: Docker, label_prefix: impl Into<String>, pull_timeout: Duration) -> Self {
        Self {
            client,
            label_prefix: label_prefix.into(),
            image_cache: Arc::new(RwLock::new(HashMap::new())),
            pull_timeout,
        }
    }

    pub fn label_prefix(&self) -> &str {
        &self.label_prefix
    }

    fn to_bollard_config(&self, config: &ContainerConfig) -> Config<String> {
        let mut labels = config.labels.clone();
        labels.insert(format!("{}.managed", self.label_prefix), "true".to_string());

        let exec_port = format!("{}/tcp", config.exec_port);
        let exposed_ports = HashMap::from([(exec_port.clone(), HashMap::new())]);

        // Loopback only; the daemon picks the host port
        let port_bindings = HashMap::from([(
            exec_port,
            Some(vec![bollard::models::PortBinding {
                host_ip: Some("127.0.0.1".to_string()),
                host_port: None,
            }]),
        )]);

        let env: Vec<String> = config
            .env_vars
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let host_config = bollard::models::HostConfig {
            port_bindings: Some(port_bindings),
            nano_cpus: config
                .cpu_cores
                .map(|cores| (cores as f64 * 1_000_000_000.0) as i64),
            memory: config.memory_mb.map(|mb| (mb * 1024 * 1024) as i64),
            cap_drop: Some(vec!["ALL".to_string()]),
            security_opt: Some(vec!["no-new-privileges".to_string()]),
            ..Default::default()
        };

        Config {
            image: Some(config.image.clone()),
            cmd: config.command.clone(),
            env: Some(env),
            labels: Some(labels),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            ..Default::default()
        }
    }

    fn convert_status(state: &str) -> ContainerStatus {
        match state.to_lowercase().as_str() {
            "created" => ContainerStatus::Created,
            "running" => ContainerStatus::Running,
            "paused" => ContainerStatus::Paused,
            "restarting" => ContainerStatus::Restarting,
            "removing" => ContainerStatus::Removing,
            "exited" => ContainerStatus::Stopped,
            "dead" => ContainerStatus::Dead,
            _ => ContainerStatus::Error(format!("Unknown status: {}", state)),
        }
    }
}

/// 404 means the container is gone; other daemon replies are container errors;
/// anything that never reached the daemon is a connection problem
fn container_error(container_id: &str, err: bollard::errors::Error) -> ProviderError {
    match err {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        } => ProviderError::NotFound(container_id.to_string()),
        bollard::errors::Error::DockerResponseServerError { message, .. } => {
            ProviderError::ContainerError(message)
        }
        other => ProviderError::ConnectionError(other.to_string()),
    }
}

/// A missing image is user-actionable; keep it apart from generic pull failures
fn classify_pull_error(image: &str, message: &str) -> ProviderError {
    let lower = message.to_lowercase();
    let missing = ["not found", "manifest unknown", "does not exist", "pull access denied"]
        .iter()
        .any(|needle| lower.contains(needle));

    if missing {
        ProviderError::ImageNotFound(image.to_string())
    } else {
        ProviderError::ImageError(format!("Failed to pull image {}: {}", image, message))
    }
}

fn parse_timestamp(raw: Option<&String>) -> Option<chrono::DateTime<chrono::Utc>> {
    raw.and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&chrono::Utc))
        // Docker reports 0001-01-01 for events that never happened
        .filter(|dt| dt.timestamp() > 0)
}

#[async_trait]
impl Provider for DockerProvider {
    async fn is_available(&self) -> Result<bool> {
        match self.client.ping().await {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!("Docker not available: {}", e);
                Ok(false)
            }
        }
    }

    async fn create_container(&self, config: &ContainerConfig) -> Result<String> {
        info!("Creating container: {}", config.name);

        if !self.image_exists(&config.image).await? {
            self.pull_image(&config.image).await?;
        }

        let options = CreateContainerOptions {
            name: config.name.clone(),
            platform: None,
        };

        let container = self
            .client
            .create_container(Some(options), self.to_bollard_config(config))
            .await
            .map_err(|e| container_error(&config.name, e))?;

        debug!("Created container: {}", container.id);

        if let Err(e) = self.start_container(&container.id).await {
            warn!("Removing container {} after failed start: {}", container.id, e);
            if let Err(remove_err) = self.remove_container(&container.id, true).await {
                warn!("Failed to remove container {}: {}", container.id, remove_err);
            }
            return Err(e);
        }

        Ok(container.id)
    }

    async fn start_container(&self, container_id: &str) -> Result<()> {
        info!("Starting container: {}", container_id);

        self.client
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| container_error(container_id, e))
    }

    async fn stop_container(&self, container_id: &str, timeout_secs: u64) -> Result<()> {
        info!(
            "Stopping container: {} (timeout: {}s)",
            container_id, timeout_secs
        );

        let options = StopContainerOptions {
            t: timeout_secs as i64,
        };

        self.client
            .stop_container(container_id, Some(options))
            .await
            .map_err(|e| container_error(container_id, e))
    }

    async fn restart_container(&self, container_id: &str, timeout_secs: u64) -> Result<()> {
        info!("Restarting container: {}", container_id);

        let options = RestartContainerOptions {
            t: timeout_secs as isize,
        };

        self.client
            .restart_container(container_id, Some(options))
            .await
            .map_err(|e| container_error(container_id, e))
    }

    async fn remove_container(&self, container_id: &str, force: bool) -> Result<()> {
        info!("Removing container: {} (force: {})", container_id, force);

        let options = RemoveContainerOptions {
            force,
            v: true,
            ..Default::default()
        };

        self.client
            .remove_container(container_id, Some(options))
            .await
            .map_err(|e| container_error(container_id, e))
    }

    async fn get_container_info(&self, container_id: &str) -> Result<ContainerInfo> {
        let inspect = self
            .client
            .inspect_container(container_id, None)
            .await
            .map_err(|e| container_error(container_id, e))?;

        let state = inspect.state.as_ref().ok_or_else(|| {
            ProviderError::ContainerError("Container has no state information".to_string())
        })?;

        let status = Self::convert_status(
            state
                .status
                .as_ref()
                .map(|s| s.as_ref())
                .unwrap_or("unknown"),
        );

        let mut ports = HashMap::new();
        if let Some(port_map) = inspect
            .network_settings
            .as_ref()
            .and_then(|ns| ns.ports.as_ref())
        {
            for (container_port, bindings) in port_map {
                // Format: "8080/tcp"
                let host_port = bindings
                    .as_ref()
                    .and_then(|b| b.first())
                    .and_then(|b| b.host_port.as_ref())
                    .and_then(|p| p.parse::<u16>().ok());
                let container_port = container_port
                    .split('/')
                    .next()
                    .and_then(|p| p.parse::<u16>().ok());

                if let (Some(container_port), Some(host_port)) = (container_port, host_port) {
                    ports.insert(container_port, host_port);
                }
            }
        }

        let exit_code = match status {
            ContainerStatus::Stopped | ContainerStatus::Dead => state.exit_code,
            _ => None,
        };

        Ok(ContainerInfo {
            id: inspect.id.clone().unwrap_or_else(|| container_id.to_string()),
            name: inspect
                .name
                .clone()
                .unwrap_or_else(|| container_id.to_string())
                .trim_start_matches('/')
                .to_string(),
            status,
            labels: inspect
                .config
                .as_ref()
                .and_then(|c| c.labels.clone())
                .unwrap_or_default(),
            ip_address: inspect
                .network_settings
                .as_ref()
                .and_then(|ns| ns.ip_address.clone())
                .filter(|s| !s.is_empty()),
            ports,
            created_at: parse_timestamp(inspect.created.as_ref()).unwrap_or_else(chrono::Utc::now),
            started_at: parse_timestamp(state.started_at.as_ref()),
            finished_at: parse_timestamp(state.finished_at.as_ref()),
            exit_code,
        })
    }

    async fn list_containers(
        &self,
        labels: &HashMap<String, String>,
        include_stopped: bool,
    ) -> Result<Vec<ContainerInfo>> {
        let mut label_filters = vec![format!("{}.managed=true", self.label_prefix)];
        label_filters.extend(labels.iter().map(|(k, v)| format!("{}={}", k, v)));

        let options = ListContainersOptions {
            all: include_stopped,
            filters: HashMap::from([("label".to_string(), label_filters)]),
            ..Default::default()
        };

        let containers = self
            .client
            .list_containers(Some(options))
            .await
            .map_err(|e| match e {
                bollard::errors::Error::DockerResponseServerError { message, .. } => {
                    ProviderError::ContainerError(message)
                }
                other => ProviderError::ConnectionError(other.to_string()),
            })?;

        let mut container_infos = Vec::new();
        for id in containers.into_iter().filter_map(|c| c.id) {
            match self.get_container_info(&id).await {
                Ok(info) => container_infos.push(info),
                // Removed between list and inspect
                Err(ProviderError::NotFound(_)) => {}
                Err(e) => warn!("Failed to get info for container {}: {}", id, e),
            }
        }

        Ok(container_infos)
    }

    async fn exec_command(&self, container_id: &str, command: Vec<String>) -> Result<ExecResult> {
        info!(
            "Executing command in container {}: {:?}",
            container_id, command
        );

        let exec_config = CreateExecOptions {
            cmd: Some(command),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = self
            .client
            .create_exec(container_id, exec_config)
            .await
            .map_err(|e| container_error(container_id, e))?;

        let start_result = self
            .client
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| container_error(container_id, e))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        match start_result {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(msg) = output.next().await {
                    match msg {
                        Ok(LogOutput::StdOut { message }) => stdout.extend_from_slice(&message),
                        Ok(LogOutput::StdErr { message }) => stderr.extend_from_slice(&message),
                        Ok(LogOutput::Console { message }) => stdout.extend_from_slice(&message),
                        Ok(_) => {}
                        Err(e) => return Err(container_error(container_id, e)),
                    }
                }
            }
            StartExecResults::Detached => {
                return Err(ProviderError::ContainerError(
                    "Exec was detached unexpectedly".to_string(),
                ))
            }
        }

        let exec_inspect = self
            .client
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| container_error(container_id, e))?;

        Ok(ExecResult {
            exit_code: exec_inspect.exit_code.unwrap_or(0),
            stdout,
            stderr,
        })
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        if self.image_cache.read().await.contains_key(image) && self.image_exists(image).await? {
            debug!("Image {} found in cache, skipping pull", image);
            return Ok(());
        }

        info!("Pulling image: {} (timeout: {:?})", image, self.pull_timeout);

        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };

        let mut stream = self.client.create_image(Some(options), None, None);

        let result = tokio::time::timeout(self.pull_timeout, async {
            let mut last_status = String::new();
            while let Some(result) = stream.next().await {
                match result {
                    Ok(info) => {
                        if let Some(error) = info.error {
                            return Err(classify_pull_error(image, &error));
                        }
                        if let Some(status) = info.status {
                            if status != last_status {
                                debug!("Pull status: {}", status);
                                last_status = status;
                            }
                        }
                    }
                    Err(bollard::errors::Error::DockerResponseServerError {
                        status_code: 404,
                        ..
                    }) => return Err(ProviderError::ImageNotFound(image.to_string())),
                    Err(bollard::errors::Error::DockerResponseServerError { message, .. }) => {
                        return Err(classify_pull_error(image, &message))
                    }
                    Err(e) => return Err(ProviderError::ConnectionError(e.to_string())),
                }
            }
            Ok(())
        })
        .await;

        match result {
            Ok(Ok(())) => {
                info!("Successfully pulled image: {}", image);
                self.image_cache
                    .write()
                    .await
                    .insert(image.to_string(), chrono::Utc::now());
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ProviderError::ImageError(format!(
                "Timeout pulling image {} after {:?}",
                image, self.pull_timeout
            ))),
        }
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.client.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(bollard::errors::Error::DockerResponseServerError { message, .. }) => {
                Err(ProviderError::ImageError(message))
            }
            Err(e) => Err(ProviderError::ConnectionError(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> DockerProvider {
        // Builds a client without contacting the daemon
        let client = Docker::connect_with_local_defaults().unwrap();
        DockerProvider::with_client(client, "corral", DEFAULT_PULL_TIMEOUT)
    }

    #[tokio::test]
    async fn test_container_config_conversion() {
        let provider = provider();
        let config = ContainerConfig {
            image: "corral/runtime:latest".to_string(),
            name: "corral-demo-default-1".to_string(),
            env_vars: HashMap::from([("CORRAL_APP_ID".to_string(), "demo".to_string())]),
            exec_port: 8080,
            cpu_cores: Some(1.5),
            memory_mb: Some(512),
            command: None,
            labels: HashMap::from([("corral.app_id".to_string(), "demo".to_string())]),
        };

        let bollard_config = provider.to_bollard_config(&config);

        let labels = bollard_config.labels.unwrap();
        assert_eq!(labels.get("corral.managed").map(String::as_str), Some("true"));
        assert_eq!(labels.get("corral.app_id").map(String::as_str), Some("demo"));
        assert_eq!(bollard_config.env, Some(vec!["CORRAL_APP_ID=demo".to_string()]));

        let host_config = bollard_config.host_config.unwrap();
        assert_eq!(host_config.nano_cpus, Some(1_500_000_000));
        assert_eq!(host_config.memory, Some(512 * 1024 * 1024));

        let bindings = host_config.port_bindings.unwrap();
        let binding = bindings["8080/tcp"].as_ref().unwrap();
        assert_eq!(binding[0].host_ip.as_deref(), Some("127.0.0.1"));
    }

    #[test]
    fn test_status_conversion() {
        assert_eq!(DockerProvider::convert_status("running"), ContainerStatus::Running);
        assert_eq!(DockerProvider::convert_status("exited"), ContainerStatus::Stopped);
        assert_eq!(DockerProvider::convert_status("created"), ContainerStatus::Created);
        assert!(matches!(
            DockerProvider::convert_status("weird"),
            ContainerStatus::Error(_)
        ));
    }

    #[test]
    fn test_missing_image_is_distinct_from_pull_failure() {
        assert_eq!(
            classify_pull_error("ghost:latest", "manifest unknown: manifest unknown"),
            ProviderError::ImageNotFound("ghost:latest".to_string())
        );
        assert_eq!(
            classify_pull_error("private/img", "pull access denied for private/img"),
            ProviderError::ImageNotFound("private/img".to_string())
        );
        assert!(matches!(
            classify_pull_error("corral/runtime", "unexpected EOF"),
            ProviderError::ImageError(_)
        ));
    }

    #[test]
    fn test_zero_timestamps_are_ignored() {
        assert_eq!(parse_timestamp(Some(&"0001-01-01T00:00:00Z".to_string())), None);
        assert!(parse_timestamp(Some(&"2024-05-01T10:00:00.123456789Z".to_string())).is_some());
        assert_eq!(parse_timestamp(None), None);
    }
}
