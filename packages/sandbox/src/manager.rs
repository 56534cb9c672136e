// ABOUTME: Sandbox Pool Manager allocating, releasing and operating per-app container pools
// ABOUTME: Instance membership is always re-derived from the runtime's label-filtered listing

use async_trait::async_trait;
use corral_config::CorralSettings;
use corral_core::{
    validate_app_id, ApplicationRegistry, BulkReport, ExecOutput, InstanceStatus, PoolError,
    RegistryError, ReleaseDisposition, SandboxAllocator, SandboxInspector, SandboxInstance,
    SandboxLease, SandboxPoolSpec,
};
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::leases::LeaseTable;
use crate::providers::{ContainerConfig, ContainerInfo, ContainerStatus, Provider, ProviderError};

#[derive(Debug, Clone, PartialEq)]
pub struct PoolManagerConfig {
    pub label_prefix: String,
    /// Port instances serve their execution route on, unless the pool overrides it
    pub exec_port: u16,
    pub stop_timeout_secs: u64,
    pub allocate_timeout: Duration,
}

impl Default for PoolManagerConfig {
    fn default() -> Self {
        Self {
            label_prefix: "corral".to_string(),
            exec_port: 8080,
            stop_timeout_secs: 10,
            allocate_timeout: Duration::from_secs(60),
        }
    }
}

impl PoolManagerConfig {
    pub fn from_settings(settings: &CorralSettings) -> Self {
        Self {
            label_prefix: settings.label_prefix.clone(),
            exec_port: settings.sandbox_exec_port,
            stop_timeout_secs: settings.sandbox_stop_timeout.as_secs(),
            allocate_timeout: settings.allocate_timeout,
        }
    }
}

/// Per-pool reservation state; `decision` is held only while choosing what to do
#[derive(Default)]
struct PoolSlot {
    decision: tokio::sync::Mutex<()>,
    pending: AtomicU32,
    /// Names of containers whose creator has not yet taken their lease
    creating: std::sync::Mutex<HashSet<String>>,
}

impl PoolSlot {
    fn is_creating(&self, name: &str) -> bool {
        self.creating
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(name)
    }
}

/// Counts an in-flight creation against pool capacity until dropped
struct PendingCreation {
    slot: Arc<PoolSlot>,
    name: String,
}

impl PendingCreation {
    fn reserve(slot: Arc<PoolSlot>, name: String) -> Self {
        slot.pending.fetch_add(1, Ordering::SeqCst);
        slot.creating
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.clone());
        Self { slot, name }
    }
}

impl Drop for PendingCreation {
    fn drop(&mut self) {
        self.slot
            .creating
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.name);
        self.slot.pending.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A lease taken during allocation; released on drop unless committed
struct LeaseGuard<'a> {
    leases: &'a LeaseTable,
    sandbox_id: String,
    committed: bool,
}

impl<'a> LeaseGuard<'a> {
    fn acquire(leases: &'a LeaseTable, sandbox_id: &str, app_id: &str, pool_name: &str) -> Option<Self> {
        leases
            .try_acquire(sandbox_id, app_id, pool_name)
            .then(|| Self {
                leases,
                sandbox_id: sandbox_id.to_string(),
                committed: false,
            })
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for LeaseGuard<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.leases.release(&self.sandbox_id);
        }
    }
}

enum Placement<'a> {
    Reuse(ContainerInfo, LeaseGuard<'a>),
    Restart(ContainerInfo, LeaseGuard<'a>),
    Create(ContainerConfig, PendingCreation),
}

pub struct SandboxPoolManager {
    provider: Arc<dyn Provider>,
    registry: Arc<dyn ApplicationRegistry>,
    config: PoolManagerConfig,
    leases: LeaseTable,
    slots: std::sync::Mutex<HashMap<(String, String), Arc<PoolSlot>>>,
}

impl SandboxPoolManager {
    pub fn new(
        provider: Arc<dyn Provider>,
        registry: Arc<dyn ApplicationRegistry>,
        config: PoolManagerConfig,
    ) -> Self {
        Self {
            provider,
            registry,
            config,
            leases: LeaseTable::new(),
            slots: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn app_label(&self) -> String {
        format!("{}.app_id", self.config.label_prefix)
    }

    fn pool_label(&self) -> String {
        format!("{}.pool", self.config.label_prefix)
    }

    fn slot(&self, app_id: &str, pool_name: &str) -> Arc<PoolSlot> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots
            .entry((app_id.to_string(), pool_name.to_string()))
            .or_default()
            .clone()
    }

    async fn pool_specs(&self, app_id: &str) -> Result<Vec<SandboxPoolSpec>, PoolError> {
        self.registry
            .get_sandbox_requirements(app_id)
            .await
            .map_err(|e| match e {
                RegistryError::Backend(msg) => PoolError::Unavailable(msg),
                other => PoolError::ResourceUnavailable {
                    app_id: app_id.to_string(),
                    reason: other.to_string(),
                },
            })
    }

    async fn pool_spec(
        &self,
        app_id: &str,
        pool_name: Option<&str>,
    ) -> Result<SandboxPoolSpec, PoolError> {
        let specs = self.pool_specs(app_id).await?;
        let spec = match pool_name {
            Some(name) => specs.into_iter().find(|p| p.pool_name == name),
            None => specs.into_iter().next(),
        };

        spec.ok_or_else(|| PoolError::ResourceUnavailable {
            app_id: app_id.to_string(),
            reason: match pool_name {
                Some(name) => format!("no sandbox pool named {}", name),
                None => "no sandbox pool spec".to_string(),
            },
        })
    }

    async fn list(
        &self,
        app_id: &str,
        pool_name: Option<&str>,
    ) -> Result<Vec<ContainerInfo>, PoolError> {
        let mut labels = HashMap::from([(self.app_label(), app_id.to_string())]);
        if let Some(pool) = pool_name {
            labels.insert(self.pool_label(), pool.to_string());
        }
        Ok(self.provider.list_containers(&labels, true).await?)
    }

    /// Inspect an instance and confirm its recorded owner is `app_id`
    async fn owned_instance(&self, app_id: &str, sandbox_id: &str) -> Result<ContainerInfo, PoolError> {
        validate_app_id(app_id).map_err(|e| PoolError::Invalid(e.to_string()))?;

        let info = self.provider.get_container_info(sandbox_id).await?;
        if info.labels.get(&self.app_label()).map(String::as_str) != Some(app_id) {
            warn!(
                app_id = %app_id,
                sandbox_id = %sandbox_id,
                "Refusing to act on sandbox owned by another application"
            );
            return Err(PoolError::OwnershipMismatch {
                app_id: app_id.to_string(),
                sandbox_id: sandbox_id.to_string(),
            });
        }
        Ok(info)
    }

    fn exec_port(&self, spec: &SandboxPoolSpec) -> u16 {
        spec.exec_port.unwrap_or(self.config.exec_port)
    }

    fn endpoint(&self, info: &ContainerInfo, exec_port: u16) -> Result<String, PoolError> {
        if let Some(host_port) = info.ports.get(&exec_port) {
            return Ok(format!("http://127.0.0.1:{}", host_port));
        }
        if let Some(ip) = &info.ip_address {
            return Ok(format!("http://{}:{}", ip, exec_port));
        }
        Err(PoolError::Backend(format!(
            "sandbox {} exposes no reachable endpoint on port {}",
            info.id, exec_port
        )))
    }

    fn container_config(&self, app_id: &str, spec: &SandboxPoolSpec) -> ContainerConfig {
        let exec_port = self.exec_port(spec);

        let mut env_vars: HashMap<String, String> =
            spec.env.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        env_vars.insert("CORRAL_APP_ID".to_string(), app_id.to_string());
        env_vars.insert("CORRAL_POOL_NAME".to_string(), spec.pool_name.clone());
        env_vars.insert("CORRAL_EXEC_PORT".to_string(), exec_port.to_string());

        let pool_slug: String = spec
            .pool_name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect();
        let suffix = uuid::Uuid::new_v4().simple().to_string();

        ContainerConfig {
            image: spec.image_reference.clone(),
            name: format!(
                "{}-{}-{}-{}",
                self.config.label_prefix,
                app_id,
                pool_slug,
                &suffix[..8]
            ),
            env_vars,
            exec_port,
            cpu_cores: spec.resource_limits.cpu_cores,
            memory_mb: spec.resource_limits.memory_mb,
            command: spec.command.clone(),
            labels: HashMap::from([
                (self.app_label(), app_id.to_string()),
                (self.pool_label(), spec.pool_name.clone()),
            ]),
        }
    }

    fn to_instance(&self, info: &ContainerInfo) -> SandboxInstance {
        let status = info.status.to_instance_status(info.exit_code);
        SandboxInstance {
            sandbox_id: info.id.clone(),
            app_id: info.labels.get(&self.app_label()).cloned().unwrap_or_default(),
            pool_name: info.labels.get(&self.pool_label()).cloned().unwrap_or_default(),
            status,
            leased: self.leases.is_leased(&info.id),
            created_at: Some(info.created_at),
            started_at: info.started_at,
            finished_at: info.finished_at,
            exit_code: info.exit_code,
            details: match &info.status {
                ContainerStatus::Error(msg) => Some(msg.clone()),
                _ => None,
            },
        }
    }

    /// Pick an instance for a new lease, reserving capacity for a creation if needed
    async fn place(
        &self,
        app_id: &str,
        spec: &SandboxPoolSpec,
        slot: &Arc<PoolSlot>,
    ) -> Result<Placement<'_>, PoolError> {
        let _decision = slot.decision.lock().await;

        let instances = self.list(app_id, Some(&spec.pool_name)).await?;
        let leased = self.leases.leased_in_pool(app_id, &spec.pool_name);

        let mut stopped = None;
        let mut live = 0u32;
        for info in &instances {
            // Already counted in `pending`, and spoken for by its creator
            if slot.is_creating(&info.name) {
                continue;
            }
            match info.status.to_instance_status(info.exit_code) {
                InstanceStatus::Running => {
                    live += 1;
                    if leased.contains(&info.id) {
                        continue;
                    }
                    if let Some(guard) =
                        LeaseGuard::acquire(&self.leases, &info.id, app_id, &spec.pool_name)
                    {
                        return Ok(Placement::Reuse(info.clone(), guard));
                    }
                }
                InstanceStatus::Stopped | InstanceStatus::Pending => {
                    live += 1;
                    if stopped.is_none() && !leased.contains(&info.id) {
                        stopped = Some(info);
                    }
                }
                InstanceStatus::Creating | InstanceStatus::Stopping => live += 1,
                InstanceStatus::Error | InstanceStatus::NotFound => {}
            }
        }

        if let Some(info) = stopped {
            if let Some(guard) = LeaseGuard::acquire(&self.leases, &info.id, app_id, &spec.pool_name)
            {
                return Ok(Placement::Restart(info.clone(), guard));
            }
        }

        let pending = slot.pending.load(Ordering::SeqCst);
        if live + pending >= spec.max_instances {
            return Err(PoolError::CapacityExceeded {
                app_id: app_id.to_string(),
                pool_name: spec.pool_name.clone(),
                max_instances: spec.max_instances,
            });
        }

        let config = self.container_config(app_id, spec);
        let pending = PendingCreation::reserve(slot.clone(), config.name.clone());
        Ok(Placement::Create(config, pending))
    }

    async fn allocate_in_pool(
        &self,
        app_id: &str,
        pool_name: Option<&str>,
    ) -> Result<SandboxLease, PoolError> {
        let spec = self.pool_spec(app_id, pool_name).await?;
        let slot = self.slot(app_id, &spec.pool_name);
        let exec_port = self.exec_port(&spec);

        let (info, guard) = match self.place(app_id, &spec, &slot).await? {
            Placement::Reuse(info, guard) => {
                debug!(app_id = %app_id, sandbox_id = %info.id, "Reusing warm sandbox");
                (info, guard)
            }
            Placement::Restart(info, guard) => {
                debug!(app_id = %app_id, sandbox_id = %info.id, "Restarting idle sandbox");
                self.provider.start_container(&info.id).await?;
                (self.provider.get_container_info(&info.id).await?, guard)
            }
            Placement::Create(config, pending) => {
                let id = self.provider.create_container(&config).await?;
                let guard = LeaseGuard::acquire(&self.leases, &id, app_id, &spec.pool_name)
                    .ok_or_else(|| {
                        PoolError::Backend(format!("created sandbox {} is already leased", id))
                    })?;
                drop(pending);
                info!(
                    app_id = %app_id,
                    sandbox_id = %id,
                    pool = %spec.pool_name,
                    "Created sandbox"
                );
                (self.provider.get_container_info(&id).await?, guard)
            }
        };

        let endpoint = self.endpoint(&info, exec_port)?;
        guard.commit();

        Ok(SandboxLease {
            sandbox_id: info.id,
            app_id: app_id.to_string(),
            pool_name: spec.pool_name,
            endpoint,
        })
    }

    /// Lease an instance from the app's pool, bounded by the allocation timeout
    pub async fn allocate(
        &self,
        app_id: &str,
        pool_name: Option<&str>,
    ) -> Result<SandboxLease, PoolError> {
        validate_app_id(app_id).map_err(|e| PoolError::Invalid(e.to_string()))?;

        match tokio::time::timeout(
            self.config.allocate_timeout,
            self.allocate_in_pool(app_id, pool_name),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                warn!(app_id = %app_id, "Sandbox allocation timed out");
                Err(PoolError::Timeout {
                    millis: self.config.allocate_timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Return a leased instance to its pool, or tear it down
    pub async fn release(
        &self,
        app_id: &str,
        sandbox_id: &str,
        disposition: ReleaseDisposition,
    ) -> Result<(), PoolError> {
        let info = match self.owned_instance(app_id, sandbox_id).await {
            Err(PoolError::NotFound(id)) => {
                // Vanished underneath us; the lease is meaningless now
                if self
                    .leases
                    .release(sandbox_id)
                    .is_some_and(|record| record.app_id != app_id)
                {
                    warn!(sandbox_id = %sandbox_id, "Dropped lease recorded for another app");
                }
                return Err(PoolError::NotFound(id));
            }
            other => other?,
        };

        let record = self
            .leases
            .release(sandbox_id)
            .ok_or_else(|| PoolError::NotLeased(sandbox_id.to_string()))?;

        let keep_warm = disposition == ReleaseDisposition::Return
            && info.status == ContainerStatus::Running
            && self.below_min_idle(app_id, &record.pool_name).await;

        if keep_warm {
            debug!(app_id = %app_id, sandbox_id = %sandbox_id, "Returned sandbox to pool");
            return Ok(());
        }

        info!(
            app_id = %app_id,
            sandbox_id = %sandbox_id,
            disposition = ?disposition,
            "Tearing down sandbox"
        );
        self.teardown(sandbox_id, disposition == ReleaseDisposition::Discard)
            .await
    }

    async fn below_min_idle(&self, app_id: &str, pool_name: &str) -> bool {
        let min_instances = match self.pool_spec(app_id, Some(pool_name)).await {
            Ok(spec) => spec.min_instances,
            Err(e) => {
                debug!("No pool spec for {}/{} on release: {}", app_id, pool_name, e);
                return false;
            }
        };

        let instances = match self.list(app_id, Some(pool_name)).await {
            Ok(instances) => instances,
            Err(_) => return false,
        };

        // The instance being released is already out of the lease table
        let idle = instances
            .iter()
            .filter(|i| i.status == ContainerStatus::Running && !self.leases.is_leased(&i.id))
            .count() as u32;
        idle <= min_instances
    }

    async fn teardown(&self, sandbox_id: &str, force: bool) -> Result<(), PoolError> {
        if !force {
            match self
                .provider
                .stop_container(sandbox_id, self.config.stop_timeout_secs)
                .await
            {
                Ok(()) | Err(ProviderError::NotFound(_)) => {}
                Err(e) => warn!("Graceful stop of {} failed, forcing removal: {}", sandbox_id, e),
            }
        }

        match self.provider.remove_container(sandbox_id, true).await {
            Ok(()) | Err(ProviderError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Every instance labelled with the app, oldest first
    pub async fn status(&self, app_id: &str) -> Result<Vec<SandboxInstance>, PoolError> {
        validate_app_id(app_id).map_err(|e| PoolError::Invalid(e.to_string()))?;

        let mut infos = self.list(app_id, None).await?;
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        let live: HashSet<String> = infos.iter().map(|i| i.id.clone()).collect();
        self.leases.retain_live(app_id, &live);

        Ok(infos.iter().map(|i| self.to_instance(i)).collect())
    }

    pub async fn start_all(&self, app_id: &str) -> Result<BulkReport, PoolError> {
        self.bulk(app_id, |info| async move {
            if info.status == ContainerStatus::Running {
                return Ok(());
            }
            self.provider.start_container(&info.id).await
        })
        .await
    }

    pub async fn stop_all(&self, app_id: &str) -> Result<BulkReport, PoolError> {
        let timeout = self.config.stop_timeout_secs;
        self.bulk(app_id, |info| async move {
            if info.status != ContainerStatus::Running {
                return Ok(());
            }
            self.provider.stop_container(&info.id, timeout).await
        })
        .await
    }

    pub async fn restart_all(&self, app_id: &str) -> Result<BulkReport, PoolError> {
        let timeout = self.config.stop_timeout_secs;
        self.bulk(app_id, |info| async move {
            self.provider.restart_container(&info.id, timeout).await
        })
        .await
    }

    /// Run `op` on every instance of the app concurrently; failures are collected, not raised
    async fn bulk<'a, F, Fut>(&'a self, app_id: &str, op: F) -> Result<BulkReport, PoolError>
    where
        F: Fn(ContainerInfo) -> Fut,
        Fut: std::future::Future<Output = Result<(), ProviderError>> + 'a,
    {
        validate_app_id(app_id).map_err(|e| PoolError::Invalid(e.to_string()))?;

        let instances = self.list(app_id, None).await?;
        let ids: Vec<String> = instances.iter().map(|i| i.id.clone()).collect();
        let results = join_all(instances.into_iter().map(op)).await;

        let mut report = BulkReport::default();
        for (id, result) in ids.iter().zip(results) {
            if let Err(e) = &result {
                warn!(app_id = %app_id, sandbox_id = %id, "Bulk operation failed: {}", e);
            }
            report.record(id, result);
        }
        Ok(report)
    }

    /// Run a command inside an instance the app owns
    pub async fn exec_instance(
        &self,
        app_id: &str,
        sandbox_id: &str,
        command: Vec<String>,
    ) -> Result<ExecOutput, PoolError> {
        if command.is_empty() {
            return Err(PoolError::Invalid("command is required".to_string()));
        }
        self.owned_instance(app_id, sandbox_id).await?;

        let result = self.provider.exec_command(sandbox_id, command).await?;
        Ok(ExecOutput {
            exit_code: result.exit_code,
            stdout: String::from_utf8_lossy(&result.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&result.stderr).into_owned(),
        })
    }

    /// Create instances until every pool has at least `minInstances` live ones
    pub async fn ensure_warm(&self, app_id: &str) -> Result<BulkReport, PoolError> {
        validate_app_id(app_id).map_err(|e| PoolError::Invalid(e.to_string()))?;

        let mut report = BulkReport::default();
        for spec in self.pool_specs(app_id).await? {
            let slot = self.slot(app_id, &spec.pool_name);
            let _decision = slot.decision.lock().await;

            let live = self
                .list(app_id, Some(&spec.pool_name))
                .await?
                .iter()
                .filter(|i| {
                    !matches!(
                        i.status.to_instance_status(i.exit_code),
                        InstanceStatus::Error | InstanceStatus::NotFound
                    )
                })
                .count() as u32;

            for _ in live..spec.min_instances {
                let config = self.container_config(app_id, &spec);
                match self.provider.create_container(&config).await {
                    Ok(id) => report.record(&id, Ok::<(), ProviderError>(())),
                    Err(e) => report.record(&config.name, Err(e)),
                }
            }
        }
        Ok(report)
    }
}

#[async_trait]
impl SandboxAllocator for SandboxPoolManager {
    async fn allocate(
        &self,
        app_id: &str,
        pool_name: Option<&str>,
    ) -> Result<SandboxLease, PoolError> {
        SandboxPoolManager::allocate(self, app_id, pool_name).await
    }

    async fn release(
        &self,
        app_id: &str,
        sandbox_id: &str,
        disposition: ReleaseDisposition,
    ) -> Result<(), PoolError> {
        SandboxPoolManager::release(self, app_id, sandbox_id, disposition).await
    }
}

#[async_trait]
impl SandboxInspector for SandboxPoolManager {
    async fn status(&self, app_id: &str) -> Result<Vec<SandboxInstance>, PoolError> {
        SandboxPoolManager::status(self, app_id).await
    }
}
