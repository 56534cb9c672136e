// ABOUTME: Application Registry backed by the definition store
// ABOUTME: Reads and writes app_definition.yaml and derives application status on demand

use async_trait::async_trait;
use corral_core::{
    validate_app_id, validate_component_id, AppDefinition, ApplicationRegistry, ApplicationStatus,
    ComponentDefinition, RegistryError, Revision, SandboxInspector, SandboxPoolSpec,
};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::definitions::CommitAuthor;
use crate::error::StateError;
use crate::manager::StateManager;

pub const APP_DEFINITION_FILE: &str = "app_definition.yaml";

const REGISTER_ATTEMPTS: u32 = 4;

pub struct DefinitionRegistry {
    state: Arc<StateManager>,
}

impl DefinitionRegistry {
    pub fn new(state: Arc<StateManager>) -> Self {
        Self { state }
    }

    /// Store a new application definition; fails if the app already has one
    pub async fn register_application(
        &self,
        definition: &AppDefinition,
        author: Option<CommitAuthor>,
    ) -> Result<Revision, RegistryError> {
        validate_definition(definition)?;
        let app_id = &definition.app_id;
        let yaml = serde_yaml::to_string(definition)
            .map_err(|e| RegistryError::Invalid(e.to_string()))?;

        let mut attempt = 0;
        let revision = loop {
            attempt += 1;
            let head = self
                .state
                .definitions()
                .ensure_repository(app_id)
                .await
                .map_err(backend)?;
            match self.state.read_file(app_id, APP_DEFINITION_FILE, Some(&head)).await {
                Ok(_) => return Err(RegistryError::AlreadyExists(app_id.clone())),
                Err(StateError::NotFound(_)) => {}
                Err(e) => return Err(backend(e)),
            }

            // Publish only on top of the HEAD that was checked for an existing definition
            match self
                .state
                .write_file_at(
                    app_id,
                    APP_DEFINITION_FILE,
                    yaml.as_str(),
                    &head,
                    &format!("Register application {}", app_id),
                    author.clone(),
                )
                .await
            {
                Ok(revision) => break revision,
                Err(StateError::Conflict(reason)) if attempt >= REGISTER_ATTEMPTS => {
                    return Err(RegistryError::Backend(reason))
                }
                Err(StateError::Conflict(reason)) => {
                    debug!("Registration of {} raced another commit: {}", app_id, reason)
                }
                Err(e) => return Err(backend(e)),
            }
        };
        info!("Registered application {} at {}", definition.app_id, revision);
        Ok(revision)
    }

    /// Replace an existing application definition
    pub async fn update_application(
        &self,
        definition: &AppDefinition,
        author: Option<CommitAuthor>,
    ) -> Result<Revision, RegistryError> {
        validate_definition(definition)?;
        self.load(&definition.app_id).await?;

        self.write_definition(
            definition,
            &format!("Update application {}", definition.app_id),
            author,
        )
        .await
    }

    /// Status re-derived from definition HEAD and the live instance listing
    pub async fn application_status(
        &self,
        app_id: &str,
        sandboxes: &dyn SandboxInspector,
    ) -> Result<ApplicationStatus, RegistryError> {
        let definition = self.load(app_id).await?;
        let revision = self.state.head_revision(app_id).await.map_err(backend)?;

        let instances = match sandboxes.status(app_id).await {
            Ok(instances) => instances,
            Err(e) => {
                warn!("Could not list sandboxes for {}: {}", app_id, e);
                Vec::new()
            }
        };

        let running_instances = instances
            .iter()
            .filter(|i| i.status == corral_core::InstanceStatus::Running)
            .count();
        let leased_instances = instances.iter().filter(|i| i.leased).count();

        Ok(ApplicationStatus {
            app_id: definition.app_id,
            name: definition.name,
            version: definition.version,
            revision,
            component_count: definition.components.len(),
            instances,
            running_instances,
            leased_instances,
        })
    }

    async fn write_definition(
        &self,
        definition: &AppDefinition,
        message: &str,
        author: Option<CommitAuthor>,
    ) -> Result<Revision, RegistryError> {
        let yaml = serde_yaml::to_string(definition)
            .map_err(|e| RegistryError::Invalid(e.to_string()))?;
        self.state
            .write_file(&definition.app_id, APP_DEFINITION_FILE, yaml, message, author)
            .await
            .map_err(backend)
    }

    async fn load(&self, app_id: &str) -> Result<AppDefinition, RegistryError> {
        validate_app_id(app_id).map_err(|e| RegistryError::Invalid(e.to_string()))?;

        let raw = match self.state.read_file(app_id, APP_DEFINITION_FILE, None).await {
            Ok(raw) => raw,
            Err(StateError::NotFound(_)) => {
                return Err(RegistryError::ApplicationNotFound(app_id.to_string()))
            }
            Err(e) => return Err(backend(e)),
        };

        let definition: AppDefinition = serde_yaml::from_slice(&raw).map_err(|e| {
            RegistryError::Invalid(format!("{} for {}: {}", APP_DEFINITION_FILE, app_id, e))
        })?;

        if definition.app_id != app_id {
            return Err(RegistryError::Invalid(format!(
                "{} declares appId {} but is stored under {}",
                APP_DEFINITION_FILE, definition.app_id, app_id
            )));
        }

        Ok(definition)
    }
}

#[async_trait]
impl ApplicationRegistry for DefinitionRegistry {
    async fn get_application_details(&self, app_id: &str) -> Result<AppDefinition, RegistryError> {
        self.load(app_id).await
    }

    async fn get_component_definition(
        &self,
        app_id: &str,
        component_id: &str,
    ) -> Result<ComponentDefinition, RegistryError> {
        let definition = self.load(app_id).await?;
        definition
            .components
            .get(component_id)
            .cloned()
            .ok_or_else(|| RegistryError::ComponentNotFound {
                app_id: app_id.to_string(),
                component_id: component_id.to_string(),
            })
    }

    async fn get_sandbox_requirements(
        &self,
        app_id: &str,
    ) -> Result<Vec<SandboxPoolSpec>, RegistryError> {
        Ok(self.load(app_id).await?.sandbox_pools)
    }
}

fn backend(err: StateError) -> RegistryError {
    RegistryError::Backend(err.to_string())
}

fn validate_definition(definition: &AppDefinition) -> Result<(), RegistryError> {
    validate_app_id(&definition.app_id).map_err(|e| RegistryError::Invalid(e.to_string()))?;

    let mut pool_names = HashSet::new();
    for pool in &definition.sandbox_pools {
        if pool.pool_name.is_empty() || pool.image_reference.is_empty() {
            return Err(RegistryError::Invalid(
                "sandbox pools need a poolName and imageReference".to_string(),
            ));
        }
        if pool.max_instances == 0 || pool.min_instances > pool.max_instances {
            return Err(RegistryError::Invalid(format!(
                "pool {} has invalid bounds (min {}, max {})",
                pool.pool_name, pool.min_instances, pool.max_instances
            )));
        }
        if !pool_names.insert(pool.pool_name.as_str()) {
            return Err(RegistryError::Invalid(format!(
                "duplicate pool {}",
                pool.pool_name
            )));
        }
    }

    for (key, component) in &definition.components {
        validate_component_id(key).map_err(|e| RegistryError::Invalid(e.to_string()))?;
        if component.component_id != *key {
            return Err(RegistryError::Invalid(format!(
                "component {} is stored under key {}",
                component.component_id, key
            )));
        }
        if let Some(pool) = &component.target_pool_name {
            if !pool_names.contains(pool.as_str()) {
                return Err(RegistryError::Invalid(format!(
                    "component {} targets unknown pool {}",
                    key, pool
                )));
            }
        }
    }

    Ok(())
}
