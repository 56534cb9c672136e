// ABOUTME: State Manager facade over the definition store and the runtime value store
// ABOUTME: Validates app ids, namespaces runtime keys and keeps the two stores independent

use async_trait::async_trait;
use corral_config::{CorralSettings, RuntimeStoreSetting};
use corral_core::{
    namespaced_key, validate_app_id, CommitInfo, FileEntry, Revision, RuntimeStateWriter,
    SinkError,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::definitions::{CommitAuthor, DefinitionStore};
use crate::error::{Result, StateError};
use crate::runtime::{MemoryRuntimeStore, RuntimeStore, SqliteRuntimeStore};

/// Durable versioned definitions plus volatile runtime values.
///
/// A failing runtime backend only affects the runtime-value operations; the
/// definition operations never touch it.
#[derive(Clone)]
pub struct StateManager {
    definitions: DefinitionStore,
    runtime: Arc<dyn RuntimeStore>,
}

impl StateManager {
    pub fn new(definitions: DefinitionStore, runtime: Arc<dyn RuntimeStore>) -> Self {
        Self {
            definitions,
            runtime,
        }
    }

    pub async fn from_settings(settings: &CorralSettings) -> Result<Self> {
        tokio::fs::create_dir_all(&settings.definition_root).await?;

        let definitions = DefinitionStore::new(
            settings.definition_root.clone(),
            CommitAuthor::new(
                settings.commit_author_name.clone(),
                settings.commit_author_email.clone(),
            ),
        );

        let runtime: Arc<dyn RuntimeStore> = match &settings.runtime_store {
            RuntimeStoreSetting::Memory => Arc::new(MemoryRuntimeStore::new()),
            RuntimeStoreSetting::Sqlite(url) => Arc::new(SqliteRuntimeStore::connect(url).await?),
        };

        info!(
            "State manager ready (definitions at {}, runtime store {:?})",
            settings.definition_root.display(),
            settings.runtime_store
        );

        Ok(Self::new(definitions, runtime))
    }

    pub fn definitions(&self) -> &DefinitionStore {
        &self.definitions
    }

    // ------------------------------------------------------------------
    // Definition store
    // ------------------------------------------------------------------

    pub async fn read_file(
        &self,
        app_id: &str,
        path: &str,
        revision: Option<&Revision>,
    ) -> Result<Vec<u8>> {
        self.definitions.read_file(app_id, path, revision).await
    }

    pub async fn write_file(
        &self,
        app_id: &str,
        path: &str,
        content: impl Into<Vec<u8>>,
        commit_message: &str,
        author: Option<CommitAuthor>,
    ) -> Result<Revision> {
        self.definitions
            .write_file(app_id, path, content.into(), commit_message, author)
            .await
    }

    /// Compare-and-swap write: fails with a conflict unless HEAD is still `expected_base`
    pub async fn write_file_at(
        &self,
        app_id: &str,
        path: &str,
        content: impl Into<Vec<u8>>,
        expected_base: &Revision,
        commit_message: &str,
        author: Option<CommitAuthor>,
    ) -> Result<Revision> {
        self.definitions
            .write_file_at(app_id, path, content.into(), expected_base, commit_message, author)
            .await
    }

    pub async fn apply_diff(
        &self,
        app_id: &str,
        path: &str,
        diff: &str,
        expected_base: &Revision,
        commit_message: &str,
        author: Option<CommitAuthor>,
    ) -> Result<Revision> {
        self.definitions
            .apply_diff(app_id, path, diff, expected_base, commit_message, author)
            .await
    }

    pub async fn delete_file(
        &self,
        app_id: &str,
        path: &str,
        commit_message: &str,
        author: Option<CommitAuthor>,
    ) -> Result<Revision> {
        self.definitions
            .delete_file(app_id, path, commit_message, author)
            .await
    }

    pub async fn list_directory(
        &self,
        app_id: &str,
        path: &str,
        recursive: bool,
        revision: Option<&Revision>,
    ) -> Result<Vec<FileEntry>> {
        self.definitions
            .list_directory(app_id, path, recursive, revision)
            .await
    }

    pub async fn head_revision(&self, app_id: &str) -> Result<Option<Revision>> {
        self.definitions.head_revision(app_id).await
    }

    pub async fn history(
        &self,
        app_id: &str,
        path: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CommitInfo>> {
        self.definitions.history(app_id, path, limit).await
    }

    // ------------------------------------------------------------------
    // Runtime values
    // ------------------------------------------------------------------

    fn runtime_key(app_id: &str, key: &str) -> Result<String> {
        validate_app_id(app_id)?;
        if key.is_empty() {
            return Err(StateError::Validation("runtime key is required".to_string()));
        }
        Ok(namespaced_key(app_id, key))
    }

    pub async fn get_runtime_value(&self, app_id: &str, key: &str) -> Result<Option<Value>> {
        let key = Self::runtime_key(app_id, key)?;
        self.runtime.get(&key).await
    }

    pub async fn set_runtime_value(
        &self,
        app_id: &str,
        key: &str,
        value: &Value,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let key = Self::runtime_key(app_id, key)?;
        debug!("Setting runtime value {}", key);
        self.runtime.set(&key, value, ttl).await
    }

    pub async fn delete_runtime_value(&self, app_id: &str, key: &str) -> Result<bool> {
        let key = Self::runtime_key(app_id, key)?;
        self.runtime.delete(&key).await
    }
}

#[async_trait]
impl RuntimeStateWriter for StateManager {
    async fn set_runtime_value(
        &self,
        app_id: &str,
        key: &str,
        value: Value,
    ) -> std::result::Result<(), SinkError> {
        StateManager::set_runtime_value(self, app_id, key, &value, None)
            .await
            .map_err(|e| SinkError::Other(e.to_string()))
    }

    async fn delete_runtime_value(
        &self,
        app_id: &str,
        key: &str,
    ) -> std::result::Result<(), SinkError> {
        StateManager::delete_runtime_value(self, app_id, key)
            .await
            .map(|_| ())
            .map_err(|e| SinkError::Other(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;
    use serde_json::json;
    use tempfile::TempDir;

    mock! {
        Store {}

        #[async_trait]
        impl RuntimeStore for Store {
            async fn get(&self, key: &str) -> Result<Option<Value>>;
            async fn set(&self, key: &str, value: &Value, ttl: Option<Duration>) -> Result<()>;
            async fn delete(&self, key: &str) -> Result<bool>;
        }
    }

    fn manager_with(runtime: Arc<dyn RuntimeStore>) -> (TempDir, StateManager) {
        let dir = TempDir::new().unwrap();
        let definitions =
            DefinitionStore::new(dir.path(), CommitAuthor::new("Test", "test@example.com"));
        (dir, StateManager::new(definitions, runtime))
    }

    #[tokio::test]
    async fn test_from_settings_creates_missing_definition_root() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("nested").join("definitions");
        let root_str = root.to_string_lossy().into_owned();
        let settings = CorralSettings::from_lookup(|var| {
            (var == corral_config::env::CORRAL_DEFINITION_ROOT).then(|| root_str.clone())
        })
        .unwrap();

        let manager = StateManager::from_settings(&settings).await.unwrap();

        assert!(root.is_dir());
        assert_eq!(manager.definitions().root(), root.as_path());
    }

    #[tokio::test]
    async fn test_runtime_values_are_namespaced_per_app() {
        let (_dir, manager) = manager_with(Arc::new(MemoryRuntimeStore::new()));

        manager
            .set_runtime_value("app-a", "counter", &json!(1), None)
            .await
            .unwrap();

        assert_eq!(
            manager.get_runtime_value("app-a", "counter").await.unwrap(),
            Some(json!(1))
        );
        assert_eq!(
            manager.get_runtime_value("app-b", "counter").await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_runtime_key_uses_app_prefix() {
        let mut store = MockStore::new();
        store
            .expect_get()
            .withf(|key| key == "demo:session")
            .times(1)
            .returning(|_| Ok(Some(json!("s1"))));

        let (_dir, manager) = manager_with(Arc::new(store));
        assert_eq!(
            manager.get_runtime_value("demo", "session").await.unwrap(),
            Some(json!("s1"))
        );
    }

    #[tokio::test]
    async fn test_invalid_app_id_never_reaches_store() {
        let mut store = MockStore::new();
        store.expect_set().never();

        let (_dir, manager) = manager_with(Arc::new(store));
        let err = manager
            .set_runtime_value("a:b", "k", &json!(1), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::Validation(_)));
    }

    #[tokio::test]
    async fn test_runtime_outage_does_not_affect_definitions() {
        let mut store = MockStore::new();
        store
            .expect_get()
            .returning(|_| Err(StateError::RuntimeUnavailable("connection refused".into())));

        let (_dir, manager) = manager_with(Arc::new(store));

        let err = manager.get_runtime_value("demo", "k").await.unwrap_err();
        assert_eq!(err.kind(), corral_core::ErrorKind::Unavailable);

        let revision = manager
            .write_file("demo", "notes.md", "hello", "Add notes", None)
            .await
            .unwrap();
        let content = manager
            .read_file("demo", "notes.md", Some(&revision))
            .await
            .unwrap();
        assert_eq!(content, b"hello");
    }

    #[tokio::test]
    async fn test_state_writer_null_deletes() {
        let (_dir, manager) = manager_with(Arc::new(MemoryRuntimeStore::new()));
        let writer: &dyn RuntimeStateWriter = &manager;

        writer
            .set_runtime_value("demo", "greeting", json!("hi"))
            .await
            .unwrap();
        writer.delete_runtime_value("demo", "greeting").await.unwrap();

        assert_eq!(
            manager.get_runtime_value("demo", "greeting").await.unwrap(),
            None
        );
    }
}
