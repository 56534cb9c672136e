// ABOUTME: State Manager for Corral applications
// ABOUTME: Git-versioned definition store, ephemeral runtime values and the definition-backed registry

pub mod definitions;
pub mod error;
pub mod manager;
pub mod registry;
pub mod runtime;

pub use definitions::{CommitAuthor, DefinitionStore};
pub use error::{Result, StateError};
pub use manager::StateManager;
pub use registry::{DefinitionRegistry, APP_DEFINITION_FILE};
pub use runtime::{MemoryRuntimeStore, RuntimeStore, SqliteRuntimeStore};
