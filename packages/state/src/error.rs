// ABOUTME: Error types for the State Manager
// ABOUTME: Definition store, runtime store and task failures mapped onto the shared ErrorKind

use corral_core::{ErrorKind, ValidationError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid revision: {0}")]
    InvalidRevision(String),

    /// Stale base revision, unclean diff apply, or a lost compare-and-swap on the branch
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("Runtime store error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Runtime store unavailable: {0}")]
    RuntimeUnavailable(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StateError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound(_) | Self::InvalidRevision(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Database(_) | Self::RuntimeUnavailable(_) => ErrorKind::Unavailable,
            Self::Git(_) | Self::Json(_) | Self::Io(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<ValidationError> for StateError {
    fn from(err: ValidationError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<tokio::task::JoinError> for StateError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(format!("definition store task failed: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, StateError>;
