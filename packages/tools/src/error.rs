// ABOUTME: Error type for tool server transports and the tool hub
// ABOUTME: Classifies failures onto the shared ErrorKind taxonomy

use corral_core::ErrorKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Invalid tool server configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown transport type: {0}")]
    UnknownTransport(String),

    #[error("Tool server {0} is not connected")]
    NotConnected(String),

    #[error("Tool server {0} is already connected")]
    AlreadyConnected(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Tool server returned error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ToolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidConfig(_) | Self::UnknownTransport(_) => ErrorKind::Validation,
            Self::UnknownTool(_) => ErrorKind::NotFound,
            Self::AlreadyConnected(_) => ErrorKind::Conflict,
            Self::NotConnected(_) => ErrorKind::Unavailable,
            Self::Transport(_) | Self::Io(_) | Self::Http(_) => ErrorKind::Transport,
            Self::Protocol(_) | Self::Json(_) | Self::Rpc { .. } => ErrorKind::Protocol,
        }
    }
}

pub type Result<T> = std::result::Result<T, ToolError>;
