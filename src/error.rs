//! Error types for appstack

use std::path::PathBuf;
use thiserror::Error;

/// Result type for appstack operations
pub type Result<T> = std::result::Result<T, AppError>;

/// appstack error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Compose file parse error: {0}")]
    Parse(String),

    #[error("Failed to provision working directory {}: {source}", path.display())]
    DirectoryProvisioning {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No app found in compose app")]
    NoAppFound,

    #[error("Main app not found in compose app: {0}")]
    MainAppNotFound(String),

    #[error("Container engine error: {0}")]
    Engine(String),

    #[error("Compose app not found: {0}")]
    NotFound(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(String),
}

impl AppError {
    pub(crate) fn provisioning(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AppError::DirectoryProvisioning {
            path: path.into(),
            source,
        }
    }
}
