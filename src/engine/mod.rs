//! Container engine adapters
//!
//! The engine is the part that actually pulls images and runs containers.
//! appstack only drives it through [`ComposeEngine`].

pub mod docker;
pub mod mock;

use crate::compose::ComposeApp;
use crate::config::Config;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

pub use docker::DockerComposeEngine;
pub use mock::MockEngine;

/// A compose stack as reported by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackSummary {
    /// Stack id (the app name)
    pub id: String,
    /// Engine-reported status, e.g. `running(2)`
    pub status: String,
    /// Compose files the stack was started from
    pub config_files: Vec<PathBuf>,
}

impl StackSummary {
    /// First compose file of the stack
    pub fn config_file(&self) -> Option<&PathBuf> {
        self.config_files.first()
    }
}

/// Operations appstack needs from a container engine
#[async_trait]
pub trait ComposeEngine: Send + Sync {
    /// Backend name
    fn name(&self) -> &str;

    /// List stacks; `all` includes stopped ones
    async fn list(&self, all: bool) -> Result<Vec<StackSummary>>;

    /// Pull images and start every service of the app
    async fn pull_and_start(&self, app: &ComposeApp) -> Result<()>;

    /// Stop and remove the app's containers, optionally deleting its working directory
    async fn stop_and_remove(&self, app: &ComposeApp, delete_working_dir: bool) -> Result<()>;
}

/// Build the engine named in the configuration
pub fn select_engine(config: &Config) -> Result<Arc<dyn ComposeEngine>> {
    match config.engine.as_str() {
        "docker" => Ok(Arc::new(DockerComposeEngine::new(&config.docker_binary))),
        "mock" => Ok(Arc::new(MockEngine::new())),
        other => Err(AppError::InvalidConfig(format!("Unknown engine '{}'", other))),
    }
}
