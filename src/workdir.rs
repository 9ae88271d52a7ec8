//! Per-app working directories

use crate::compose::validate_app_name;
use crate::error::{AppError, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info};

/// Manages `<root>/<app name>` directories and the compose file inside them
#[derive(Debug, Clone)]
pub struct WorkingDirectories {
    /// Root holding one directory per app
    root: PathBuf,
    /// Name of the compose file inside each directory
    compose_file_name: String,
}

impl WorkingDirectories {
    /// Create a manager rooted at `root`
    pub fn new(root: impl Into<PathBuf>, compose_file_name: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            compose_file_name: compose_file_name.into(),
        }
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Working directory of an app
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Compose file path of an app
    pub fn compose_file_path(&self, name: &str) -> PathBuf {
        self.path_for(name).join(&self.compose_file_name)
    }

    /// Create the working directory of an app if it does not exist
    pub async fn prepare(&self, name: &str) -> Result<PathBuf> {
        let path = self.path_for(name);

        if let Err(e) = validate_app_name(name) {
            return Err(AppError::provisioning(
                path,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()),
            ));
        }

        if let Err(e) = fs::create_dir_all(&path).await {
            error!(path = %path.display(), error = %e, "Failed to create working dir");
            return Err(AppError::provisioning(path, e));
        }

        debug!(path = %path.display(), "Working dir ready");
        Ok(path)
    }

    /// Write the compose file into a working directory, readable by the owner only
    pub async fn write_compose_file(&self, dir: &Path, content: &str) -> Result<PathBuf> {
        let path = dir.join(&self.compose_file_name);

        if let Err(e) = write_private(&path, content.as_bytes()).await {
            error!(path = %path.display(), error = %e, "Failed to save compose file");
            return Err(AppError::provisioning(path, e));
        }

        Ok(path)
    }

    /// Remove a working directory, logging instead of failing
    pub async fn cleanup(&self, path: &Path) {
        info!(path = %path.display(), "Cleaning up working dir");

        match fs::remove_dir_all(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to cleanup working dir");
            }
        }
    }
}

async fn write_private(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await?;
    file.write_all(content).await?;
    file.sync_all().await?;

    // mode() only applies on creation
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    }

    Ok(())
}
