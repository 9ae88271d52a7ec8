//! appstack configuration

use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default compose file name written into each working directory
pub const DEFAULT_COMPOSE_FILE_NAME: &str = "docker-compose.yml";

/// Environment variable overriding `apps_path`
pub const APPS_PATH_ENV: &str = "APPSTACK_APPS_PATH";

/// How install and uninstall relate to the engine task they spawn
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallMode {
    /// Return once the app is staged; engine failures only surface as events
    #[default]
    Detached,
    /// Await the engine task and return its error to the caller
    Wait,
}

/// Values substituted into compose files before parsing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpolationDefaults {
    /// Value of `$DefaultUserName`
    pub user_name: String,
    /// Value of `$DefaultPassword`
    pub password: String,
    /// Value of `$PUID`
    pub puid: String,
    /// Value of `$PGID`
    pub pgid: String,
}

impl Default for InterpolationDefaults {
    fn default() -> Self {
        Self {
            user_name: "admin".to_string(),
            password: "admin".to_string(),
            puid: "1000".to_string(),
            pgid: "1000".to_string(),
        }
    }
}

/// appstack configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root under which every app gets its working directory
    pub apps_path: PathBuf,
    /// File name of the persisted compose file inside a working directory
    pub compose_file_name: String,
    /// Interpolation defaults
    pub defaults: InterpolationDefaults,
    /// Whether callers wait for the engine
    pub install_mode: InstallMode,
    /// Remove the working directory when a staged app has invalid store info
    ///
    /// Reloading the staged file already validates the main service, so this
    /// only matters if the file changes between reload and projection.
    pub cleanup_on_invalid_store_info: bool,
    /// Capacity of the event broadcast channel
    pub event_capacity: usize,
    /// Engine backend name (`docker` or `mock`)
    pub engine: String,
    /// Path or name of the docker binary
    pub docker_binary: String,
}

impl Default for Config {
    fn default() -> Self {
        let apps_path = dirs::data_dir()
            .map(|dir| dir.join("appstack").join("apps"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/appstack/apps"));

        Self {
            apps_path,
            compose_file_name: DEFAULT_COMPOSE_FILE_NAME.to_string(),
            defaults: InterpolationDefaults::default(),
            install_mode: InstallMode::default(),
            cleanup_on_invalid_store_info: true,
            event_capacity: 1024,
            engine: "docker".to_string(),
            docker_binary: "docker".to_string(),
        }
    }
}

impl Config {
    /// Create a configuration rooted at the given apps path
    pub fn with_apps_path(apps_path: impl Into<PathBuf>) -> Self {
        Self {
            apps_path: apps_path.into(),
            ..Self::default()
        }
    }

    /// Load configuration from an optional YAML file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        if let Ok(apps_path) = std::env::var(APPS_PATH_ENV) {
            if !apps_path.is_empty() {
                config.apps_path = PathBuf::from(apps_path);
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::InvalidConfig(format!("Failed to read {}: {}", path.display(), e))
        })?;

        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML text
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| AppError::InvalidConfig(format!("Failed to parse YAML: {}", e)))
    }

    /// Check values that would otherwise fail much later
    pub fn validate(&self) -> Result<()> {
        if self.apps_path.as_os_str().is_empty() {
            return Err(AppError::InvalidConfig("apps_path must not be empty".to_string()));
        }

        if self.compose_file_name.is_empty()
            || self.compose_file_name.contains(std::path::MAIN_SEPARATOR)
            || self.compose_file_name.contains('/')
        {
            return Err(AppError::InvalidConfig(format!(
                "compose_file_name must be a plain file name, got '{}'",
                self.compose_file_name
            )));
        }

        if self.event_capacity == 0 {
            return Err(AppError::InvalidConfig(
                "event_capacity must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = Config::from_yaml(
            r#"
apps_path: /srv/apps
install_mode: wait
defaults:
  puid: "1001"
"#,
        )
        .unwrap();

        assert_eq!(config.apps_path, PathBuf::from("/srv/apps"));
        assert_eq!(config.install_mode, InstallMode::Wait);
        assert_eq!(config.defaults.puid, "1001");
        assert_eq!(config.defaults.pgid, "1000");
        assert_eq!(config.compose_file_name, DEFAULT_COMPOSE_FILE_NAME);
        assert!(config.cleanup_on_invalid_store_info);
    }

    #[test]
    fn test_validate_rejects_nested_compose_file_name() {
        let mut config = Config::with_apps_path("/srv/apps");
        config.compose_file_name = "nested/compose.yml".to_string();
        assert!(matches!(config.validate(), Err(AppError::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let mut config = Config::with_apps_path("/srv/apps");
        config.event_capacity = 0;
        assert!(config.validate().is_err());
    }
}
