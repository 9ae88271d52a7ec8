//! Engine backed by the `docker compose` CLI

use super::{ComposeEngine, StackSummary};
use crate::compose::ComposeApp;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

/// Drives stacks through `docker compose`
#[derive(Debug, Clone)]
pub struct DockerComposeEngine {
    binary: PathBuf,
}

/// One entry of `docker compose ls --format json`
#[derive(Debug, Deserialize)]
struct ComposeLsEntry {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Status", default)]
    status: String,
    #[serde(rename = "ConfigFiles", default)]
    config_files: String,
}

impl DockerComposeEngine {
    /// Create an engine using the given docker binary
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn project_args(app: &ComposeApp) -> Result<Vec<OsString>> {
        let file = app.config_file.as_ref().ok_or_else(|| {
            AppError::Engine(format!("Compose app '{}' has no compose file", app.name))
        })?;

        let mut args: Vec<OsString> = vec![
            "--project-name".into(),
            app.name.clone().into(),
            "--file".into(),
            file.clone().into(),
        ];

        if let Some(dir) = app.working_dir() {
            args.push("--project-directory".into());
            args.push(dir.into());
        }

        Ok(args)
    }

    async fn compose<I, S>(&self, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args: Vec<OsString> = args.into_iter().map(|a| a.as_ref().to_owned()).collect();
        debug!(binary = %self.binary.display(), ?args, "Running docker compose");

        let output = Command::new(&self.binary)
            .arg("compose")
            .args(&args)
            .output()
            .await
            .map_err(|e| {
                AppError::Engine(format!("Failed to run {}: {}", self.binary.display(), e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::Engine(format!(
                "docker compose exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl ComposeEngine for DockerComposeEngine {
    fn name(&self) -> &str {
        "docker"
    }

    async fn list(&self, all: bool) -> Result<Vec<StackSummary>> {
        let mut args = vec!["ls", "--format", "json"];
        if all {
            args.push("--all");
        }

        let output = self.compose(args).await?;
        parse_stack_list(&output)
    }

    async fn pull_and_start(&self, app: &ComposeApp) -> Result<()> {
        let project = Self::project_args(app)?;

        info!("Pulling images for compose app {}", app.name);
        let mut pull = project.clone();
        pull.push("pull".into());
        self.compose(pull).await?;

        info!("Starting compose app {}", app.name);
        let mut up = project;
        up.extend(["up", "--detach", "--remove-orphans"].map(OsString::from));
        self.compose(up).await?;

        Ok(())
    }

    async fn stop_and_remove(&self, app: &ComposeApp, delete_working_dir: bool) -> Result<()> {
        info!("Removing compose app {}", app.name);

        let mut args = match Self::project_args(app) {
            Ok(args) => args,
            Err(_) => vec!["--project-name".into(), app.name.clone().into()],
        };
        args.extend(["down", "--remove-orphans", "--volumes"].map(OsString::from));
        self.compose(args).await?;

        if delete_working_dir {
            if let Some(dir) = app.working_dir() {
                remove_working_dir(dir).await?;
            }
        }

        Ok(())
    }
}

pub(crate) async fn remove_working_dir(dir: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(AppError::provisioning(dir, e)),
    }
}

/// Parse the JSON output of `docker compose ls --format json`
pub fn parse_stack_list(output: &str) -> Result<Vec<StackSummary>> {
    let output = output.trim();
    if output.is_empty() {
        return Ok(Vec::new());
    }

    let entries: Vec<ComposeLsEntry> = serde_json::from_str(output)?;

    Ok(entries
        .into_iter()
        .map(|entry| StackSummary {
            id: entry.name,
            status: entry.status,
            config_files: entry
                .config_files
                .split(',')
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(PathBuf::from)
                .collect(),
        })
        .collect())
}
