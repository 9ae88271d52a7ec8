//! In-memory engine for tests and dry runs

use super::docker::remove_working_dir;
use super::{ComposeEngine, StackSummary};
use crate::compose::ComposeApp;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Engine that tracks stacks in memory
#[derive(Default)]
pub struct MockEngine {
    stacks: Mutex<BTreeMap<String, StackSummary>>,
    install_failure: Mutex<Option<String>>,
    uninstall_failure: Mutex<Option<String>>,
    installs: AtomicUsize,
    uninstalls: AtomicUsize,
}

impl MockEngine {
    /// Create an empty mock engine
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stack as if the engine had started it
    pub fn insert_stack(&self, id: &str, status: &str, config_files: Vec<PathBuf>) -> Result<()> {
        let mut stacks = self.lock_stacks()?;
        stacks.insert(
            id.to_string(),
            StackSummary {
                id: id.to_string(),
                status: status.to_string(),
                config_files,
            },
        );
        Ok(())
    }

    /// Make every following `pull_and_start` fail with `message`
    pub fn fail_installs(&self, message: &str) -> Result<()> {
        set_failure(&self.install_failure, message)
    }

    /// Make every following `stop_and_remove` fail with `message`
    pub fn fail_uninstalls(&self, message: &str) -> Result<()> {
        set_failure(&self.uninstall_failure, message)
    }

    /// Number of `pull_and_start` calls so far
    pub fn install_count(&self) -> usize {
        self.installs.load(Ordering::SeqCst)
    }

    /// Number of `stop_and_remove` calls so far
    pub fn uninstall_count(&self) -> usize {
        self.uninstalls.load(Ordering::SeqCst)
    }

    fn lock_stacks(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, StackSummary>>> {
        self.stacks
            .lock()
            .map_err(|e| AppError::Engine(format!("mutex poisoned: {e}")))
    }
}

fn set_failure(slot: &Mutex<Option<String>>, message: &str) -> Result<()> {
    let mut slot = slot
        .lock()
        .map_err(|e| AppError::Engine(format!("mutex poisoned: {e}")))?;
    *slot = Some(message.to_string());
    Ok(())
}

fn injected_failure(slot: &Mutex<Option<String>>) -> Result<()> {
    let slot = slot
        .lock()
        .map_err(|e| AppError::Engine(format!("mutex poisoned: {e}")))?;
    match slot.as_ref() {
        Some(message) => Err(AppError::Engine(message.clone())),
        None => Ok(()),
    }
}

#[async_trait]
impl ComposeEngine for MockEngine {
    fn name(&self) -> &str {
        "mock"
    }

    async fn list(&self, all: bool) -> Result<Vec<StackSummary>> {
        let stacks = self.lock_stacks()?;
        Ok(stacks
            .values()
            .filter(|s| all || s.status.starts_with("running"))
            .cloned()
            .collect())
    }

    async fn pull_and_start(&self, app: &ComposeApp) -> Result<()> {
        self.installs.fetch_add(1, Ordering::SeqCst);
        injected_failure(&self.install_failure)?;

        let config_files = app.config_file.iter().cloned().collect();
        let status = format!("running({})", app.services.len());
        self.insert_stack(&app.name, &status, config_files)
    }

    async fn stop_and_remove(&self, app: &ComposeApp, delete_working_dir: bool) -> Result<()> {
        self.uninstalls.fetch_add(1, Ordering::SeqCst);
        injected_failure(&self.uninstall_failure)?;

        self.lock_stacks()?.remove(&app.name);

        if delete_working_dir {
            if let Some(dir) = app.working_dir() {
                remove_working_dir(dir).await?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_start_then_remove() {
        let engine = MockEngine::new();
        let temp = tempfile::tempdir().unwrap();
        let file = temp.path().join("docker-compose.yml");
        std::fs::write(&file, "name: demo\n").unwrap();

        let app = ComposeApp {
            name: "demo".to_string(),
            config_file: Some(file.clone()),
            ..Default::default()
        };

        engine.pull_and_start(&app).await.unwrap();
        let stacks = engine.list(false).await.unwrap();
        assert_eq!(stacks.len(), 1);
        assert_eq!(stacks[0].config_file(), Some(&file));

        engine.stop_and_remove(&app, true).await.unwrap();
        assert!(engine.list(true).await.unwrap().is_empty());
        assert!(!temp.path().exists());
        assert_eq!(engine.install_count(), 1);
        assert_eq!(engine.uninstall_count(), 1);
    }

    #[tokio::test]
    async fn test_list_filters_stopped_stacks() {
        let engine = MockEngine::new();
        engine.insert_stack("up", "running(1)", Vec::new()).unwrap();
        engine.insert_stack("down", "exited(1)", Vec::new()).unwrap();

        assert_eq!(engine.list(false).await.unwrap().len(), 1);
        assert_eq!(engine.list(true).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let engine = MockEngine::new();
        engine.fail_installs("registry unreachable").unwrap();

        let app = ComposeApp {
            name: "demo".to_string(),
            ..Default::default()
        };
        let err = engine.pull_and_start(&app).await.unwrap_err();
        assert!(err.to_string().contains("registry unreachable"));
        assert!(engine.list(true).await.unwrap().is_empty());
    }
}
