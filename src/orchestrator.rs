//! Compose app lifecycle orchestration
//!
//! Install and uninstall are split in two phases. The synchronous phase runs
//! on the caller's task: it parses the compose text, stages the app in its
//! working directory and validates the result. Every error there is returned
//! to the caller, and a working directory created along the way is removed.
//!
//! The engine phase runs on a tracked background task and reports through
//! events only: `*Begin` first, `*Error` on failure, `*End` last. A failed
//! install leaves the app staged on disk for inspection or retry.

use crate::compose::{ComposeApp, Interpolator, StoreInfo};
use crate::config::{Config, InstallMode};
use crate::engine::{select_engine, ComposeEngine};
use crate::error::{AppError, Result};
use crate::events::{
    EventProperties, EventPublisher, EventType, PROPERTY_APP_ICON, PROPERTY_APP_NAME,
    PROPERTY_IMAGE_NAME, PROPERTY_MESSAGE,
};
use crate::workdir::WorkingDirectories;
use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Per-call context: cancellation for the synchronous phase and extra event properties
#[derive(Debug, Clone, Default)]
pub struct OperationContext {
    /// Cancels the synchronous phase; background work is not affected
    pub cancel: CancellationToken,
    /// Merged into every event of the operation
    pub properties: EventProperties,
}

impl OperationContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the given cancellation token
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Add an event property
    pub fn with_property(mut self, key: &str, value: &str) -> Self {
        self.properties.insert(key.to_string(), value.to_string());
        self
    }
}

/// Which engine operation a background task runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Install,
    Uninstall { delete_config_folder: bool },
}

impl Operation {
    fn name(&self) -> &'static str {
        match self {
            Operation::Install => "install",
            Operation::Uninstall { .. } => "uninstall",
        }
    }

    fn begin(&self) -> EventType {
        match self {
            Operation::Install => EventType::InstallBegin,
            Operation::Uninstall { .. } => EventType::UninstallBegin,
        }
    }

    fn end(&self) -> EventType {
        match self {
            Operation::Install => EventType::InstallEnd,
            Operation::Uninstall { .. } => EventType::UninstallEnd,
        }
    }

    fn failed(&self) -> EventType {
        match self {
            Operation::Install => EventType::InstallError,
            Operation::Uninstall { .. } => EventType::UninstallError,
        }
    }
}

/// Publishes the end event when dropped, so it goes out on every exit path
struct EndEvent {
    events: EventPublisher,
    operation_id: Uuid,
    event_type: EventType,
    properties: EventProperties,
}

impl Drop for EndEvent {
    fn drop(&mut self) {
        let properties = std::mem::take(&mut self.properties);
        self.events
            .publish(self.operation_id, self.event_type, properties);
    }
}

/// Installs, uninstalls and tracks compose apps
pub struct ComposeService {
    dirs: WorkingDirectories,
    interpolator: Interpolator,
    engine: Arc<dyn ComposeEngine>,
    events: EventPublisher,
    tasks: TaskTracker,
    install_mode: InstallMode,
    cleanup_on_invalid_store_info: bool,
}

impl ComposeService {
    /// Create a service with an explicit engine and event publisher
    pub fn new(
        config: &Config,
        engine: Arc<dyn ComposeEngine>,
        events: EventPublisher,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            dirs: WorkingDirectories::new(&config.apps_path, &config.compose_file_name),
            interpolator: Interpolator::new(&config.defaults)?,
            engine,
            events,
            tasks: TaskTracker::new(),
            install_mode: config.install_mode,
            cleanup_on_invalid_store_info: config.cleanup_on_invalid_store_info,
        })
    }

    /// Create a service with the engine named in the configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let engine = select_engine(config)?;
        Self::new(config, engine, EventPublisher::new(config.event_capacity))
    }

    /// Event publisher used by this service
    pub fn events(&self) -> &EventPublisher {
        &self.events
    }

    /// Engine used by this service
    pub fn engine(&self) -> &Arc<dyn ComposeEngine> {
        &self.engine
    }

    /// Working directory manager
    pub fn working_directories(&self) -> &WorkingDirectories {
        &self.dirs
    }

    /// Create the working directory of an app
    pub async fn prepare_working_directory(&self, name: &str) -> Result<PathBuf> {
        self.dirs.prepare(name).await
    }

    /// Stage a compose app and start it in the background
    ///
    /// Returns the staged app as reloaded from its persisted compose file.
    /// Engine failures are reported as `InstallError` events, unless the
    /// service runs in [`InstallMode::Wait`].
    pub async fn install(&self, compose_yaml: &str, ctx: &OperationContext) -> Result<ComposeApp> {
        let mut app = ComposeApp::from_yaml(compose_yaml, &self.interpolator)?;

        if app.stamp_store_app_id() {
            debug!("Stamped store app id for compose app {}", app.name);
        }

        let content = app.to_yaml()?;

        if ctx.cancel.is_cancelled() {
            return Err(AppError::Cancelled("install".to_string()));
        }

        // Directory creation runs on the blocking pool and completes even if
        // this future is dropped, so it is never raced against cancellation.
        let working_dir = self.dirs.prepare(&app.name).await?;
        if ctx.cancel.is_cancelled() {
            warn!(name = %app.name, "Install cancelled after creating working dir");
            self.dirs.cleanup(&working_dir).await;
            return Err(AppError::Cancelled("install".to_string()));
        }

        let staged = self.stage(&app.name, &working_dir, &content, ctx).await;
        let app = match staged {
            Ok(app) => app,
            Err(e) => {
                error!(name = %app.name, error = %e, "Failed to install compose app");
                self.dirs.cleanup(&working_dir).await;
                return Err(e);
            }
        };

        let store_info = match app.store_info() {
            Ok(info) => info,
            Err(e) => {
                error!(name = %app.name, error = %e, "Staged compose app has invalid store info");
                if self.cleanup_on_invalid_store_info {
                    self.dirs.cleanup(&working_dir).await;
                }
                return Err(e);
            }
        };

        info!("Staged compose app {} in {}", app.name, working_dir.display());

        let properties = event_properties(&app, &store_info, ctx);
        let handle = self.spawn_operation(Operation::Install, app.clone(), properties);
        self.finish(handle).await?;

        Ok(app)
    }

    /// Stop and remove a compose app in the background
    pub async fn uninstall(
        &self,
        app: &ComposeApp,
        delete_config_folder: bool,
        ctx: &OperationContext,
    ) -> Result<()> {
        let store_info = app.store_info()?;

        let mut properties = event_properties(app, &store_info, ctx);
        properties.remove(PROPERTY_IMAGE_NAME);

        let handle = self.spawn_operation(
            Operation::Uninstall {
                delete_config_folder,
            },
            app.clone(),
            properties,
        );
        self.finish(handle).await
    }

    /// Engine-reported status of a stack
    pub async fn status(&self, app_id: &str) -> Result<String> {
        let stacks = self.engine.list(true).await?;

        stacks
            .into_iter()
            .find(|stack| stack.id == app_id)
            .map(|stack| stack.status)
            .ok_or_else(|| AppError::NotFound(app_id.to_string()))
    }

    /// Every stack the engine knows, reloaded from its compose file
    ///
    /// Stacks whose compose file is missing or invalid are logged and skipped.
    pub async fn list(&self) -> Result<BTreeMap<String, ComposeApp>> {
        let stacks = self.engine.list(true).await?;
        let mut result = BTreeMap::new();

        for stack in stacks {
            let Some(config_file) = stack.config_file() else {
                warn!(id = %stack.id, "Stack has no compose file, skipping");
                continue;
            };

            match ComposeApp::load_from_file(&stack.id, config_file).await {
                Ok(app) => {
                    result.insert(stack.id.clone(), app);
                }
                Err(e) => {
                    error!(
                        path = %config_file.display(),
                        error = %e,
                        "Failed to load compose file"
                    );
                }
            }
        }

        Ok(result)
    }

    /// Load a single app by id
    ///
    /// Apps the engine does not know but that are staged on disk are loaded
    /// from their working directory, so a failed install can still be removed.
    pub async fn get(&self, app_id: &str) -> Result<ComposeApp> {
        let stacks = self.engine.list(true).await?;

        if let Some(config_file) = stacks
            .iter()
            .find(|stack| stack.id == app_id)
            .and_then(|stack| stack.config_file())
        {
            return ComposeApp::load_from_file(app_id, config_file).await;
        }

        if crate::compose::validate_app_name(app_id).is_ok() {
            let staged = self.dirs.compose_file_path(app_id);
            if tokio::fs::try_exists(&staged).await.unwrap_or(false) {
                return ComposeApp::load_from_file(app_id, &staged).await;
            }
        }

        Err(AppError::NotFound(app_id.to_string()))
    }

    /// Wait for every background task started so far
    ///
    /// Reopens the task tracker afterwards, so it must not run concurrently
    /// with [`ComposeService::shutdown`].
    pub async fn wait_idle(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    /// Stop accepting background work and wait for running tasks
    pub async fn shutdown(&self) {
        self.tasks.close();
        self.tasks.wait().await;
    }

    async fn stage(
        &self,
        name: &str,
        working_dir: &std::path::Path,
        content: &str,
        ctx: &OperationContext,
    ) -> Result<ComposeApp> {
        let path = cancellable(
            &ctx.cancel,
            "install",
            self.dirs.write_compose_file(working_dir, content),
        )
        .await?;

        cancellable(&ctx.cancel, "install", ComposeApp::load_from_file(name, &path)).await
    }

    fn spawn_operation(
        &self,
        operation: Operation,
        app: ComposeApp,
        properties: EventProperties,
    ) -> JoinHandle<Result<()>> {
        let engine = Arc::clone(&self.engine);
        let events = self.events.clone();
        let operation_id = Uuid::new_v4();
        let span = info_span!(
            "operation",
            id = %operation_id,
            kind = operation.name(),
            app = %app.name
        );

        self.tasks.spawn(
            async move {
                events.publish(operation_id, operation.begin(), properties.clone());
                let _end = EndEvent {
                    events: events.clone(),
                    operation_id,
                    event_type: operation.end(),
                    properties: properties.clone(),
                };

                let result = match operation {
                    Operation::Install => engine.pull_and_start(&app).await,
                    Operation::Uninstall {
                        delete_config_folder,
                    } => engine.stop_and_remove(&app, delete_config_folder).await,
                };

                match &result {
                    Ok(()) => info!("Compose app {} {} finished", app.name, operation.name()),
                    Err(e) => {
                        error!(name = %app.name, error = %e, "Failed to {} compose app", operation.name());
                        let mut properties = properties;
                        properties.insert(PROPERTY_MESSAGE.to_string(), e.to_string());
                        events.publish(operation_id, operation.failed(), properties);
                    }
                }

                result
            }
            .instrument(span),
        )
    }

    async fn finish(&self, handle: JoinHandle<Result<()>>) -> Result<()> {
        match self.install_mode {
            InstallMode::Detached => Ok(()),
            InstallMode::Wait => handle
                .await
                .map_err(|e| AppError::Engine(format!("Background task failed: {}", e)))?,
        }
    }
}

fn event_properties(app: &ComposeApp, store_info: &StoreInfo, ctx: &OperationContext) -> EventProperties {
    let mut properties = ctx.properties.clone();
    properties.insert(PROPERTY_APP_NAME.to_string(), app.name.clone());

    if let Some(main) = store_info.main_app_info() {
        if let Some(icon) = &main.icon {
            properties.insert(PROPERTY_APP_ICON.to_string(), icon.clone());
        }
        if let Some(image) = &main.image {
            properties.insert(PROPERTY_IMAGE_NAME.to_string(), image.clone());
        }
    }

    properties
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    operation: &str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AppError::Cancelled(operation.to_string())),
        result = fut => result,
    }
}

/// Host architecture in container image platform naming
pub fn architecture() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "arm" => "arm",
        "x86" => "386",
        "powerpc64" => "ppc64le",
        "s390x" => "s390x",
        "riscv64" => "riscv64",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MockEngine;
    use crate::events::Event;
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio::sync::broadcast;

    const DEMO: &str = r#"
name: demo
services:
  web:
    image: demo:latest
    x-appstack:
      icon: https://example.com/demo.png
x-appstack:
  main: web
"#;

    fn service(root: &std::path::Path, mode: InstallMode) -> (ComposeService, Arc<MockEngine>) {
        let mut config = Config::with_apps_path(root);
        config.install_mode = mode;
        let engine = Arc::new(MockEngine::new());
        let service =
            ComposeService::new(&config, engine.clone(), EventPublisher::new(64)).unwrap();
        (service, engine)
    }

    async fn next_event(rx: &mut broadcast::Receiver<Event>) -> Event {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for event")
            .unwrap()
    }

    #[tokio::test]
    async fn test_install_stages_and_starts() {
        let temp = tempdir().unwrap();
        let (service, engine) = service(temp.path(), InstallMode::Detached);
        let mut rx = service.events().subscribe();

        let app = service.install(DEMO, &OperationContext::new()).await.unwrap();
        assert_eq!(app.name, "demo");
        assert_eq!(app.store_app_id(), Some("demo"));
        assert!(temp.path().join("demo").join("docker-compose.yml").exists());

        let begin = next_event(&mut rx).await;
        let end = next_event(&mut rx).await;
        assert_eq!(begin.event_type, EventType::InstallBegin);
        assert_eq!(end.event_type, EventType::InstallEnd);
        assert_eq!(begin.operation_id, end.operation_id);
        assert_eq!(
            begin.properties.get(PROPERTY_APP_ICON).map(String::as_str),
            Some("https://example.com/demo.png")
        );
        assert_eq!(
            begin.properties.get(PROPERTY_IMAGE_NAME).map(String::as_str),
            Some("demo:latest")
        );

        service.wait_idle().await;
        assert_eq!(engine.install_count(), 1);
        assert_eq!(service.status("demo").await.unwrap(), "running(1)");
    }

    #[tokio::test]
    async fn test_install_without_services_leaves_nothing() {
        let temp = tempdir().unwrap();
        let (service, engine) = service(temp.path(), InstallMode::Detached);

        let result = service
            .install("name: broken\nservices: {}\n", &OperationContext::new())
            .await;
        assert!(matches!(result, Err(AppError::NoAppFound)));
        assert!(!temp.path().join("broken").exists());

        service.wait_idle().await;
        assert_eq!(engine.install_count(), 0);
    }

    #[tokio::test]
    async fn test_install_keeps_existing_store_app_id() {
        let temp = tempdir().unwrap();
        let (service, _engine) = service(temp.path(), InstallMode::Detached);
        let yaml = format!("{}  store_app_id: upstream-demo\n", DEMO);

        let app = service.install(&yaml, &OperationContext::new()).await.unwrap();
        assert_eq!(app.store_app_id(), Some("upstream-demo"));

        let text = std::fs::read_to_string(temp.path().join("demo/docker-compose.yml")).unwrap();
        assert!(text.contains("store_app_id: upstream-demo"));
    }

    #[tokio::test]
    async fn test_engine_failure_is_reported_as_event() {
        let temp = tempdir().unwrap();
        let (service, engine) = service(temp.path(), InstallMode::Detached);
        engine.fail_installs("pull access denied").unwrap();
        let mut rx = service.events().subscribe();

        service.install(DEMO, &OperationContext::new()).await.unwrap();

        let kinds: Vec<EventType> = vec![
            next_event(&mut rx).await.event_type,
            next_event(&mut rx).await.event_type,
            next_event(&mut rx).await.event_type,
        ];
        assert_eq!(
            kinds,
            vec![EventType::InstallBegin, EventType::InstallError, EventType::InstallEnd]
        );

        // staged app stays on disk
        assert!(temp.path().join("demo").join("docker-compose.yml").exists());
        assert!(matches!(service.status("demo").await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_wait_mode_returns_engine_error() {
        let temp = tempdir().unwrap();
        let (service, engine) = service(temp.path(), InstallMode::Wait);
        engine.fail_installs("no space left on device").unwrap();

        let result = service.install(DEMO, &OperationContext::new()).await;
        assert!(matches!(result, Err(AppError::Engine(ref m)) if m.contains("no space left")));
    }

    #[tokio::test]
    async fn test_cancelled_install_does_not_stage() {
        let temp = tempdir().unwrap();
        let (service, engine) = service(temp.path(), InstallMode::Detached);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let ctx = OperationContext::new().with_cancel(cancel);
        let result = service.install(DEMO, &ctx).await;
        assert!(matches!(result, Err(AppError::Cancelled(_))));
        assert!(!temp.path().join("demo").exists());
        assert_eq!(engine.install_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_during_install_removes_working_dir() {
        let temp = tempdir().unwrap();
        let (service, engine) = service(temp.path(), InstallMode::Detached);
        let cancel = CancellationToken::new();

        // runs at the first yield point inside install
        let trigger = cancel.clone();
        tokio::spawn(async move { trigger.cancel() });

        let ctx = OperationContext::new().with_cancel(cancel);
        let result = service.install(DEMO, &ctx).await;
        assert!(matches!(result, Err(AppError::Cancelled(_))));
        assert!(!temp.path().join("demo").exists());

        service.wait_idle().await;
        assert_eq!(engine.install_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_write_removes_working_dir() {
        let temp = tempdir().unwrap();
        let (service, engine) = service(temp.path(), InstallMode::Detached);
        std::fs::create_dir_all(temp.path().join("demo").join("docker-compose.yml")).unwrap();

        let result = service.install(DEMO, &OperationContext::new()).await;
        assert!(matches!(result, Err(AppError::DirectoryProvisioning { .. })));
        assert!(!temp.path().join("demo").exists());

        service.wait_idle().await;
        assert_eq!(engine.install_count(), 0);
    }

    #[tokio::test]
    async fn test_uninstall_removes_working_dir() {
        let temp = tempdir().unwrap();
        let (service, engine) = service(temp.path(), InstallMode::Detached);

        service.install(DEMO, &OperationContext::new()).await.unwrap();
        service.wait_idle().await;

        let mut rx = service.events().subscribe();
        let app = service.get("demo").await.unwrap();
        let ctx = OperationContext::new().with_property("request:id", "42");
        service.uninstall(&app, true, &ctx).await.unwrap();

        let begin = next_event(&mut rx).await;
        let end = next_event(&mut rx).await;
        assert_eq!(begin.event_type, EventType::UninstallBegin);
        assert_eq!(end.event_type, EventType::UninstallEnd);
        assert_eq!(begin.properties.get("request:id").map(String::as_str), Some("42"));
        assert_eq!(begin.app_name(), Some("demo"));

        service.wait_idle().await;
        assert_eq!(engine.uninstall_count(), 1);
        assert!(!temp.path().join("demo").exists());
    }

    #[tokio::test]
    async fn test_uninstall_rejects_app_without_services() {
        let temp = tempdir().unwrap();
        let (service, engine) = service(temp.path(), InstallMode::Detached);
        let app = ComposeApp {
            name: "empty".to_string(),
            ..Default::default()
        };

        let result = service.uninstall(&app, false, &OperationContext::new()).await;
        assert!(matches!(result, Err(AppError::NoAppFound)));
        service.wait_idle().await;
        assert_eq!(engine.uninstall_count(), 0);
    }

    #[tokio::test]
    async fn test_list_skips_broken_stacks() {
        let temp = tempdir().unwrap();
        let (service, engine) = service(temp.path(), InstallMode::Detached);

        service.install(DEMO, &OperationContext::new()).await.unwrap();
        service.wait_idle().await;

        let corrupt = temp.path().join("corrupt.yml");
        std::fs::write(&corrupt, "services: [oops").unwrap();
        engine.insert_stack("corrupt", "running(1)", vec![corrupt]).unwrap();
        engine
            .insert_stack("missing", "exited(1)", vec![temp.path().join("missing.yml")])
            .unwrap();

        let apps = service.list().await.unwrap();
        assert_eq!(apps.len(), 1);
        assert!(apps.contains_key("demo"));
    }

    #[tokio::test]
    async fn test_get_falls_back_to_staged_app() {
        let temp = tempdir().unwrap();
        let (service, engine) = service(temp.path(), InstallMode::Detached);
        engine.fail_installs("boom").unwrap();

        service.install(DEMO, &OperationContext::new()).await.unwrap();
        service.wait_idle().await;

        let app = service.get("demo").await.unwrap();
        assert_eq!(app.name, "demo");
        assert!(matches!(service.get("other").await, Err(AppError::NotFound(_))));
    }

    #[test]
    fn test_architecture_is_known() {
        assert!(!architecture().is_empty());
    }
}
