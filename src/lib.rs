//! appstack - compose application lifecycle manager
//!
//! appstack installs, uninstalls and tracks multi-container compose
//! applications on a single host:
//!
//! - Interpolation of host defaults into compose files
//! - Per-app working directories holding the persisted compose file
//! - Install/uninstall orchestration with background engine tasks
//! - Lifecycle events on a broadcast channel
//! - Container engine adapters (`docker compose`, in-memory mock)

pub mod compose;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod workdir;

pub use config::Config;
pub use error::{AppError, Result};
pub use orchestrator::{ComposeService, OperationContext};
