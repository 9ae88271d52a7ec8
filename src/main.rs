//! appstack - compose application lifecycle manager
//!
//! This is the CLI entry point for appstack.

use appstack::config::Config;
use appstack::error::Result;
use appstack::events::{Event, EventType, PROPERTY_MESSAGE};
use appstack::orchestrator::{architecture, ComposeService, OperationContext};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// appstack - manage compose applications
#[derive(Parser)]
#[command(name = "appstack")]
#[command(author = "Evoker Industries")]
#[command(version)]
#[command(about = "Install, uninstall and track compose applications", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Configuration file (YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Engine backend (docker, mock)
    #[arg(long, global = true)]
    engine: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install a compose app
    Install {
        /// Compose file, or `-` for stdin
        #[arg(default_value = "-")]
        file: PathBuf,
    },

    /// Uninstall a compose app
    Uninstall {
        /// App id
        id: String,
        /// Also delete the app's working directory
        #[arg(long)]
        delete_config: bool,
    },

    /// Show the status of a compose app
    Status {
        /// App id
        id: String,
    },

    /// List installed compose apps
    #[command(alias = "ls")]
    List {
        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// Show host information
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.debug {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(engine) = cli.engine {
        config.engine = engine;
    }

    let service = ComposeService::from_config(&config)?;

    match cli.command {
        Commands::Install { file } => {
            let content = read_input(&file)?;
            let events = service.events().subscribe();
            let printer = tokio::spawn(print_events(events));

            let ctx = OperationContext::new().with_cancel(ctrl_c_token());
            let app = service.install(&content, &ctx).await?;
            println!(
                "Staged {} in {}",
                app.name,
                service.working_directories().path_for(&app.name).display()
            );

            service.shutdown().await;
            drop(service);
            if let Err(e) = printer.await {
                tracing::warn!("Event printer failed: {}", e);
            }
        }

        Commands::Uninstall { id, delete_config } => {
            let app = service.get(&id).await?;
            let events = service.events().subscribe();
            let printer = tokio::spawn(print_events(events));

            service
                .uninstall(&app, delete_config, &OperationContext::new())
                .await?;

            service.shutdown().await;
            drop(service);
            if let Err(e) = printer.await {
                tracing::warn!("Event printer failed: {}", e);
            }
        }

        Commands::Status { id } => {
            println!("{}", service.status(&id).await?);
        }

        Commands::List { json } => {
            let apps = service.list().await?;

            if json {
                let summary: Vec<_> = apps
                    .values()
                    .map(|app| {
                        serde_json::json!({
                            "id": app.name,
                            "store_app_id": app.store_app_id(),
                            "store_info": app.store_info().ok(),
                            "config_file": app.config_file,
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("{:<24} {:<16} {}", "ID", "MAIN", "IMAGE");
                for (id, app) in &apps {
                    let info = app.store_info().ok();
                    let main = info.as_ref().map(|i| i.main_app.clone()).unwrap_or_default();
                    let image = info
                        .as_ref()
                        .and_then(|i| i.main_app_info())
                        .and_then(|m| m.image.clone())
                        .unwrap_or_default();
                    println!("{:<24} {:<16} {}", id, main, image);
                }
            }
        }

        Commands::Info => {
            println!("architecture: {}", architecture());
            println!("engine:       {}", service.engine().name());
            println!("apps path:    {}", service.working_directories().root().display());
        }
    }

    Ok(())
}

fn read_input(file: &Path) -> Result<String> {
    if file.as_os_str() == "-" {
        let mut content = String::new();
        std::io::stdin().read_to_string(&mut content)?;
        Ok(content)
    } else {
        Ok(std::fs::read_to_string(file)?)
    }
}

fn ctrl_c_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });
    cancel
}

/// Print events until the publisher goes away
async fn print_events(mut events: broadcast::Receiver<Event>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                let app = event.app_name().unwrap_or("-");
                match event.event_type {
                    EventType::InstallError | EventType::UninstallError => {
                        let message = event
                            .properties
                            .get(PROPERTY_MESSAGE)
                            .map(String::as_str)
                            .unwrap_or("");
                        eprintln!("{} {}: {}", event.event_type, app, message);
                    }
                    _ => println!("{} {}", event.event_type, app),
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("Missed {} events", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
