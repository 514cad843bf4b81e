//! stagehand-rc - reconciliation engine command line
//!
//! - `classify <path>`: print the page type of a host path
//! - `replay <scenario.toml>`: drive a virtual host page through a scripted
//!   session, optionally serving the status API while it runs
//! - `staging list|clear`: inspect the persistent staging store

use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Parser, Subcommand};
use stagehand_common::config::{load_config, resolve_config_path, TomlConfig};
use stagehand_common::staging::{ClearTarget, SqliteStore, StagingStore};
use stagehand_common::classify;
use stagehand_rc::engine::services_from_config;
use stagehand_rc::features::default_registry;
use stagehand_rc::scenario::{replay, Scenario};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stagehand-rc", version, about = "Navigation-aware reconciliation engine")]
struct Cli {
    /// Config file (overrides STAGEHAND_CONFIG and the default location)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the page type of a host path
    Classify { path: String },
    /// Replay a scenario against a virtual host page
    Replay {
        scenario: PathBuf,
        /// Serve the status API on this port during the replay
        #[arg(long)]
        status_port: Option<u16>,
        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Inspect the persistent staging store
    Staging {
        #[command(subcommand)]
        action: StagingCommand,
    },
}

#[derive(Subcommand)]
enum StagingCommand {
    /// List staged keys
    List,
    /// Remove one key or every key with a prefix
    #[command(group(ArgGroup::new("target").required(true).args(["prefix", "key"])))]
    Clear {
        #[arg(long)]
        prefix: Option<String>,
        #[arg(long)]
        key: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Command::Classify { path } = &cli.command {
        println!("{}", classify(path));
        return Ok(());
    }

    let config = load_config(cli.config.as_deref());

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("stagehand_rc=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting stagehand-rc v{}", env!("CARGO_PKG_VERSION"));
    match resolve_config_path(cli.config.as_deref()) {
        Some(path) if path.exists() => info!("Configuration: {}", path.display()),
        _ => info!("Configuration: built-in defaults"),
    }

    match cli.command {
        Command::Classify { .. } => Ok(()),
        Command::Replay {
            scenario,
            status_port,
            json,
        } => run_replay(&config, scenario, status_port, json).await,
        Command::Staging { action } => run_staging(&config, action).await,
    }
}

async fn run_replay(
    config: &TomlConfig,
    path: PathBuf,
    status_port: Option<u16>,
    json: bool,
) -> Result<()> {
    let scenario = Scenario::load(&path)?;
    let services = services_from_config(config).await?;
    let registry = default_registry(config.tasks.clone())?;

    let report = tokio::select! {
        report = replay(&scenario, registry, services, status_port) => report?,
        _ = shutdown_signal() => {
            info!("Replay interrupted");
            return Ok(());
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Scenario:       {}", report.name);
        println!("Final location: {} ({})", report.final_location, report.page_type);
        println!("Injected nodes: {}", report.injected_nodes);
        for event_type in ["TaskApplied", "TaskSatisfied", "TaskExhausted", "StaleResultDiscarded"] {
            println!("{:<16}{}", format!("{}:", event_type), report.count(event_type));
        }
        for submission in &report.submissions {
            println!("Submission:     {}", submission);
        }
        println!();
        println!("{}", report.outline);
    }
    Ok(())
}

async fn run_staging(config: &TomlConfig, action: StagingCommand) -> Result<()> {
    let Some(database) = &config.staging.database else {
        bail!("No staging database configured ([staging] database)");
    };
    let store = SqliteStore::open(database, &config.staging.origin)
        .await
        .with_context(|| format!("Open staging database {}", database.display()))?;
    let staging = StagingStore::new(Arc::new(store));

    match action {
        StagingCommand::List => {
            for key in staging.keys().await {
                println!("{}", key);
            }
        }
        StagingCommand::Clear { prefix, key } => {
            let target = match (key, prefix) {
                (Some(key), _) => ClearTarget::Key(key),
                (None, Some(prefix)) => ClearTarget::Prefix(prefix),
                (None, None) => bail!("Either --key or --prefix is required"),
            };
            info!("Clearing {:?}", target);
            staging.clear(target).await;
        }
    }
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
