mod accounts;
mod jobs;
mod maintenance;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use swarm_engine::{SwarmConfig, SwarmEngine, SwarmStore};
use swarm_model::Failure;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "swarm.yaml";

#[derive(Parser)]
#[command(name = "swarm", about = "Distributed test-run coordination")]
struct Cli {
    /// YAML configuration file (target groups, heartbeat, storage)
    #[arg(long, global = true, env = "SWARM_CONFIG")]
    config: Option<PathBuf>,
    /// SQLite database; overrides `storage.database` from the configuration
    #[arg(long, global = true, env = "SWARM_DB")]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema
    Init,
    /// Register a submitter account
    Account(accounts::AccountCmd),
    /// Submit a job and fan it out over the requested target groups
    Submit(jobs::SubmitCmd),
    /// Recover stale leases and sweep orphaned rows
    Cleanup,
    /// Enforce the retention window for one submitter
    Reap(jobs::ReapCmd),
    /// List configured target groups
    Groups,
    /// Show table counts, or one job with its runs and assignments
    Status(jobs::StatusCmd),
}

/// Resolved configuration and database location shared by every command.
pub struct Workspace {
    pub config: SwarmConfig,
    pub database: PathBuf,
}

impl Workspace {
    fn resolve(config: Option<PathBuf>, db: Option<PathBuf>) -> Result<Self> {
        let config = match config {
            Some(path) => SwarmConfig::load(&path)?,
            None if Path::new(DEFAULT_CONFIG).exists() => {
                SwarmConfig::load(Path::new(DEFAULT_CONFIG))?
            }
            None => {
                debug!("no {DEFAULT_CONFIG} found; using built-in defaults");
                SwarmConfig::default()
            }
        };
        let database = db.unwrap_or_else(|| config.storage.database.clone());
        Ok(Self { config, database })
    }

    pub fn open_store(&self) -> Result<SwarmStore> {
        SwarmStore::open(&self.database)
            .with_context(|| format!("opening database {}", self.database.display()))
    }

    pub fn engine(&self) -> Result<SwarmEngine<SwarmConfig>> {
        Ok(SwarmEngine::from_config(self.config.clone(), self.open_store()?))
    }
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let workspace = Workspace::resolve(cli.config, cli.db)?;

    match cli.command {
        Commands::Init => {
            workspace.open_store()?;
            info!("database ready at {}", workspace.database.display());
            emit(&json!({ "database": workspace.database.display().to_string() }))?;
        }
        Commands::Account(cmd) => accounts::run(&workspace, cmd)?,
        Commands::Submit(cmd) => jobs::submit(&workspace, cmd)?,
        Commands::Cleanup => maintenance::cleanup(&workspace)?,
        Commands::Reap(cmd) => jobs::reap(&workspace, cmd)?,
        Commands::Groups => emit(&workspace.config.target_groups)?,
        Commands::Status(cmd) => jobs::status(&workspace, cmd)?,
    }

    Ok(())
}

fn init_tracing() {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .with_target(false);
    if std::env::var("SWARM_LOG_FORMAT").as_deref() == Ok("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Prints a value as pretty JSON on stdout.
pub fn emit<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Prints the failure payload and turns it into the process error.
pub fn reject(failure: Failure) -> anyhow::Error {
    let summary = format!("{}: {}", failure.kind, failure.message);
    match emit(&json!({ "error": failure })) {
        Ok(()) => anyhow!(summary),
        Err(err) => err.context(summary),
    }
}
