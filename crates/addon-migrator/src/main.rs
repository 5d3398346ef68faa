//! addon-migrate
//!
//! Migrates installed add-ons from the legacy stack service to the local
//! compose engine and inspects the local volume driver registries.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info};

use addon_common::config::DEFAULT_CONFIG_PATH;
use addon_common::{AddonConfig, AddonError, LocalVolumeDriver, Manifest, Setting, VolumeScope};
use addon_migrator::StackMigrator;

/// Gateway add-on backend migration tool
#[derive(Parser, Debug)]
#[command(name = "addon-migrate")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Log level when RUST_LOG is not set (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Migrate one add-on to the current stack format
    Migrate {
        /// Add-on name
        #[arg(long)]
        name: String,

        /// Add-on manifest (YAML)
        #[arg(long)]
        manifest: PathBuf,

        /// Settings captured from the previous version (JSON list)
        #[arg(long)]
        settings: Option<PathBuf>,

        /// Stack-format version to assume instead of reading the deployed label
        #[arg(long)]
        detected_version: Option<String>,
    },

    /// Inspect or edit a local volume driver registry
    Volumes {
        /// Volume scope
        #[arg(long, global = true, default_value = "local")]
        scope: VolumeScope,

        #[command(subcommand)]
        action: VolumeAction,
    },
}

#[derive(Subcommand, Debug)]
enum VolumeAction {
    /// List registered volumes
    List,
    /// Create and register a volume
    Create { name: String },
    /// Remove a volume and its data
    Remove { name: String },
}

fn init_logging(log_level: &str, json: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(fmt::layer().with_target(true).json())
            .init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.log_level, args.json_logs);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // Transient failures leave the add-on resumable by the next run.
            let retryable = e
                .downcast_ref::<AddonError>()
                .is_some_and(AddonError::is_retryable);
            error!(error = %format!("{:#}", e), retryable, "addon-migrate failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let config = AddonConfig::load(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;

    match args.command {
        Command::Migrate {
            name,
            manifest,
            settings,
            detected_version,
        } => {
            let manifest = Manifest::load(&manifest)?;
            let settings = match settings {
                Some(path) => load_settings(&path)?,
                None => Vec::new(),
            };

            let migrator = StackMigrator::from_config(&config);
            match detected_version {
                Some(version) => {
                    migrator
                        .migrate_stack(&name, &version, &manifest, &settings)
                        .await?
                }
                None => migrator.ensure_migrated(&name, &manifest, &settings).await?,
            }
            info!(addon = %name, "Add-on is on the current stack format");
        }
        Command::Volumes { scope, action } => {
            let driver = LocalVolumeDriver::open(&config.paths.state_dir, scope);
            match action {
                VolumeAction::List => {
                    for entry in driver.list() {
                        println!("{}\t{}", entry.name, entry.path.display());
                    }
                }
                VolumeAction::Create { name } => {
                    let path = driver.create(&name)?;
                    println!("{}", path.display());
                }
                VolumeAction::Remove { name } => driver.remove(&name)?,
            }
        }
    }

    Ok(())
}

fn load_settings(path: &Path) -> Result<Vec<Setting>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read settings {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("failed to parse settings {}", path.display()))
}
