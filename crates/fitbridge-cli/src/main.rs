mod ledger;
mod prompt;
mod sync;
mod transform;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use fitbridge_core::config::{load_config, FitbridgeConfig};

#[derive(Parser)]
#[command(
    name = "fitbridge",
    version,
    about = "Correct MyWhoosh activity files and deliver them to a fitness backend"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to fitbridge.toml config file.
    #[arg(long, global = true, default_value = "fitbridge.toml")]
    config: PathBuf,

    /// Override `[source] dir`.
    #[arg(long, global = true)]
    source_dir: Option<PathBuf>,

    /// Override `[backup] dir`.
    #[arg(long, global = true)]
    backup_dir: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    /// Account name for interactive login.
    #[arg(long, global = true, env = "FITBRIDGE_USERNAME")]
    username: Option<String>,

    /// Account password for interactive login.
    #[arg(long, global = true, env = "FITBRIDGE_PASSWORD", hide_env_values = true)]
    password: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Correct the newest activity and upload it (default).
    Sync {
        /// Print the run report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Correct one file into the backup directory without uploading.
    Transform {
        /// Activity file to correct.
        #[arg(short, long)]
        input: PathBuf,
        /// Directory for the corrected copy (default: `[backup] dir`).
        #[arg(long)]
        output_dir: Option<PathBuf>,
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// List activities already delivered.
    Ledger {
        /// Output results as JSON.
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "fitbridge failed");
            eprintln!("Error: {e:#}");
            ExitCode::from(1)
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = resolve_config(&cli.config, cli.source_dir, cli.backup_dir)?;

    match cli.command.unwrap_or(Command::Sync { json: false }) {
        Command::Sync { json } => sync::run_sync(&config, cli.username, cli.password, json),
        Command::Transform {
            input,
            output_dir,
            json,
        } => transform::run_transform(&config, &input, output_dir.as_deref(), json),
        Command::Ledger { json } => ledger::run_ledger(&config, json),
    }
}

/// Load the config file and apply command-line overrides.
fn resolve_config(
    path: &Path,
    source_dir: Option<PathBuf>,
    backup_dir: Option<PathBuf>,
) -> Result<FitbridgeConfig> {
    let mut config = load_config(path)
        .with_context(|| format!("failed to load config from {}", path.display()))?;

    if let Some(dir) = source_dir {
        config.source.dir = dir;
    }
    if let Some(dir) = backup_dir {
        config.backup.dir = dir;
    }
    Ok(config)
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}
