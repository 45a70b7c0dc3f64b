//! Skywatch CLI - track live aircraft positions for a manufacturer.

mod commands;
mod error;
mod runner;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use commands::config::ConfigCommands;
use error::CliError;
use runner::CliRunner;

#[derive(Debug, Parser)]
#[command(name = "skywatch", version, about)]
struct Cli {
    /// Config file (default: platform config dir/skywatch/config.ini)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Confirm a manufacturer's aircraft against live data once
    Sync {
        manufacturer: String,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Select a manufacturer and poll it until Ctrl-C
    Watch { manufacturer: String },

    /// Show stored active aircraft for a manufacturer
    Active {
        manufacturer: String,
        #[arg(long)]
        json: bool,
    },

    /// Drop all tracking state for a manufacturer
    Reset { manufacturer: String },

    /// Evict stale aircraft now
    Sweep,

    /// List manufacturers in the registry
    Manufacturers,

    /// Inspect the configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config_path = cli.config.as_deref();
    let command = match cli.command {
        Commands::Config(command) => return commands::config::run(command, config_path),
        command => command,
    };

    let runner = CliRunner::new(config_path, cli.verbose)?;
    match command {
        Commands::Sync { manufacturer, json } => {
            commands::sync::run_sync(&runner, &manufacturer, json)
        }
        Commands::Watch { manufacturer } => commands::watch::run(&runner, &manufacturer),
        Commands::Active { manufacturer, json } => {
            commands::sync::run_active(&runner, &manufacturer, json)
        }
        Commands::Reset { manufacturer } => commands::maintenance::run_reset(&runner, &manufacturer),
        Commands::Sweep => commands::maintenance::run_sweep(&runner),
        Commands::Manufacturers => commands::maintenance::run_manufacturers(&runner),
        Commands::Config(_) => Ok(()),
    }
}
