//! Configuration CLI commands.

use std::io::Write;
use std::path::Path;

use clap::Subcommand;
use skywatch::config::{config_file_path, ConfigFile};

use crate::error::CliError;

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Show the configuration file path
    Path,

    /// Print the effective settings as INI
    Show,

    /// Write the effective settings to the configuration file
    Init,
}

/// Run a config subcommand.
pub fn run(command: ConfigCommands, config_path: Option<&Path>) -> Result<(), CliError> {
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(config_file_path);

    match command {
        ConfigCommands::Path => {
            println!("{}", path.display());
            Ok(())
        }
        ConfigCommands::Show => {
            let config = ConfigFile::load_from(&path)?;
            let mut stdout = std::io::stdout().lock();
            config.to_ini().write_to(&mut stdout)?;
            stdout.flush()?;
            Ok(())
        }
        ConfigCommands::Init => {
            let config = ConfigFile::load_from(&path)?;
            config.save_to(&path)?;
            println!("Wrote {}", path.display());
            Ok(())
        }
    }
}
