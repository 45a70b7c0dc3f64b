//! `reset`, `sweep` and `manufacturers` commands.

use skywatch::Manufacturer;

use crate::error::CliError;
use crate::runner::CliRunner;

/// Drop all tracking state for a manufacturer.
pub fn run_reset(runner: &CliRunner, manufacturer: &str) -> Result<(), CliError> {
    let manufacturer = Manufacturer::new(manufacturer)?;
    runner.log_startup("reset");

    let removed = runner.run(|app| async move {
        Ok::<_, CliError>(app.tracker().reset_manufacturer(&manufacturer).await?)
    })?;
    println!("Removed {removed} tracked aircraft");
    Ok(())
}

/// Run one staleness sweep now.
pub fn run_sweep(runner: &CliRunner) -> Result<(), CliError> {
    runner.log_startup("sweep");

    let report = runner.run(|app| async move {
        Ok::<_, CliError>(app.sweeper().sweep().await?)
    })?;
    println!(
        "Removed {} stale aircraft (last contact before {}){}",
        report.removed,
        report.threshold_epoch,
        if report.compacted { ", database compacted" } else { "" }
    );
    Ok(())
}

/// List manufacturers known to the registry.
pub fn run_manufacturers(runner: &CliRunner) -> Result<(), CliError> {
    let names = runner.run(|app| async move {
        Ok::<_, CliError>(app.catalog().manufacturers().await?)
    })?;
    if names.is_empty() {
        println!("Registry is empty");
    }
    for name in names {
        println!("{name}");
    }
    Ok(())
}
