//! `sync` and `active` commands.

use skywatch::types::TrackedAircraftRecord;
use skywatch::{Manufacturer, SyncReport};

use crate::error::CliError;
use crate::runner::CliRunner;

/// Run one sync and print the outcome.
pub fn run_sync(runner: &CliRunner, manufacturer: &str, json: bool) -> Result<(), CliError> {
    let manufacturer = Manufacturer::new(manufacturer)?;
    runner.log_startup("sync");

    let report = runner.run(|app| async move {
        Ok::<_, CliError>(app.tracker().sync(&manufacturer).await?)
    })?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

/// Print the stored active set without contacting the upstream.
pub fn run_active(runner: &CliRunner, manufacturer: &str, json: bool) -> Result<(), CliError> {
    let manufacturer = Manufacturer::new(manufacturer)?;
    let active = runner.run(|app| async move {
        Ok::<_, CliError>(app.tracker().get_active(&manufacturer).await?)
    })?;
    if json {
        println!("{}", serde_json::to_string_pretty(&active)?);
    } else if active.is_empty() {
        println!("No active aircraft");
    } else {
        print_positions(&active);
    }
    Ok(())
}

pub(crate) fn print_report(report: &SyncReport) {
    println!("{}: {}", report.manufacturer, report.status());
    for warning in &report.warnings {
        println!("  warning: {warning}");
    }
    if !report.positions.is_empty() {
        println!();
        print_positions(&report.positions);
    }
}

fn print_positions(records: &[TrackedAircraftRecord]) {
    println!(
        "{:<8} {:<14} {:>9} {:>10} {:>8} {:>6} {:>12}",
        "ICAO24", "MODEL", "LAT", "LON", "ALT(m)", "GND", "LAST SEEN"
    );
    for r in records {
        let altitude = r
            .position
            .altitude
            .map(|a| format!("{a:.0}"))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<8} {:<14} {:>9.4} {:>10.4} {:>8} {:>6} {:>12}",
            r.icao24,
            r.model.as_deref().unwrap_or("-"),
            r.position.latitude,
            r.position.longitude,
            altitude,
            if r.on_ground { "yes" } else { "no" },
            r.last_contact
        );
    }
}
