//! `watch` command: select a manufacturer and keep polling it.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use skywatch::{Manufacturer, SelectOutcome};

use super::sync::print_report;
use crate::error::CliError;
use crate::runner::CliRunner;

pub fn run(runner: &CliRunner, manufacturer: &str) -> Result<(), CliError> {
    let manufacturer = Manufacturer::new(manufacturer)?;
    runner.log_startup("watch");

    let shutdown = CancellationToken::new();
    let handler_token = shutdown.clone();
    ctrlc::set_handler(move || handler_token.cancel())
        .map_err(|e| CliError::Runtime(format!("failed to install Ctrl-C handler: {e}")))?;

    runner.run(|app| async move {
        let tracker = app.tracker();
        let interval = tracker.poll_interval();

        let outcome = app.selection().select(manufacturer.clone()).await?;
        if let SelectOutcome::Applied(report) = outcome {
            print_report(&report);
        }
        println!("Polling every {}s, press Ctrl-C to stop", interval.as_secs());

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            // pending first, then re-poll what is already active
            let round = async {
                tracker.sync(&manufacturer).await?;
                tracker.refresh(&manufacturer).await
            };
            match round.await {
                Ok(report) => println!("{}: {}", report.manufacturer, report.status()),
                Err(e) if e.is_upstream() => warn!(error = %e, "Poll failed, will retry"),
                Err(e) => return Err(e.into()),
            }
        }

        info!(manufacturer = %manufacturer, "Watch stopped");
        Ok::<(), CliError>(())
    })
}
