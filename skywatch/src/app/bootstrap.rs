use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::AppError;
use crate::catalog::{AircraftCatalog, SqliteCatalog};
use crate::clock::SystemClock;
use crate::config::{ConfigFile, EngineConfig};
use crate::store::{SqliteDatabase, SqliteTrackingStore};
use crate::sweeper::StalenessSweeper;
use crate::tracker::{Selection, Tracker, TrackerServices};
use crate::upstream::HttpPositionSource;

/// Running engine: tracker, selection and sweeper daemon.
pub struct SkywatchApp {
    tracker: Tracker,
    selection: Arc<Selection>,
    sweeper: Arc<StalenessSweeper>,
    catalog: Arc<dyn AircraftCatalog>,
    shutdown: CancellationToken,
    sweeper_handle: Option<JoinHandle<()>>,
}

impl SkywatchApp {
    /// Build the engine over the given services and start the sweeper.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn start(config: EngineConfig, services: TrackerServices) -> Result<Self, AppError> {
        config.validate()?;

        let sweeper = Arc::new(StalenessSweeper::new(
            &config.sweeper,
            Arc::clone(&services.store),
            Arc::clone(&services.clock),
        ));
        let catalog = Arc::clone(&services.catalog);
        let tracker = Tracker::new(&config, services);
        let selection = Arc::new(Selection::new(tracker.clone()));

        let shutdown = CancellationToken::new();
        let sweeper_handle = Arc::clone(&sweeper).spawn(shutdown.clone());

        info!(
            requests_per_minute = config.scheduler.requests_per_minute,
            requests_per_day = config.scheduler.requests_per_day,
            batch_size = config.tracker.batch_size,
            "Skywatch engine started"
        );

        Ok(Self {
            tracker,
            selection,
            sweeper,
            catalog,
            shutdown,
            sweeper_handle: Some(sweeper_handle),
        })
    }

    /// Wire the SQLite database and HTTP upstream from a loaded config file.
    pub async fn open(file: &ConfigFile) -> Result<Self, AppError> {
        let db = SqliteDatabase::open(&file.storage.database_path)?;
        let source =
            HttpPositionSource::new(&file.upstream, file.engine.scheduler.request_timeout)?;
        info!(
            database = %file.storage.database_path.display(),
            upstream = %source.states_url(),
            "Opening tracking database"
        );

        let services = TrackerServices {
            catalog: Arc::new(SqliteCatalog::new(db.clone())),
            source: Arc::new(source),
            store: Arc::new(SqliteTrackingStore::new(db)),
            clock: Arc::new(SystemClock),
        };
        Self::start(file.engine.clone(), services).await
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    pub fn selection(&self) -> &Arc<Selection> {
        &self.selection
    }

    pub fn sweeper(&self) -> &Arc<StalenessSweeper> {
        &self.sweeper
    }

    pub fn catalog(&self) -> &Arc<dyn AircraftCatalog> {
        &self.catalog
    }

    /// Stop the sweeper daemon and wait for it to exit.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(handle) = self.sweeper_handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Sweeper task did not exit cleanly");
            }
        }
        info!("Skywatch engine stopped");
    }
}

impl Drop for SkywatchApp {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
