//! Shared setup for engine-backed commands.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use tokio::runtime::Runtime;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;

use skywatch::app::SkywatchApp;
use skywatch::config::ConfigFile;
use skywatch::log::init_logging;

use crate::error::CliError;

/// Loaded config, installed logging and a tokio runtime.
pub struct CliRunner {
    config: ConfigFile,
    runtime: Runtime,
    _log_guard: Option<WorkerGuard>,
}

impl CliRunner {
    pub fn new(config_path: Option<&Path>, verbose: bool) -> Result<Self, CliError> {
        let mut config = match config_path {
            Some(path) => ConfigFile::load_from(path)?,
            None => ConfigFile::load()?,
        };
        if verbose {
            config.log.level = "debug".to_string();
        }
        let log_guard = init_logging(&config.log);

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|e| CliError::Runtime(e.to_string()))?;

        Ok(Self {
            config,
            runtime,
            _log_guard: log_guard,
        })
    }

    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    pub fn log_startup(&self, command: &str) {
        info!(
            version = skywatch::VERSION,
            command,
            database = %self.config.storage.database_path.display(),
            "Skywatch starting"
        );
    }

    /// Open the engine, run `work` against it and shut it down.
    ///
    /// The sweeper is stopped when the last handle is dropped.
    pub fn run<T, F, Fut>(&self, work: F) -> Result<T, CliError>
    where
        F: FnOnce(SkywatchAppHandle) -> Fut,
        Fut: Future<Output = Result<T, CliError>>,
    {
        self.runtime.block_on(self.run_app(work))
    }

    async fn run_app<T, F, Fut>(&self, work: F) -> Result<T, CliError>
    where
        F: FnOnce(SkywatchAppHandle) -> Fut,
        Fut: Future<Output = Result<T, CliError>>,
    {
        let app = Arc::new(SkywatchApp::open(&self.config).await?);
        let result = work(SkywatchAppHandle(Arc::clone(&app))).await;
        if let Ok(app) = Arc::try_unwrap(app) {
            app.shutdown().await;
        }
        result
    }
}

/// Shared handle to the running engine passed to command bodies.
#[derive(Clone)]
pub struct SkywatchAppHandle(Arc<SkywatchApp>);

impl std::ops::Deref for SkywatchAppHandle {
    type Target = SkywatchApp;

    fn deref(&self) -> &SkywatchApp {
        &self.0
    }
}
