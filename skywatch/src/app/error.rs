//! Application error types.

use thiserror::Error;

use crate::config::ConfigError;
use crate::error::TrackError;

/// Errors raised while starting the application.
#[derive(Debug, Error)]
pub enum AppError {
    /// Settings rejected by validation.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Database, catalog or upstream client could not be set up.
    #[error("failed to start engine: {0}")]
    Engine(#[from] TrackError),
}
