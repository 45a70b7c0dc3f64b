//! CLI error types.

use thiserror::Error;

use skywatch::app::AppError;
use skywatch::config::ConfigError;
use skywatch::TrackError;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    App(#[from] AppError),

    #[error("{0}")]
    Engine(#[from] TrackError),

    #[error("failed to start runtime: {0}")]
    Runtime(String),

    #[error("failed to write output: {0}")]
    Output(#[from] std::io::Error),

    #[error("failed to encode JSON: {0}")]
    Json(#[from] serde_json::Error),
}
