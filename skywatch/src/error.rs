//! Engine error types.
//!
//! [`TrackError`] is shared by every component of the engine. It is `Clone` so
//! that all callers attached to one coalesced request observe the same error.

use std::time::Duration;

use thiserror::Error;

/// Result type for engine operations.
pub type TrackResult<T> = Result<T, TrackError>;

/// Errors surfaced by the tracking engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrackError {
    /// The upstream call did not finish within the request timeout.
    #[error("upstream request timed out after {0:?}")]
    UpstreamTimeout(Duration),

    /// A local ceiling would be exceeded; the call never left the process.
    #[error("upstream rate limit reached locally, retry after {retry_after:?}")]
    UpstreamRateLimited {
        /// How long until a slot frees up.
        retry_after: Duration,
    },

    /// Network failure or server-side error from the upstream API.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// A storage transaction failed and was rolled back.
    #[error("storage transaction failed: {0}")]
    StorageTransactionFailed(String),

    /// Empty manufacturer name or no known aircraft for it.
    #[error("invalid manufacturer '{0}'")]
    InvalidManufacturer(String),

    /// A string that is not a 24-bit hex aircraft address.
    #[error("invalid aircraft identifier '{0}'")]
    InvalidIdentifier(String),

    /// A background task panicked or was torn down before settling.
    #[error("background task failed: {0}")]
    TaskFailed(String),
}

impl TrackError {
    /// Whether the scheduler should retry the attempt that produced this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TrackError::UpstreamTimeout(_) | TrackError::UpstreamUnavailable(_)
        )
    }

    /// Whether the error came from the upstream collaborator (or its local guard).
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            TrackError::UpstreamTimeout(_)
                | TrackError::UpstreamRateLimited { .. }
                | TrackError::UpstreamUnavailable(_)
        )
    }
}

impl From<rusqlite::Error> for TrackError {
    fn from(e: rusqlite::Error) -> Self {
        TrackError::StorageTransactionFailed(e.to_string())
    }
}
