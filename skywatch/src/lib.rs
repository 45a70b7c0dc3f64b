//! Skywatch - live aircraft tracking engine
//!
//! Keeps a manufacturer's aircraft in sync with a rate-limited upstream
//! position API. Identifiers start pending, become active once live data is
//! seen, and are evicted by the sweeper when their data goes stale.

pub mod app;
pub mod cache;
pub mod catalog;
pub mod clock;
pub mod coalesce;
pub mod config;
pub mod error;
pub mod log;
pub mod scheduler;
pub mod store;
pub mod sweeper;
pub mod tracker;
pub mod types;
pub mod upstream;

use std::future::Future;
use std::pin::Pin;

pub use error::{TrackError, TrackResult};
pub use tracker::{SelectOutcome, Selection, SyncReport, Tracker, TrackerServices};
pub use types::{Icao24, Manufacturer};

/// Boxed future returned by the engine's dyn-compatible traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
