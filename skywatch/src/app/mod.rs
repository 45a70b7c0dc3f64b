//! Application bootstrap and lifecycle management.
//!
//! [`SkywatchApp`] builds the shared services once and owns the background
//! sweeper:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       SkywatchApp                        │
//! │                                                          │
//! │  Tracker ──► scheduler, fleet cache, coalescers, locks   │
//! │     └── Selection                                        │
//! │                                                          │
//! │  StalenessSweeper ──► daemon task (CancellationToken)    │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ```ignore
//! let app = SkywatchApp::open(&ConfigFile::load()?).await?;
//! let report = app.tracker().sync(&Manufacturer::new("Boeing")?).await?;
//! app.shutdown().await;
//! ```

mod bootstrap;
mod error;

pub use bootstrap::SkywatchApp;
pub use error::AppError;
