//! Upstream live-position API.
//!
//! The engine only sees [`PositionSource`]; [`HttpPositionSource`] talks to
//! an OpenSky-compatible `/states/all` endpoint.

mod http;

pub use http::{parse_states, HttpPositionSource, StatesResponse};

use crate::error::TrackResult;
use crate::types::{Icao24, Manufacturer, PositionReport};
use crate::BoxFuture;

/// Fetches live positions for a batch of identifiers.
///
/// Identifiers without live data are simply absent from the result.
/// Implementations should not retry; the scheduler owns retries.
pub trait PositionSource: Send + Sync {
    fn fetch_positions(
        &self,
        manufacturer: Manufacturer,
        ids: Vec<Icao24>,
    ) -> BoxFuture<'_, TrackResult<Vec<PositionReport>>>;
}
