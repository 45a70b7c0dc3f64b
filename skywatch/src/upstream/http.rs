//! HTTP position source using async reqwest.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::PositionSource;
use crate::config::UpstreamConfig;
use crate::error::{TrackError, TrackResult};
use crate::types::{Icao24, Manufacturer, Position, PositionReport};
use crate::BoxFuture;

/// `GET /states/all` response body.
///
/// Each state vector is a positional array:
/// `[icao24, callsign, origin_country, time_position, last_contact,
///   longitude, latitude, baro_altitude, on_ground, velocity, true_track, ...]`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatesResponse {
    pub time: Option<i64>,
    pub states: Option<Vec<Vec<Value>>>,
}

const STATE_ICAO24: usize = 0;
const STATE_LAST_CONTACT: usize = 4;
const STATE_LONGITUDE: usize = 5;
const STATE_LATITUDE: usize = 6;
const STATE_BARO_ALTITUDE: usize = 7;
const STATE_ON_GROUND: usize = 8;
const STATE_VELOCITY: usize = 9;
const STATE_TRUE_TRACK: usize = 10;

/// Decode state vectors, skipping any without an identifier, contact time or
/// coordinates.
pub fn parse_states(response: &StatesResponse) -> Vec<PositionReport> {
    response
        .states
        .iter()
        .flatten()
        .filter_map(|state| parse_state(state))
        .collect()
}

fn parse_state(state: &[Value]) -> Option<PositionReport> {
    let icao24 = Icao24::parse(state.get(STATE_ICAO24)?.as_str()?).ok()?;
    let last_contact = state.get(STATE_LAST_CONTACT)?.as_i64()?;
    let longitude = state.get(STATE_LONGITUDE)?.as_f64()?;
    let latitude = state.get(STATE_LATITUDE)?.as_f64()?;
    let number = |index: usize| state.get(index).and_then(Value::as_f64);

    Some(PositionReport {
        icao24,
        position: Position {
            latitude,
            longitude,
            altitude: number(STATE_BARO_ALTITUDE),
            ground_speed: number(STATE_VELOCITY),
            heading: number(STATE_TRUE_TRACK),
        },
        on_ground: state
            .get(STATE_ON_GROUND)
            .and_then(Value::as_bool)
            .unwrap_or(false),
        last_contact,
    })
}

/// [`PositionSource`] over an OpenSky-compatible REST API.
#[derive(Debug, Clone)]
pub struct HttpPositionSource {
    client: reqwest::Client,
    base_url: String,
    credentials: Option<(String, Option<String>)>,
    timeout: Duration,
}

impl HttpPositionSource {
    pub fn new(config: &UpstreamConfig, timeout: Duration) -> TrackResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("skywatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                TrackError::UpstreamUnavailable(format!("failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            credentials: config
                .username
                .clone()
                .map(|user| (user, config.password.clone())),
            timeout,
        })
    }

    /// Endpoint queried by [`PositionSource::fetch_positions`].
    pub fn states_url(&self) -> String {
        format!("{}/states/all", self.base_url)
    }

    fn map_send_error(&self, e: reqwest::Error) -> TrackError {
        if e.is_timeout() {
            TrackError::UpstreamTimeout(self.timeout)
        } else {
            TrackError::UpstreamUnavailable(format!("request failed: {e}"))
        }
    }

    async fn fetch(&self, ids: Vec<Icao24>) -> TrackResult<Vec<PositionReport>> {
        let query: Vec<(&str, String)> = ids.iter().map(|id| ("icao24", id.to_string())).collect();
        let mut request = self.client.get(self.states_url()).query(&query);
        if let Some((user, password)) = &self.credentials {
            request = request.basic_auth(user, password.as_ref());
        }

        let response = request.send().await.map_err(|e| self.map_send_error(e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(TrackError::UpstreamUnavailable(format!(
                "HTTP {} from {}",
                status,
                self.states_url()
            )));
        }

        let body: StatesResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                TrackError::UpstreamTimeout(self.timeout)
            } else {
                TrackError::UpstreamUnavailable(format!("failed to decode response: {e}"))
            }
        })?;
        Ok(parse_states(&body))
    }
}

impl PositionSource for HttpPositionSource {
    fn fetch_positions(
        &self,
        manufacturer: Manufacturer,
        ids: Vec<Icao24>,
    ) -> BoxFuture<'_, TrackResult<Vec<PositionReport>>> {
        Box::pin(async move {
            let requested = ids.len();
            let reports = self.fetch(ids).await?;
            debug!(
                manufacturer = %manufacturer,
                requested,
                received = reports.len(),
                "Fetched live positions"
            );
            Ok(reports)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(body: Value) -> StatesResponse {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn test_parse_full_state_vector() {
        let body = response(json!({
            "time": 1_700_000_100,
            "states": [[
                "a1b2c3", "UAL123  ", "United States", 1_700_000_095, 1_700_000_098,
                -87.9, 41.97, 3_200.4, false, 180.2, 270.0, -5.2, null, 3_250.0, "1200", false, 0
            ]]
        }));

        let reports = parse_states(&body);
        assert_eq!(reports.len(), 1);
        let report = &reports[0];
        assert_eq!(report.icao24, Icao24::new(0xa1b2c3));
        assert_eq!(report.last_contact, 1_700_000_098);
        assert_eq!(report.position.latitude, 41.97);
        assert_eq!(report.position.longitude, -87.9);
        assert_eq!(report.position.altitude, Some(3_200.4));
        assert_eq!(report.position.ground_speed, Some(180.2));
        assert_eq!(report.position.heading, Some(270.0));
        assert!(!report.on_ground);
    }

    #[test]
    fn test_parse_skips_vectors_without_coordinates() {
        let body = response(json!({
            "time": 1,
            "states": [
                ["a1b2c3", null, "X", null, 100, null, null, null, true, null, null],
                ["bad!!!", null, "X", null, 100, 1.0, 2.0, null, true, null, null],
                ["00002a", null, "X", null, 100, 1.0, 2.0, null, true, null, null]
            ]
        }));

        let reports = parse_states(&body);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].icao24, Icao24::new(0x2a));
        assert!(reports[0].on_ground);
        assert_eq!(reports[0].position.altitude, None);
    }

    #[test]
    fn test_parse_null_states() {
        let body = response(json!({ "time": 1, "states": null }));
        assert!(parse_states(&body).is_empty());
    }

    #[test]
    fn test_states_url_strips_trailing_slash() {
        let config = UpstreamConfig {
            base_url: "http://localhost:9000/api/".to_string(),
            ..UpstreamConfig::default()
        };
        let source = HttpPositionSource::new(&config, Duration::from_secs(8)).unwrap();
        assert_eq!(source.states_url(), "http://localhost:9000/api/states/all");
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_unavailable() {
        let config = UpstreamConfig {
            // port 9 (discard) is not expected to be listening
            base_url: "http://127.0.0.1:9".to_string(),
            ..UpstreamConfig::default()
        };
        let source = HttpPositionSource::new(&config, Duration::from_secs(2)).unwrap();
        let err = source
            .fetch_positions(Manufacturer::new("Boeing").unwrap(), vec![Icao24::new(1)])
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
