//! Core data types for aircraft tracking.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TrackError;

/// ICAO 24-bit aircraft address.
///
/// Textual form is six lowercase hex digits (`"a1b2c3"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Icao24(u32);

impl Icao24 {
    pub const fn new(addr: u32) -> Self {
        Self(addr & 0x00FF_FFFF)
    }

    pub const fn raw(&self) -> u32 {
        self.0
    }

    /// Parse an address, trimming surrounding whitespace.
    pub fn parse(s: &str) -> Result<Self, TrackError> {
        let trimmed = s.trim();
        if trimmed.len() != 6 || !trimmed.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(TrackError::InvalidIdentifier(s.to_string()));
        }
        u32::from_str_radix(trimmed, 16)
            .map(Self::new)
            .map_err(|_| TrackError::InvalidIdentifier(s.to_string()))
    }
}

impl fmt::Display for Icao24 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06x}", self.0)
    }
}

impl FromStr for Icao24 {
    type Err = TrackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Icao24 {
    type Error = TrackError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Icao24> for String {
    fn from(id: Icao24) -> Self {
        id.to_string()
    }
}

/// Manufacturer tag selected by the user.
///
/// Compares by a canonical lowercase form, so `"Boeing"` and `" BOEING "` name
/// the same manufacturer. [`Manufacturer::name`] keeps the trimmed input.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Manufacturer {
    name: String,
    key: String,
}

impl Manufacturer {
    pub fn new(name: impl AsRef<str>) -> Result<Self, TrackError> {
        let trimmed = name.as_ref().trim();
        if trimmed.is_empty() {
            return Err(TrackError::InvalidManufacturer(name.as_ref().to_string()));
        }
        Ok(Self {
            name: trimmed.to_string(),
            key: trimmed.to_lowercase(),
        })
    }

    /// Display name (trimmed input).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Canonical lowercase key used for lookups and storage.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl PartialEq for Manufacturer {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Manufacturer {}

impl Hash for Manufacturer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Display for Manufacturer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl TryFrom<String> for Manufacturer {
    type Error = TrackError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<Manufacturer> for String {
    fn from(m: Manufacturer) -> Self {
        m.name
    }
}

/// Geographic fix reported by the upstream API.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Altitude in metres.
    pub altitude: Option<f64>,
    /// Ground speed in m/s.
    pub ground_speed: Option<f64>,
    /// Heading in degrees true.
    pub heading: Option<f64>,
}

impl Position {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude: None,
            ground_speed: None,
            heading: None,
        }
    }
}

/// One live position record returned by the upstream API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionReport {
    pub icao24: Icao24,
    pub position: Position,
    pub on_ground: bool,
    /// Epoch seconds of the last message received from the aircraft.
    pub last_contact: i64,
}

/// Registry entry naming one aircraft of a manufacturer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub icao24: Icao24,
    pub manufacturer: String,
    pub model: Option<String>,
}

impl CatalogEntry {
    pub fn new(icao24: Icao24, manufacturer: impl Into<String>, model: Option<String>) -> Self {
        Self {
            icao24,
            manufacturer: manufacturer.into(),
            model,
        }
    }
}

/// Row of the `active` set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedAircraftRecord {
    pub icao24: Icao24,
    pub manufacturer: Manufacturer,
    pub model: Option<String>,
    pub position: Position,
    pub on_ground: bool,
    /// Epoch seconds of the last confirmed report.
    pub last_contact: i64,
    /// Epoch seconds of the last write.
    pub updated_at: i64,
}

/// Row of the `pending` set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAircraftRecord {
    pub icao24: Icao24,
    pub manufacturer: Manufacturer,
    /// Epoch seconds when the identifier was queued.
    pub enqueued_at: i64,
}

/// Live data attached to an active aircraft.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveFix {
    pub position: Position,
    pub on_ground: bool,
    pub last_contact: i64,
    pub updated_at: i64,
}

/// Tracking phase of one identifier.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackingState {
    /// Known to exist, not yet confirmed live.
    Pending { enqueued_at: i64 },
    /// Confirmed live by at least one upstream report.
    Active(ActiveFix),
}

/// One tracked identifier together with its phase.
///
/// The phase lives in a single tag, so an identifier is never pending and
/// active at the same time.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedAircraft {
    pub icao24: Icao24,
    pub manufacturer: Manufacturer,
    pub model: Option<String>,
    pub state: TrackingState,
}

impl TrackedAircraft {
    /// `unknown -> pending`.
    pub fn pending(icao24: Icao24, manufacturer: Manufacturer, enqueued_at: i64) -> Self {
        Self {
            icao24,
            manufacturer,
            model: None,
            state: TrackingState::Pending { enqueued_at },
        }
    }

    /// Build an active entry straight from a record.
    pub fn from_record(record: TrackedAircraftRecord) -> Self {
        Self {
            icao24: record.icao24,
            manufacturer: record.manufacturer,
            model: record.model,
            state: TrackingState::Active(ActiveFix {
                position: record.position,
                on_ground: record.on_ground,
                last_contact: record.last_contact,
                updated_at: record.updated_at,
            }),
        }
    }

    /// `pending -> active` or `active -> active`.
    ///
    /// A missing model on the incoming record keeps the known one.
    pub fn confirm(self, record: TrackedAircraftRecord) -> Self {
        let model = record.model.clone().or(self.model);
        let mut next = Self::from_record(record);
        next.model = model;
        next
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, TrackingState::Active(_))
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, TrackingState::Pending { .. })
    }

    /// Active and silent for longer than allowed: `last_contact < threshold_epoch`.
    pub fn is_stale(&self, threshold_epoch: i64) -> bool {
        match &self.state {
            TrackingState::Active(fix) => fix.last_contact < threshold_epoch,
            TrackingState::Pending { .. } => false,
        }
    }

    pub fn as_active_record(&self) -> Option<TrackedAircraftRecord> {
        match &self.state {
            TrackingState::Active(fix) => Some(TrackedAircraftRecord {
                icao24: self.icao24,
                manufacturer: self.manufacturer.clone(),
                model: self.model.clone(),
                position: fix.position,
                on_ground: fix.on_ground,
                last_contact: fix.last_contact,
                updated_at: fix.updated_at,
            }),
            TrackingState::Pending { .. } => None,
        }
    }

    pub fn as_pending_record(&self) -> Option<PendingAircraftRecord> {
        match &self.state {
            TrackingState::Pending { enqueued_at } => Some(PendingAircraftRecord {
                icao24: self.icao24,
                manufacturer: self.manufacturer.clone(),
                enqueued_at: *enqueued_at,
            }),
            TrackingState::Active(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boeing() -> Manufacturer {
        Manufacturer::new("Boeing").unwrap()
    }

    fn record(id: u32, last_contact: i64) -> TrackedAircraftRecord {
        TrackedAircraftRecord {
            icao24: Icao24::new(id),
            manufacturer: boeing(),
            model: Some("737-800".to_string()),
            position: Position::new(47.45, -122.3),
            on_ground: false,
            last_contact,
            updated_at: last_contact,
        }
    }

    #[test]
    fn test_icao24_parse_trims_and_lowercases() {
        let id = Icao24::parse("  A1B2C3 ").unwrap();
        assert_eq!(id.raw(), 0xa1b2c3);
        assert_eq!(id.to_string(), "a1b2c3");
    }

    #[test]
    fn test_icao24_display_pads() {
        assert_eq!(Icao24::new(0x00_00_2a).to_string(), "00002a");
    }

    #[test]
    fn test_icao24_rejects_malformed() {
        for bad in ["", "abc", "a1b2c3d", "zzzzzz", "+1b2c3"] {
            assert!(
                matches!(Icao24::parse(bad), Err(TrackError::InvalidIdentifier(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_icao24_serde_as_string() {
        let id = Icao24::new(0xabcdef);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"abcdef\"");
        let back: Icao24 = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_manufacturer_canonical_equality() {
        let a = Manufacturer::new("Boeing").unwrap();
        let b = Manufacturer::new("  BOEING ").unwrap();
        assert_eq!(a, b);
        assert_eq!(b.name(), "BOEING");
        assert_eq!(b.key(), "boeing");
    }

    #[test]
    fn test_manufacturer_rejects_blank() {
        assert!(matches!(
            Manufacturer::new("   "),
            Err(TrackError::InvalidManufacturer(_))
        ));
    }

    #[test]
    fn test_pending_to_active_transition() {
        let pending = TrackedAircraft::pending(Icao24::new(1), boeing(), 100);
        assert!(pending.is_pending());
        assert!(pending.as_active_record().is_none());

        let active = pending.confirm(record(1, 200));
        assert!(active.is_active());
        assert!(active.as_pending_record().is_none());
        assert_eq!(active.as_active_record().unwrap().last_contact, 200);
    }

    #[test]
    fn test_confirm_keeps_known_model() {
        let mut first = record(1, 200);
        first.model = Some("787-9".to_string());
        let active = TrackedAircraft::from_record(first);

        let mut refresh = record(1, 300);
        refresh.model = None;
        let refreshed = active.confirm(refresh);
        assert_eq!(refreshed.model.as_deref(), Some("787-9"));
    }

    #[test]
    fn test_staleness_only_applies_to_active() {
        let pending = TrackedAircraft::pending(Icao24::new(1), boeing(), 0);
        assert!(!pending.is_stale(i64::MAX));

        let active = TrackedAircraft::from_record(record(1, 1_000));
        assert!(active.is_stale(1_001));
        assert!(!active.is_stale(1_000));
    }
}
