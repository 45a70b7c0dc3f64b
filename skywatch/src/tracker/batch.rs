//! Batch splitting and report partitioning.

use std::collections::{HashMap, HashSet};

use crate::types::{Icao24, Manufacturer, PositionReport, TrackedAircraftRecord};

/// Coalescing key for one upstream batch fetch.
///
/// Identifiers are sorted and deduplicated so the same set always maps to
/// the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BatchKey {
    manufacturer: Manufacturer,
    ids: Vec<Icao24>,
}

impl BatchKey {
    pub fn new(manufacturer: Manufacturer, ids: &[Icao24]) -> Self {
        let mut ids = ids.to_vec();
        ids.sort_unstable();
        ids.dedup();
        Self { manufacturer, ids }
    }

    pub fn manufacturer(&self) -> &Manufacturer {
        &self.manufacturer
    }

    pub fn ids(&self) -> &[Icao24] {
        &self.ids
    }
}

/// Split `ids` into consecutive batches of at most `size`.
pub fn chunk(ids: &[Icao24], size: usize) -> Vec<Vec<Icao24>> {
    ids.chunks(size.max(1)).map(<[Icao24]>::to_vec).collect()
}

/// Reports of one batch split by outcome.
#[derive(Debug, Default, PartialEq)]
pub struct Partition {
    /// Identifiers with live data, ready for `confirm_batch`.
    pub confirmed: Vec<TrackedAircraftRecord>,
    /// Requested identifiers the upstream returned nothing for.
    pub absent: Vec<Icao24>,
}

/// Match upstream reports against the requested batch.
///
/// Reports for identifiers outside the batch are ignored. When an
/// identifier is reported more than once the latest `last_contact` wins.
pub fn partition(
    manufacturer: &Manufacturer,
    requested: &[Icao24],
    reports: &[PositionReport],
    models: &HashMap<Icao24, Option<String>>,
    now_epoch: i64,
) -> Partition {
    let wanted: HashSet<Icao24> = requested.iter().copied().collect();

    let mut latest: HashMap<Icao24, &PositionReport> = HashMap::new();
    for report in reports.iter().filter(|r| wanted.contains(&r.icao24)) {
        latest
            .entry(report.icao24)
            .and_modify(|seen| {
                if report.last_contact > seen.last_contact {
                    *seen = report;
                }
            })
            .or_insert(report);
    }

    let mut confirmed: Vec<TrackedAircraftRecord> = latest
        .into_values()
        .map(|report| TrackedAircraftRecord {
            icao24: report.icao24,
            manufacturer: manufacturer.clone(),
            model: models.get(&report.icao24).cloned().flatten(),
            position: report.position,
            on_ground: report.on_ground,
            last_contact: report.last_contact,
            updated_at: now_epoch,
        })
        .collect();
    confirmed.sort_by_key(|r| r.icao24);

    let seen: HashSet<Icao24> = confirmed.iter().map(|r| r.icao24).collect();
    let mut absent: Vec<Icao24> = wanted.into_iter().filter(|id| !seen.contains(id)).collect();
    absent.sort_unstable();

    Partition { confirmed, absent }
}
