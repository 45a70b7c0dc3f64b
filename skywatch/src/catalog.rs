//! Static aircraft registry: which identifiers belong to a manufacturer.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use rusqlite::{params, Connection, Row};
use tracing::debug;

use crate::error::TrackResult;
use crate::store::SqliteDatabase;
use crate::types::{CatalogEntry, Icao24, Manufacturer};
use crate::BoxFuture;

/// Source of manufacturer fleets.
pub trait AircraftCatalog: Send + Sync {
    /// Registry entries for `manufacturer`, ordered by identifier.
    ///
    /// An unknown manufacturer yields an empty list.
    fn fleet(&self, manufacturer: Manufacturer) -> BoxFuture<'_, TrackResult<Vec<CatalogEntry>>>;

    /// Manufacturer display names known to the registry.
    fn manufacturers(&self) -> BoxFuture<'_, TrackResult<Vec<String>>>;
}

/// Catalog held in memory, keyed by canonical manufacturer.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    fleets: RwLock<BTreeMap<String, (String, Vec<CatalogEntry>)>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = CatalogEntry>) -> TrackResult<Self> {
        let catalog = Self::new();
        for entry in entries {
            catalog.insert(entry)?;
        }
        Ok(catalog)
    }

    /// Add or replace one entry.
    pub fn insert(&self, entry: CatalogEntry) -> TrackResult<()> {
        let manufacturer = Manufacturer::new(&entry.manufacturer)?;
        let mut fleets = self.fleets.write();
        let (_, fleet) = fleets
            .entry(manufacturer.key().to_string())
            .or_insert_with(|| (manufacturer.name().to_string(), Vec::new()));
        match fleet.binary_search_by_key(&entry.icao24, |e| e.icao24) {
            Ok(index) => fleet[index] = entry,
            Err(index) => fleet.insert(index, entry),
        }
        Ok(())
    }
}

impl AircraftCatalog for InMemoryCatalog {
    fn fleet(&self, manufacturer: Manufacturer) -> BoxFuture<'_, TrackResult<Vec<CatalogEntry>>> {
        Box::pin(async move {
            Ok(self
                .fleets
                .read()
                .get(manufacturer.key())
                .map(|(_, fleet)| fleet.clone())
                .unwrap_or_default())
        })
    }

    fn manufacturers(&self) -> BoxFuture<'_, TrackResult<Vec<String>>> {
        Box::pin(async move {
            Ok(self
                .fleets
                .read()
                .values()
                .map(|(name, _)| name.clone())
                .collect())
        })
    }
}

/// Catalog over the `aircraft` registry table.
///
/// Manufacturer names are trimmed and compared by [`Manufacturer::key`].
/// SQLite only folds ASCII case, so ASCII names go through the `NOCASE`
/// index and anything else is matched in Rust over a scan. Identifiers are
/// trimmed; rows whose identifier is not a valid address are skipped.
#[derive(Debug, Clone)]
pub struct SqliteCatalog {
    db: SqliteDatabase,
}

impl SqliteCatalog {
    pub fn new(db: SqliteDatabase) -> Self {
        Self { db }
    }

    /// Insert or update registry rows. Returns rows written.
    pub async fn insert_entries(&self, entries: Vec<CatalogEntry>) -> TrackResult<usize> {
        self.db
            .transaction(move |tx| {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO aircraft (icao24, manufacturer, model) VALUES (?1, ?2, ?3)
                     ON CONFLICT (icao24) DO UPDATE SET
                         manufacturer = excluded.manufacturer,
                         model = excluded.model",
                )?;
                for entry in &entries {
                    stmt.execute(params![
                        entry.icao24.to_string(),
                        entry.manufacturer,
                        entry.model
                    ])?;
                }
                Ok(entries.len())
            })
            .await
    }
}

type RegistryRow = (String, String, Option<String>);

fn registry_row(row: &Row<'_>) -> rusqlite::Result<RegistryRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

fn registry_rows(
    conn: &Connection,
    manufacturer: &Manufacturer,
) -> rusqlite::Result<Vec<RegistryRow>> {
    let rows = if manufacturer.key().is_ascii() {
        let mut stmt = conn.prepare_cached(
            "SELECT TRIM(icao24), TRIM(manufacturer), model
             FROM aircraft
             WHERE TRIM(manufacturer) = ?1 COLLATE NOCASE",
        )?;
        let rows = stmt
            .query_map(params![manufacturer.name()], registry_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows
    } else {
        let mut stmt = conn.prepare_cached(
            "SELECT TRIM(icao24), TRIM(manufacturer), model
             FROM aircraft
             WHERE manufacturer IS NOT NULL",
        )?;
        let rows = stmt
            .query_map([], registry_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows
    };
    Ok(rows
        .into_iter()
        .filter(|(_, maker, _)| {
            Manufacturer::new(maker).is_ok_and(|m| m.key() == manufacturer.key())
        })
        .collect())
}

impl AircraftCatalog for SqliteCatalog {
    fn fleet(&self, manufacturer: Manufacturer) -> BoxFuture<'_, TrackResult<Vec<CatalogEntry>>> {
        Box::pin(self.db.call(move |conn| {
            let rows = registry_rows(conn, &manufacturer)?;

            let mut fleet = Vec::with_capacity(rows.len());
            for (raw, maker, model) in rows {
                match Icao24::parse(&raw) {
                    Ok(icao24) => fleet.push(CatalogEntry::new(icao24, maker, model)),
                    Err(_) => debug!(icao24 = %raw, "Skipping malformed registry identifier"),
                }
            }
            fleet.sort_by_key(|e| e.icao24);
            Ok(fleet)
        }))
    }

    fn manufacturers(&self) -> BoxFuture<'_, TrackResult<Vec<String>>> {
        Box::pin(self.db.call(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT DISTINCT TRIM(manufacturer)
                 FROM aircraft
                 WHERE manufacturer IS NOT NULL",
            )?;
            let raw = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            // one display name per canonical key, the smallest spelling wins
            let mut names: BTreeMap<String, String> = BTreeMap::new();
            for manufacturer in raw.iter().filter_map(|name| Manufacturer::new(name).ok()) {
                names
                    .entry(manufacturer.key().to_string())
                    .and_modify(|name| {
                        if manufacturer.name() < name.as_str() {
                            *name = manufacturer.name().to_string();
                        }
                    })
                    .or_insert_with(|| manufacturer.name().to_string());
            }
            Ok(names.into_values().collect())
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: u32, maker: &str, model: &str) -> CatalogEntry {
        CatalogEntry::new(Icao24::new(id), maker, Some(model.to_string()))
    }

    #[tokio::test]
    async fn test_in_memory_fleet_is_case_insensitive() {
        let catalog = InMemoryCatalog::from_entries([
            entry(2, "Boeing", "787-9"),
            entry(1, "BOEING", "737-800"),
            entry(3, "Airbus", "A320neo"),
        ])
        .unwrap();

        let fleet = catalog
            .fleet(Manufacturer::new("boeing").unwrap())
            .await
            .unwrap();
        let ids: Vec<_> = fleet.iter().map(|e| e.icao24).collect();
        assert_eq!(ids, vec![Icao24::new(1), Icao24::new(2)]);

        let names = catalog.manufacturers().await.unwrap();
        assert_eq!(names, vec!["Airbus".to_string(), "Boeing".to_string()]);
    }

    #[tokio::test]
    async fn test_in_memory_unknown_manufacturer_is_empty() {
        let catalog = InMemoryCatalog::new();
        let fleet = catalog
            .fleet(Manufacturer::new("Zeppelin").unwrap())
            .await
            .unwrap();
        assert!(fleet.is_empty());
    }

    #[tokio::test]
    async fn test_sqlite_fleet_trims_and_skips_malformed() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        db.call(|conn| {
            conn.execute_batch(
                "INSERT INTO aircraft (icao24, manufacturer, model) VALUES
                    (' A1B2C3 ', ' Embraer ', 'E175'),
                    ('a1b2c4', 'EMBRAER', 'E190'),
                    ('not-hex', 'Embraer', 'E195'),
                    ('c0ffee', 'Cessna', '172S');",
            )?;
            Ok(())
        })
        .await
        .unwrap();

        let catalog = SqliteCatalog::new(db);
        let fleet = catalog
            .fleet(Manufacturer::new("embraer").unwrap())
            .await
            .unwrap();
        let ids: Vec<_> = fleet.iter().map(|e| e.icao24.to_string()).collect();
        assert_eq!(ids, vec!["a1b2c3", "a1b2c4"]);
        assert_eq!(fleet[0].model.as_deref(), Some("E175"));

        let names = catalog.manufacturers().await.unwrap();
        assert_eq!(names.len(), 2);
    }

    #[tokio::test]
    async fn test_sqlite_fleet_matches_non_ascii_names() {
        let catalog = SqliteCatalog::new(SqliteDatabase::open_in_memory().unwrap());
        catalog
            .insert_entries(vec![
                entry(1, "ÉCLIPSE", "500"),
                entry(2, " Éclipse ", "550"),
                entry(3, "Eclipse", "EA-1"),
            ])
            .await
            .unwrap();

        for name in ["ÉCLIPSE", "éclipse"] {
            let fleet = catalog
                .fleet(Manufacturer::new(name).unwrap())
                .await
                .unwrap();
            let ids: Vec<_> = fleet.iter().map(|e| e.icao24).collect();
            assert_eq!(ids, vec![Icao24::new(1), Icao24::new(2)], "{name}");
        }

        let ascii = catalog
            .fleet(Manufacturer::new("ECLIPSE").unwrap())
            .await
            .unwrap();
        assert_eq!(ascii.len(), 1);

        let names = catalog.manufacturers().await.unwrap();
        assert_eq!(names, vec!["Eclipse".to_string(), "ÉCLIPSE".to_string()]);
    }

    #[tokio::test]
    async fn test_sqlite_insert_entries_upserts() {
        let catalog = SqliteCatalog::new(SqliteDatabase::open_in_memory().unwrap());
        catalog
            .insert_entries(vec![entry(1, "Airbus", "A319"), entry(2, "Airbus", "A321")])
            .await
            .unwrap();
        catalog
            .insert_entries(vec![entry(1, "Airbus", "A319neo")])
            .await
            .unwrap();

        let fleet = catalog
            .fleet(Manufacturer::new("Airbus").unwrap())
            .await
            .unwrap();
        assert_eq!(fleet.len(), 2);
        assert_eq!(fleet[0].model.as_deref(), Some("A319neo"));
    }
}
