//! SQLite-backed [`TrackingStore`].
//!
//! One connection behind a mutex; every call runs on the blocking pool.
//! Batch writes run inside a single `rusqlite::Transaction`, which rolls
//! back if dropped before commit.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use tracing::{debug, info};

use super::TrackingStore;
use crate::error::{TrackError, TrackResult};
use crate::types::{
    Icao24, Manufacturer, PendingAircraftRecord, Position, TrackedAircraftRecord,
};
use crate::BoxFuture;

/// How long a statement waits on a locked database.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const PRAGMAS: &str = "
PRAGMA foreign_keys = ON;
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA temp_store = MEMORY;
";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS aircraft (
    id INTEGER PRIMARY KEY,
    icao24 TEXT NOT NULL UNIQUE,
    manufacturer TEXT,
    model TEXT,
    registration TEXT,
    operator TEXT
);
DROP INDEX IF EXISTS idx_aircraft_manufacturer;
CREATE INDEX IF NOT EXISTS idx_aircraft_manufacturer_nocase
    ON aircraft (TRIM(manufacturer) COLLATE NOCASE);

CREATE TABLE IF NOT EXISTS active_aircraft (
    icao24 TEXT PRIMARY KEY,
    manufacturer TEXT NOT NULL,
    manufacturer_key TEXT NOT NULL,
    model TEXT,
    latitude REAL NOT NULL,
    longitude REAL NOT NULL,
    altitude REAL,
    ground_speed REAL,
    heading REAL,
    on_ground INTEGER NOT NULL,
    last_contact INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_active_manufacturer ON active_aircraft (manufacturer_key);
CREATE INDEX IF NOT EXISTS idx_active_last_contact ON active_aircraft (last_contact);

CREATE TABLE IF NOT EXISTS pending_aircraft (
    icao24 TEXT PRIMARY KEY,
    manufacturer TEXT NOT NULL,
    manufacturer_key TEXT NOT NULL,
    enqueued_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_pending_manufacturer ON pending_aircraft (manufacturer_key);
";

const UPSERT_ACTIVE: &str = "
INSERT INTO active_aircraft (
    icao24, manufacturer, manufacturer_key, model,
    latitude, longitude, altitude, ground_speed, heading,
    on_ground, last_contact, updated_at
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
ON CONFLICT (icao24) DO UPDATE SET
    manufacturer = excluded.manufacturer,
    manufacturer_key = excluded.manufacturer_key,
    model = COALESCE(excluded.model, active_aircraft.model),
    latitude = excluded.latitude,
    longitude = excluded.longitude,
    altitude = excluded.altitude,
    ground_speed = excluded.ground_speed,
    heading = excluded.heading,
    on_ground = excluded.on_ground,
    last_contact = excluded.last_contact,
    updated_at = excluded.updated_at
";

/// Shared SQLite connection with the engine's pragmas and schema applied.
#[derive(Clone)]
pub struct SqliteDatabase {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteDatabase").finish_non_exhaustive()
    }
}

impl SqliteDatabase {
    /// Open (or create) the database file at `path`.
    pub fn open(path: &Path) -> TrackResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                TrackError::StorageTransactionFailed(format!(
                    "cannot create {}: {e}",
                    parent.display()
                ))
            })?;
        }
        let conn = Connection::open(path)?;
        info!(path = %path.display(), "Opened tracking database");
        Self::init(conn)
    }

    /// Private in-memory database.
    pub fn open_in_memory() -> TrackResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> TrackResult<Self> {
        conn.execute_batch(PRAGMAS)?;
        conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `work` against the connection on the blocking pool.
    pub async fn call<T, F>(&self, work: F) -> TrackResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> TrackResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            work(&mut guard)
        })
        .await
        .map_err(|e| TrackError::TaskFailed(format!("storage task: {e}")))?
    }

    /// Run `work` inside one transaction, committing only if it succeeds.
    pub async fn transaction<T, F>(&self, work: F) -> TrackResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Transaction<'_>) -> TrackResult<T> + Send + 'static,
    {
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let value = work(&tx)?;
            tx.commit()?;
            Ok(value)
        })
        .await
    }
}

/// [`TrackingStore`] over the `active_aircraft` and `pending_aircraft` tables.
#[derive(Debug, Clone)]
pub struct SqliteTrackingStore {
    db: SqliteDatabase,
}

impl SqliteTrackingStore {
    pub fn new(db: SqliteDatabase) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &SqliteDatabase {
        &self.db
    }
}

fn upsert_records(tx: &Transaction<'_>, records: &[TrackedAircraftRecord]) -> TrackResult<usize> {
    let mut stmt = tx.prepare_cached(UPSERT_ACTIVE)?;
    for r in records {
        stmt.execute(params![
            r.icao24.to_string(),
            r.manufacturer.name(),
            r.manufacturer.key(),
            r.model,
            r.position.latitude,
            r.position.longitude,
            r.position.altitude,
            r.position.ground_speed,
            r.position.heading,
            r.on_ground,
            r.last_contact,
            r.updated_at,
        ])?;
    }
    Ok(records.len())
}

fn delete_pending(tx: &Transaction<'_>, ids: &[Icao24]) -> TrackResult<usize> {
    let mut stmt = tx.prepare_cached("DELETE FROM pending_aircraft WHERE icao24 = ?1")?;
    let mut removed = 0;
    for id in ids {
        removed += stmt.execute(params![id.to_string()])?;
    }
    Ok(removed)
}

fn retain_tracked(
    tx: &Transaction<'_>,
    records: Vec<TrackedAircraftRecord>,
) -> TrackResult<Vec<TrackedAircraftRecord>> {
    let mut stmt = tx.prepare_cached(
        "SELECT EXISTS (SELECT 1 FROM pending_aircraft WHERE icao24 = ?1 AND manufacturer_key = ?2)
             OR EXISTS (SELECT 1 FROM active_aircraft WHERE icao24 = ?1 AND manufacturer_key = ?2)",
    )?;
    let mut tracked = Vec::with_capacity(records.len());
    for record in records {
        let known: bool = stmt.query_row(
            params![record.icao24.to_string(), record.manufacturer.key()],
            |row| row.get(0),
        )?;
        if known {
            tracked.push(record);
        }
    }
    Ok(tracked)
}

fn column_icao24(row: &Row<'_>, index: usize) -> rusqlite::Result<Icao24> {
    let raw: String = row.get(index)?;
    Icao24::parse(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn column_manufacturer(row: &Row<'_>, index: usize) -> rusqlite::Result<Manufacturer> {
    let raw: String = row.get(index)?;
    Manufacturer::new(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn active_from_row(row: &Row<'_>) -> rusqlite::Result<TrackedAircraftRecord> {
    Ok(TrackedAircraftRecord {
        icao24: column_icao24(row, 0)?,
        manufacturer: column_manufacturer(row, 1)?,
        model: row.get(2)?,
        position: Position {
            latitude: row.get(3)?,
            longitude: row.get(4)?,
            altitude: row.get(5)?,
            ground_speed: row.get(6)?,
            heading: row.get(7)?,
        },
        on_ground: row.get(8)?,
        last_contact: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

impl TrackingStore for SqliteTrackingStore {
    fn upsert_active_batch(
        &self,
        records: Vec<TrackedAircraftRecord>,
    ) -> BoxFuture<'_, TrackResult<usize>> {
        Box::pin(
            self.db
                .transaction(move |tx| upsert_records(tx, &records)),
        )
    }

    fn remove_pending(&self, ids: Vec<Icao24>) -> BoxFuture<'_, TrackResult<usize>> {
        Box::pin(self.db.transaction(move |tx| delete_pending(tx, &ids)))
    }

    fn add_pending(
        &self,
        manufacturer: Manufacturer,
        ids: Vec<Icao24>,
        enqueued_at: i64,
    ) -> BoxFuture<'_, TrackResult<usize>> {
        Box::pin(self.db.transaction(move |tx| {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO pending_aircraft (icao24, manufacturer, manufacturer_key, enqueued_at)
                 SELECT ?1, ?2, ?3, ?4
                 WHERE NOT EXISTS (SELECT 1 FROM active_aircraft WHERE icao24 = ?1)",
            )?;
            let mut added = 0;
            for id in &ids {
                added += stmt.execute(params![
                    id.to_string(),
                    manufacturer.name(),
                    manufacturer.key(),
                    enqueued_at,
                ])?;
            }
            Ok(added)
        }))
    }

    fn confirm_batch(
        &self,
        records: Vec<TrackedAircraftRecord>,
    ) -> BoxFuture<'_, TrackResult<usize>> {
        Box::pin(self.db.transaction(move |tx| {
            let offered = records.len();
            let records = retain_tracked(tx, records)?;
            let confirmed = upsert_records(tx, &records)?;
            let ids: Vec<Icao24> = records.iter().map(|r| r.icao24).collect();
            let promoted = delete_pending(tx, &ids)?;
            debug!(
                confirmed,
                promoted,
                untracked = offered - confirmed,
                "Confirmed batch"
            );
            Ok(confirmed)
        }))
    }

    fn get_active(
        &self,
        manufacturer: Manufacturer,
    ) -> BoxFuture<'_, TrackResult<Vec<TrackedAircraftRecord>>> {
        Box::pin(self.db.call(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT icao24, manufacturer, model, latitude, longitude, altitude,
                        ground_speed, heading, on_ground, last_contact, updated_at
                 FROM active_aircraft
                 WHERE manufacturer_key = ?1
                 ORDER BY icao24",
            )?;
            let rows = stmt
                .query_map(params![manufacturer.key()], active_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        }))
    }

    fn get_pending(
        &self,
        manufacturer: Manufacturer,
    ) -> BoxFuture<'_, TrackResult<Vec<PendingAircraftRecord>>> {
        Box::pin(self.db.call(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT icao24, manufacturer, enqueued_at
                 FROM pending_aircraft
                 WHERE manufacturer_key = ?1
                 ORDER BY icao24",
            )?;
            let rows = stmt
                .query_map(params![manufacturer.key()], |row| {
                    Ok(PendingAircraftRecord {
                        icao24: column_icao24(row, 0)?,
                        manufacturer: column_manufacturer(row, 1)?,
                        enqueued_at: row.get(2)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        }))
    }

    fn delete_stale(&self, threshold_epoch: i64) -> BoxFuture<'_, TrackResult<usize>> {
        Box::pin(self.db.transaction(move |tx| {
            let removed = tx.execute(
                "DELETE FROM active_aircraft WHERE last_contact < ?1",
                params![threshold_epoch],
            )?;
            Ok(removed)
        }))
    }

    fn reset_manufacturer(&self, manufacturer: Manufacturer) -> BoxFuture<'_, TrackResult<usize>> {
        Box::pin(self.db.transaction(move |tx| {
            let key = manufacturer.key();
            let active = tx.execute(
                "DELETE FROM active_aircraft WHERE manufacturer_key = ?1",
                params![key],
            )?;
            let pending = tx.execute(
                "DELETE FROM pending_aircraft WHERE manufacturer_key = ?1",
                params![key],
            )?;
            Ok(active + pending)
        }))
    }

    fn compact(&self) -> BoxFuture<'_, TrackResult<()>> {
        // VACUUM cannot run inside a transaction
        Box::pin(self.db.call(|conn| {
            conn.execute_batch("ANALYZE; VACUUM;")?;
            let pages: Option<i64> = conn
                .query_row("PRAGMA page_count", [], |row| row.get(0))
                .optional()?;
            debug!(pages = pages.unwrap_or_default(), "Compacted tracking database");
            Ok(())
        }))
    }
}
