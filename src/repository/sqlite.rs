//! SQLite-backed repository
//!
//! One connection behind a mutex. `synchronous = FULL` plus autocommit (or
//! an explicit transaction for forecast batches) means a returned `Ok` is
//! on disk. Statements run on the blocking pool, never on a runtime worker.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use super::{DateRange, Repository, RepositoryError, RepositoryResult};
use crate::event::{ForecastPoint, NewMeasurement, StoredMeasurement};

const SCHEMA_VERSION: i64 = 1;

const SCHEMA_V1: &str = r"
CREATE TABLE IF NOT EXISTS measurements (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  entity_id TEXT NOT NULL,
  timestamp TEXT NOT NULL,
  value INTEGER NOT NULL CHECK (value >= 0),
  capacity INTEGER NOT NULL CHECK (capacity > 0),
  distance REAL NOT NULL CHECK (distance >= 0.0),
  created_at TEXT NOT NULL,
  dedup_key TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_measurements_entity_timestamp
  ON measurements(entity_id, timestamp, id);
CREATE INDEX IF NOT EXISTS idx_measurements_dedup_key
  ON measurements(dedup_key);

CREATE TRIGGER IF NOT EXISTS trg_measurements_no_update
BEFORE UPDATE ON measurements
BEGIN
  SELECT RAISE(FAIL, 'measurements is append-only');
END;

CREATE TRIGGER IF NOT EXISTS trg_measurements_no_delete
BEFORE DELETE ON measurements
BEGIN
  SELECT RAISE(FAIL, 'measurements is append-only');
END;

CREATE TABLE IF NOT EXISTS forecasts (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  entity_id TEXT NOT NULL,
  target_date TEXT NOT NULL,
  point_estimate REAL NOT NULL,
  lower_bound REAL NOT NULL,
  upper_bound REAL NOT NULL,
  generated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_forecasts_entity_target
  ON forecasts(entity_id, target_date, generated_at);

CREATE TRIGGER IF NOT EXISTS trg_forecasts_no_update
BEFORE UPDATE ON forecasts
BEGIN
  SELECT RAISE(FAIL, 'forecasts is append-only');
END;

CREATE TRIGGER IF NOT EXISTS trg_forecasts_no_delete
BEFORE DELETE ON forecasts
BEGIN
  SELECT RAISE(FAIL, 'forecasts is append-only');
END;
";

/// Repository stored in a SQLite database file
pub struct SqliteRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRepository {
    /// Open (creating if needed) the database at `path` and apply the schema
    pub fn open(path: &Path) -> RepositoryResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = FULL;
             PRAGMA busy_timeout = 5000;",
        )?;
        info!(path = %path.display(), "opened sqlite repository");
        Self::with_connection(conn)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> RepositoryResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> RepositoryResult<Self> {
        let repo = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        repo.migrate()?;
        Ok(repo)
    }

    fn migrate(&self) -> RepositoryResult<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );",
        )?;

        let applied: Option<i64> = conn
            .query_row(
                "SELECT version FROM schema_migrations WHERE version = ?1",
                params![SCHEMA_VERSION],
                |row| row.get(0),
            )
            .optional()?;

        conn.execute_batch(SCHEMA_V1)?;

        if applied.is_none() {
            conn.execute(
                "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
                params![SCHEMA_VERSION, Utc::now()],
            )?;
            debug!(version = SCHEMA_VERSION, "applied schema migration");
        }

        Ok(())
    }

    /// Run `op` against the connection on the blocking thread pool
    async fn run_blocking<T, F>(&self, operation_label: &'static str, op: F) -> RepositoryResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> RepositoryResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            op(&mut guard)
        })
        .await
        .map_err(|err| RepositoryError::Unavailable(format!("{operation_label} join failure: {err}")))?
    }
}

fn to_sql_integer(column: &'static str, value: u64) -> RepositoryResult<i64> {
    i64::try_from(value).map_err(|e| RepositoryError::Corrupt {
        column,
        reason: e.to_string(),
    })
}

fn parse_measurement_row(row: &Row<'_>) -> rusqlite::Result<StoredMeasurement> {
    let value: i64 = row.get(3)?;
    let capacity: i64 = row.get(4)?;
    Ok(StoredMeasurement {
        id: row.get(0)?,
        entity_id: row.get(1)?,
        timestamp: row.get(2)?,
        value: u64::try_from(value)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Integer, Box::new(e)))?,
        capacity: u32::try_from(capacity)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Integer, Box::new(e)))?,
        distance: row.get(5)?,
        created_at: row.get(6)?,
        dedup_key: row.get(7)?,
    })
}

fn parse_forecast_row(row: &Row<'_>) -> rusqlite::Result<ForecastPoint> {
    Ok(ForecastPoint {
        entity_id: row.get(0)?,
        target_date: row.get(1)?,
        point_estimate: row.get(2)?,
        lower_bound: row.get(3)?,
        upper_bound: row.get(4)?,
        generated_at: row.get(5)?,
    })
}

#[async_trait]
impl Repository for SqliteRepository {
    async fn append_measurement(
        &self,
        measurement: NewMeasurement,
    ) -> RepositoryResult<StoredMeasurement> {
        let value = to_sql_integer("value", measurement.event.value)?;
        self.run_blocking("append_measurement", move |conn| {
            conn.execute(
                "INSERT INTO measurements(entity_id, timestamp, value, capacity, distance, created_at, dedup_key)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    measurement.event.entity_id,
                    measurement.event.timestamp,
                    value,
                    measurement.event.capacity,
                    measurement.event.distance,
                    measurement.created_at,
                    measurement.dedup_key,
                ],
            )?;
            let id = conn.last_insert_rowid();
            Ok(StoredMeasurement::from_new(id, measurement))
        })
        .await
    }

    async fn contains_measurement(&self, dedup_key: &str) -> RepositoryResult<bool> {
        let dedup_key = dedup_key.to_string();
        self.run_blocking("contains_measurement", move |conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM measurements WHERE dedup_key = ?1 LIMIT 1",
                    params![dedup_key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn append_forecast_points(&self, points: &[ForecastPoint]) -> RepositoryResult<usize> {
        let points = points.to_vec();
        self.run_blocking("append_forecast_points", move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO forecasts(entity_id, target_date, point_estimate, lower_bound, upper_bound, generated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )?;
                for point in &points {
                    stmt.execute(params![
                        point.entity_id,
                        point.target_date,
                        point.point_estimate,
                        point.lower_bound,
                        point.upper_bound,
                        point.generated_at,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(points.len())
        })
        .await
    }

    async fn query_history(&self, entity_id: &str) -> RepositoryResult<Vec<StoredMeasurement>> {
        let entity_id = entity_id.to_string();
        self.run_blocking("query_history", move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, entity_id, timestamp, value, capacity, distance, created_at, dedup_key
                 FROM measurements
                 WHERE entity_id = ?1
                 ORDER BY timestamp ASC, id ASC",
            )?;
            let rows = stmt.query_map(params![entity_id], parse_measurement_row)?;
            let history = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(history)
        })
        .await
    }

    async fn query_forecasts(
        &self,
        entity_id: &str,
        range: DateRange,
    ) -> RepositoryResult<Vec<ForecastPoint>> {
        let entity_id = entity_id.to_string();
        self.run_blocking("query_forecasts", move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT entity_id, target_date, point_estimate, lower_bound, upper_bound, generated_at
                 FROM forecasts
                 WHERE entity_id = ?1 AND target_date >= ?2 AND target_date <= ?3
                 ORDER BY target_date ASC, generated_at ASC, id ASC",
            )?;
            let rows = stmt.query_map(params![entity_id, range.start, range.end], parse_forecast_row)?;
            let points = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(points)
        })
        .await
    }
}
