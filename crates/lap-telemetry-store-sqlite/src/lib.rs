#![allow(clippy::missing_errors_doc)]

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use lap_telemetry_core::{
    format_rfc3339, now_utc, timestamp_from_micros, timestamp_micros, validate_lap_name, Lap,
    LapId, Parameter, Reading, TelemetryError,
};
use rusqlite::{params, Connection, OptionalExtension};
use time::OffsetDateTime;
use ulid::Ulid;

const TELEMETRY_MIGRATION_VERSION: i64 = 1;

const SCHEMA_TELEMETRY_V1: &str = r"
CREATE TABLE IF NOT EXISTS laps (
  lap_id TEXT PRIMARY KEY,
  name TEXT NOT NULL UNIQUE,
  created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_laps_created_at
  ON laps(created_at);

CREATE TABLE IF NOT EXISTS lap_parameters (
  param_seq INTEGER PRIMARY KEY AUTOINCREMENT,
  lap_id TEXT NOT NULL REFERENCES laps(lap_id),
  key TEXT NOT NULL,
  value TEXT NOT NULL,
  added_at INTEGER NOT NULL
);

CREATE TRIGGER IF NOT EXISTS trg_lap_parameters_no_update
BEFORE UPDATE ON lap_parameters
BEGIN
  SELECT RAISE(FAIL, 'lap_parameters is immutable');
END;

CREATE INDEX IF NOT EXISTS idx_lap_parameters_lap_added
  ON lap_parameters(lap_id, added_at);
CREATE INDEX IF NOT EXISTS idx_lap_parameters_lap_key_added
  ON lap_parameters(lap_id, key, added_at);
";

/// Durable lap registry and parameter store.
///
/// The handle is `Send + Sync`; statement execution is serialized on the
/// inner connection, and every multi-statement operation runs inside one
/// store transaction, so readers never observe a partial batch or a partial
/// cascade. Name uniqueness rests on the `UNIQUE` constraint, which also
/// holds across processes sharing the database file.
pub struct SqliteTelemetryStore {
    conn: Mutex<Connection>,
}

impl SqliteTelemetryStore {
    pub fn open(path: &Path) -> Result<Self, TelemetryError> {
        let conn = Connection::open(path).map_err(|err| {
            TelemetryError::StorageFailure(format!(
                "failed to open sqlite database at {}: {err}",
                path.display()
            ))
        })?;

        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, TelemetryError> {
        let conn = Connection::open_in_memory().map_err(|err| {
            TelemetryError::StorageFailure(format!("failed to open in-memory database: {err}"))
        })?;

        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, TelemetryError> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|err| {
            TelemetryError::StorageFailure(format!("failed to configure sqlite pragmas: {err}"))
        })?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn migrate(&self) -> Result<(), TelemetryError> {
        let conn = self.lock()?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
             );",
        )
        .map_err(|err| {
            TelemetryError::StorageFailure(format!("failed to ensure schema_migrations: {err}"))
        })?;

        conn.execute_batch(SCHEMA_TELEMETRY_V1).map_err(|err| {
            TelemetryError::StorageFailure(format!("failed to apply telemetry schema: {err}"))
        })?;

        let now = format_rfc3339(now_utc())?;
        conn.execute(
            "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
            params![TELEMETRY_MIGRATION_VERSION, now],
        )
        .map_err(|err| {
            TelemetryError::StorageFailure(format!("failed to register schema migration: {err}"))
        })?;

        Ok(())
    }

    /// Creates a new lap. Fails with `AlreadyExists` when the name is held
    /// by a live lap; the duplicate check is the `UNIQUE` constraint itself,
    /// not a read-then-write.
    pub fn create_lap(&self, name: &str) -> Result<Lap, TelemetryError> {
        validate_lap_name(name)?;

        let created_at = timestamp_micros(now_utc())?;
        let lap = Lap {
            lap_id: LapId::generate(),
            name: name.to_string(),
            // Truncated to the persisted precision so the returned value
            // matches every later lookup.
            created_at: timestamp_from_micros(created_at)?,
        };

        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT INTO laps(lap_id, name, created_at) VALUES (?1, ?2, ?3)",
            params![lap.lap_id.to_string(), lap.name, created_at],
        );

        match inserted {
            Ok(_) => Ok(lap),
            Err(err) if is_unique_violation(&err) => Err(TelemetryError::AlreadyExists(format!(
                "lap name already exists: {name}"
            ))),
            Err(err) => Err(storage(err)),
        }
    }

    pub fn find_lap_by_name(&self, name: &str) -> Result<Option<Lap>, TelemetryError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT lap_id, name, created_at FROM laps WHERE name = ?1",
            params![name],
            parse_lap_row,
        )
        .optional()
        .map_err(storage)
    }

    /// Atomic lookup-or-create: the conflict-ignoring insert and the lookup
    /// run in one transaction, so N concurrent callers racing on the same
    /// unknown name all observe a single identity.
    pub fn find_or_create_lap(&self, name: &str) -> Result<Lap, TelemetryError> {
        validate_lap_name(name)?;

        let candidate = LapId::generate();
        let created_at = timestamp_micros(now_utc())?;

        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(storage)?;

        tx.execute(
            "INSERT INTO laps(lap_id, name, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO NOTHING",
            params![candidate.to_string(), name, created_at],
        )
        .map_err(storage)?;

        let lap = tx
            .query_row(
                "SELECT lap_id, name, created_at FROM laps WHERE name = ?1",
                params![name],
                parse_lap_row,
            )
            .map_err(storage)?;

        tx.commit().map_err(storage)?;
        Ok(lap)
    }

    pub fn list_laps(&self) -> Result<Vec<Lap>, TelemetryError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT lap_id, name, created_at FROM laps
                 ORDER BY created_at ASC, name ASC",
            )
            .map_err(storage)?;

        let rows = stmt.query_map([], parse_lap_row).map_err(storage)?;
        collect_rows(rows)
    }

    /// Snapshot of every lap strictly older than `cutoff`, for the sweeper.
    pub fn laps_created_before(&self, cutoff: OffsetDateTime) -> Result<Vec<Lap>, TelemetryError> {
        let cutoff_raw = timestamp_micros(cutoff)?;
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT lap_id, name, created_at FROM laps
                 WHERE created_at < ?1
                 ORDER BY created_at ASC",
            )
            .map_err(storage)?;

        let rows = stmt
            .query_map(params![cutoff_raw], parse_lap_row)
            .map_err(storage)?;
        collect_rows(rows)
    }

    /// Deletes a lap and all of its parameters in one transaction. Nothing
    /// outside the registry/sweeper path may call this.
    pub fn delete_lap(&self, lap_id: LapId) -> Result<(), TelemetryError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(storage)?;

        delete_parameters_by_lap(&tx, lap_id)?;
        let deleted = tx
            .execute(
                "DELETE FROM laps WHERE lap_id = ?1",
                params![lap_id.to_string()],
            )
            .map_err(storage)?;
        tx.commit().map_err(storage)?;

        if deleted == 0 {
            return Err(TelemetryError::NotFound(format!("lap not found: {lap_id}")));
        }
        Ok(())
    }

    /// Appends a batch of readings to a lap. `added_at` starts at the
    /// ingestion instant and advances 1 µs per subsequent reading, so the
    /// supplied order is reproducible by `added_at` ascending. The batch is
    /// one transaction; no partial batch is ever visible.
    pub fn append_parameters(
        &self,
        lap_id: LapId,
        readings: &[Reading],
    ) -> Result<Vec<Parameter>, TelemetryError> {
        let now = timestamp_micros(now_utc())?;

        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(storage)?;

        require_lap(&tx, lap_id)?;

        // Clamped past the lap's newest reading so added_at stays strictly
        // increasing even when batches land within the same microsecond.
        let newest: Option<i64> = tx
            .query_row(
                "SELECT MAX(added_at) FROM lap_parameters WHERE lap_id = ?1",
                params![lap_id.to_string()],
                |row| row.get(0),
            )
            .map_err(storage)?;
        let base = match newest {
            Some(value) if value >= now => value + 1,
            _ => now,
        };

        let mut stored = Vec::with_capacity(readings.len());
        for (offset, reading) in (0_i64..).zip(readings) {
            let added_at_raw = base + offset;
            tx.execute(
                "INSERT INTO lap_parameters(lap_id, key, value, added_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![lap_id.to_string(), reading.key, reading.value, added_at_raw],
            )
            .map_err(storage)?;

            stored.push(Parameter {
                param_seq: tx.last_insert_rowid(),
                lap_id,
                key: reading.key.clone(),
                value: reading.value.clone(),
                added_at: timestamp_from_micros(added_at_raw)?,
            });
        }

        tx.commit().map_err(storage)?;
        Ok(stored)
    }

    /// All parameters of a lap, `added_at` ascending (`param_seq` breaks
    /// exact ties between concurrent batches). Empty result is a valid
    /// success here; the query layer decides whether to report it.
    pub fn list_parameters(&self, lap_id: LapId) -> Result<Vec<Parameter>, TelemetryError> {
        let conn = self.lock()?;
        require_lap(&conn, lap_id)?;

        let mut stmt = conn
            .prepare(
                "SELECT param_seq, lap_id, key, value, added_at
                 FROM lap_parameters
                 WHERE lap_id = ?1
                 ORDER BY added_at ASC, param_seq ASC",
            )
            .map_err(storage)?;

        let rows = stmt
            .query_map(params![lap_id.to_string()], parse_parameter_row)
            .map_err(storage)?;
        collect_rows(rows)
    }

    /// As [`Self::list_parameters`], filtered to one key. An empty result
    /// for a live lap is a success, not an error.
    pub fn list_parameters_by_key(
        &self,
        lap_id: LapId,
        key: &str,
    ) -> Result<Vec<Parameter>, TelemetryError> {
        let conn = self.lock()?;
        require_lap(&conn, lap_id)?;

        let mut stmt = conn
            .prepare(
                "SELECT param_seq, lap_id, key, value, added_at
                 FROM lap_parameters
                 WHERE lap_id = ?1 AND key = ?2
                 ORDER BY added_at ASC, param_seq ASC",
            )
            .map_err(storage)?;

        let rows = stmt
            .query_map(params![lap_id.to_string(), key], parse_parameter_row)
            .map_err(storage)?;
        collect_rows(rows)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, TelemetryError> {
        self.conn
            .lock()
            .map_err(|_| TelemetryError::StorageFailure("store mutex poisoned".to_string()))
    }
}

/// Cascade step of lap deletion. Runs inside the caller's transaction.
fn delete_parameters_by_lap(conn: &Connection, lap_id: LapId) -> Result<usize, TelemetryError> {
    conn.execute(
        "DELETE FROM lap_parameters WHERE lap_id = ?1",
        params![lap_id.to_string()],
    )
    .map_err(storage)
}

fn require_lap(conn: &Connection, lap_id: LapId) -> Result<(), TelemetryError> {
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM laps WHERE lap_id = ?1",
            params![lap_id.to_string()],
            |row| row.get(0),
        )
        .optional()
        .map_err(storage)?;

    if exists.is_none() {
        return Err(TelemetryError::NotFound(format!("lap not found: {lap_id}")));
    }
    Ok(())
}

fn storage(err: rusqlite::Error) -> TelemetryError {
    TelemetryError::StorageFailure(err.to_string())
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    err.to_string()
        .to_ascii_lowercase()
        .contains("unique constraint failed")
}

fn parse_lap_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Lap> {
    let lap_id_raw: String = row.get(0)?;
    let created_at_raw: i64 = row.get(2)?;

    Ok(Lap {
        lap_id: parse_lap_id(&lap_id_raw)?,
        name: row.get(1)?,
        created_at: timestamp_from_micros(created_at_raw).map_err(to_sql_error)?,
    })
}

fn parse_parameter_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Parameter> {
    let lap_id_raw: String = row.get(1)?;
    let added_at_raw: i64 = row.get(4)?;

    Ok(Parameter {
        param_seq: row.get(0)?,
        lap_id: parse_lap_id(&lap_id_raw)?,
        key: row.get(2)?,
        value: row.get(3)?,
        added_at: timestamp_from_micros(added_at_raw).map_err(to_sql_error)?,
    })
}

fn parse_lap_id(raw: &str) -> rusqlite::Result<LapId> {
    let parsed = Ulid::from_string(raw).map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("invalid ULID: {raw}"),
            )),
        )
    })?;

    Ok(LapId(parsed))
}

fn to_sql_error(err: TelemetryError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Integer,
        Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            err.to_string(),
        )),
    )
}

fn collect_rows<T>(
    rows: impl Iterator<Item = rusqlite::Result<T>>,
) -> Result<Vec<T>, TelemetryError> {
    let mut items = Vec::new();
    for row in rows {
        items.push(row.map_err(storage)?);
    }
    Ok(items)
}
