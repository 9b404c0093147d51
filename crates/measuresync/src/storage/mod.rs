//! Local durable buffer for measuresync.
//!
//! This module provides `SQLite`-based persistent storage for measurement
//! samples awaiting delivery, plus the sync bookkeeping the engine needs.

mod lease;
pub mod migrations;
pub mod schema;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::measurement::{format_timestamp, parse_timestamp, MeasurementRecord, Sample};

use schema::RECORD_COLUMNS;

/// How long a statement waits for another process holding the write lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Durable buffer of measurement records.
///
/// Every operation commits before it returns. The connection sits behind a
/// mutex so the buffer can be shared between the sampling and sync sides;
/// the lock is only held for the duration of a single statement.
#[derive(Debug)]
pub struct Storage {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Mutex<Connection>,
}

impl Storage {
    /// Open or create a buffer database at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist,
    /// and initializes or upgrades the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening database at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        // WAL with FULL sync: a committed append survives power loss
        let mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        debug!("journal_mode={}", mode);
        conn.execute_batch("PRAGMA synchronous=FULL;")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        migrations::initialize_schema(&conn)?;

        info!("Database opened successfully at {}", path.display());
        Ok(Self {
            path,
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory buffer for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn: Mutex::new(conn),
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::StorageLockPoisoned)
    }

    /// Run raw SQL against the connection.
    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn()?.execute_batch(sql)?;
        Ok(())
    }

    /// Append a new, unsynced measurement.
    ///
    /// Returns the assigned record ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert cannot be committed. The sample is not
    /// buffered in that case.
    pub fn append(
        &self,
        student_id: i64,
        height: f64,
        weight: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            r"
            INSERT INTO measurements (student_id, height, weight, timestamp, synced)
            VALUES (?1, ?2, ?3, ?4, 0)
            ",
            params![student_id, height, weight, format_timestamp(timestamp)],
        )?;

        let id = conn.last_insert_rowid();
        debug!("Appended measurement with id {}", id);
        Ok(id)
    }

    /// Append a sample stamped with the current time.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert cannot be committed.
    pub fn append_sample(&self, sample: &Sample) -> Result<i64> {
        self.append(sample.student_id, sample.height, sample.weight, Utc::now())
    }

    /// List every unsynced record, oldest first.
    ///
    /// Rows whose values cannot be decoded (for example a NULL field left by
    /// an older writer) are logged and skipped, so they never block the
    /// records behind them.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn list_unsynced(&self) -> Result<Vec<MeasurementRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM measurements WHERE synced = 0 ORDER BY id ASC"
        ))?;

        let rows = stmt.query_map([], Self::decode_row)?;
        collect_decoded(rows)
    }

    /// Mark a record as delivered.
    ///
    /// Returns `true` if the record flipped from unsynced to synced, `false`
    /// if it was already synced or does not exist. Calling this twice is not
    /// an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn mark_synced(&self, id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let affected = conn.execute(
            r"
            UPDATE measurements
            SET synced = 1, synced_at = ?2, next_attempt_at = NULL
            WHERE id = ?1 AND synced = 0
            ",
            params![id, format_timestamp(Utc::now())],
        )?;
        Ok(affected > 0)
    }

    /// Record a failed delivery attempt against an unsynced record.
    ///
    /// Increments the attempt counter, stores the failure message and the
    /// earliest time of the next attempt. Synced records are left untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn record_failure(
        &self,
        id: i64,
        message: &str,
        next_attempt_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let conn = self.conn()?;
        let affected = conn.execute(
            r"
            UPDATE measurements
            SET attempts = attempts + 1, last_error = ?2, next_attempt_at = ?3
            WHERE id = ?1 AND synced = 0
            ",
            params![id, message, next_attempt_at.map(format_timestamp)],
        )?;
        Ok(affected > 0)
    }

    /// Get a record by its ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn get(&self, id: i64) -> Result<Option<MeasurementRecord>> {
        let conn = self.conn()?;
        let result = conn
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM measurements WHERE id = ?1"),
                [id],
                Self::row_to_record,
            )
            .optional()?;
        Ok(result)
    }

    /// Get the most recent records, synced or not, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn list_recent(&self, limit: usize) -> Result<Vec<MeasurementRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM measurements ORDER BY id DESC LIMIT ?1"
        ))?;

        let limit_i64 = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map([limit_i64], Self::decode_row)?;
        collect_decoded(rows)
    }

    /// Count all buffered records.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn count(&self) -> Result<i64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM measurements", [], |row| {
            row.get(0)
        })?;
        Ok(count)
    }

    /// Count records still awaiting delivery.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn count_unsynced(&self) -> Result<i64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM measurements WHERE synced = 0",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Delete synced records whose capture time is before `cutoff`.
    ///
    /// Unsynced records are never deleted, nor are synced records whose
    /// timestamp cannot be read. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn prune_synced_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let expired: Vec<i64> = {
            let mut stmt = tx.prepare(
                "SELECT id, timestamp FROM measurements WHERE synced = 1 AND timestamp IS NOT NULL",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?;
            let mut expired = Vec::new();
            for row in rows {
                let (id, timestamp) = row?;
                if parse_timestamp(&timestamp).is_ok_and(|at| at < cutoff) {
                    expired.push(id);
                }
            }
            expired
        };

        let mut affected = 0;
        {
            let mut delete = tx.prepare("DELETE FROM measurements WHERE id = ?1")?;
            for id in &expired {
                affected += delete.execute([id])?;
            }
        }
        tx.commit()?;

        if affected > 0 {
            info!("Pruned {} synced measurements", affected);
        }
        Ok(affected)
    }

    /// Get buffer statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self) -> Result<StorageStats> {
        let total_records = self.count()?;
        let unsynced_records = self.count_unsynced()?;

        let conn = self.conn()?;
        let oldest_unsynced: Option<String> = conn
            .query_row(
                "SELECT timestamp FROM measurements WHERE synced = 0 ORDER BY id ASC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        let last_synced: Option<Option<String>> = conn
            .query_row(
                "SELECT MAX(synced_at) FROM measurements WHERE synced = 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        let failing_records: i64 = conn.query_row(
            "SELECT COUNT(*) FROM measurements WHERE synced = 0 AND attempts > 0",
            [],
            |row| row.get(0),
        )?;
        drop(conn);

        let db_size_bytes = if self.path.to_string_lossy() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StorageStats {
            total_records,
            unsynced_records,
            failing_records,
            oldest_unsynced: oldest_unsynced.and_then(|s| parse_timestamp(&s).ok()),
            last_synced: last_synced
                .flatten()
                .and_then(|s| parse_timestamp(&s).ok()),
            db_size_bytes,
        })
    }

    /// Convert a database row to a [`MeasurementRecord`].
    ///
    /// The capture timestamp is kept as the stored text. Bookkeeping times
    /// written by this crate that fail to parse are treated as unset.
    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<MeasurementRecord> {
        let next_attempt_str: Option<String> = row.get(7)?;
        let synced_at_str: Option<String> = row.get(9)?;

        Ok(MeasurementRecord {
            id: row.get(0)?,
            student_id: row.get(1)?,
            height: row.get(2)?,
            weight: row.get(3)?,
            timestamp: row.get(4)?,
            synced: row.get(5)?,
            attempts: row.get(6)?,
            next_attempt_at: next_attempt_str.and_then(|s| parse_timestamp(&s).ok()),
            last_error: row.get(8)?,
            synced_at: synced_at_str.and_then(|s| parse_timestamp(&s).ok()),
        })
    }

    /// Decode a row, separating undecodable values from database failures.
    fn decode_row(row: &rusqlite::Row) -> rusqlite::Result<DecodedRow> {
        let id: i64 = row.get(0)?;
        match Self::row_to_record(row) {
            Ok(record) => Ok(DecodedRow::Record(record)),
            Err(err) if is_decode_error(&err) => Ok(DecodedRow::Undecodable { id, err }),
            Err(err) => Err(err),
        }
    }
}

enum DecodedRow {
    Record(MeasurementRecord),
    Undecodable { id: i64, err: rusqlite::Error },
}

fn is_decode_error(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::InvalidColumnType(..)
            | rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::IntegralValueOutOfRange(..)
    )
}

fn collect_decoded(
    rows: impl Iterator<Item = rusqlite::Result<DecodedRow>>,
) -> Result<Vec<MeasurementRecord>> {
    let mut records = Vec::new();
    for row in rows {
        match row? {
            DecodedRow::Record(record) => records.push(record),
            DecodedRow::Undecodable { id, err } => {
                warn!("Skipping undecodable measurement ID {}: {}", id, err);
            }
        }
    }
    Ok(records)
}

/// Statistics about the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageStats {
    /// Total number of records stored.
    pub total_records: i64,
    /// Records not yet delivered.
    pub unsynced_records: i64,
    /// Unsynced records with at least one failed attempt.
    pub failing_records: i64,
    /// Capture time of the oldest unsynced record.
    pub oldest_unsynced: Option<DateTime<Utc>>,
    /// When the most recent delivery was confirmed.
    pub last_synced: Option<DateTime<Utc>>,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}
