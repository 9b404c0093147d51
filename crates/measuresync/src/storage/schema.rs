//! `SQLite` schema definitions for measuresync.
//!
//! The base `measurements` layout matches the one field stations have always
//! written, so an existing buffer file can be opened in place. Columns added
//! later live in the migrations.

/// SQL statement to create the measurements table.
pub const CREATE_MEASUREMENTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS measurements (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    student_id INTEGER,
    height REAL,
    weight REAL,
    timestamp TEXT,
    synced INTEGER DEFAULT 0
)
";

/// SQL statement to create the metadata table for storing key-value pairs.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// Retry bookkeeping columns (schema version 2).
pub const ADD_RETRY_COLUMNS: &str = r"
ALTER TABLE measurements ADD COLUMN attempts INTEGER NOT NULL DEFAULT 0;
ALTER TABLE measurements ADD COLUMN next_attempt_at TEXT;
ALTER TABLE measurements ADD COLUMN last_error TEXT;
ALTER TABLE measurements ADD COLUMN synced_at TEXT;
";

/// Partial index for the sync engine's scan (schema version 2).
pub const CREATE_UNSYNCED_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_measurements_unsynced ON measurements(id) WHERE synced = 0
";

/// All base schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[CREATE_MEASUREMENTS_TABLE, CREATE_METADATA_TABLE];

/// Columns selected when reading a [`crate::MeasurementRecord`], in row order.
pub const RECORD_COLUMNS: &str =
    "id, student_id, height, weight, timestamp, synced, attempts, next_attempt_at, last_error, synced_at";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_statements_not_empty() {
        assert!(!SCHEMA_STATEMENTS.is_empty());
        for stmt in SCHEMA_STATEMENTS {
            assert!(!stmt.is_empty());
        }
    }

    #[test]
    fn test_create_measurements_table_contains_required_columns() {
        assert!(CREATE_MEASUREMENTS_TABLE.contains("id INTEGER PRIMARY KEY AUTOINCREMENT"));
        assert!(CREATE_MEASUREMENTS_TABLE.contains("student_id INTEGER"));
        assert!(CREATE_MEASUREMENTS_TABLE.contains("height REAL"));
        assert!(CREATE_MEASUREMENTS_TABLE.contains("weight REAL"));
        assert!(CREATE_MEASUREMENTS_TABLE.contains("timestamp TEXT"));
        assert!(CREATE_MEASUREMENTS_TABLE.contains("synced INTEGER DEFAULT 0"));
    }

    #[test]
    fn test_record_columns_cover_retry_columns() {
        for column in ["attempts", "next_attempt_at", "last_error", "synced_at"] {
            assert!(ADD_RETRY_COLUMNS.contains(column));
            assert!(RECORD_COLUMNS.contains(column));
        }
    }
}
