//! Error types for measuresync.
//!
//! This module defines the crate-wide error type. Sensor and delivery failures
//! have their own error types (see [`crate::sensor::SensorError`] and
//! [`crate::api::DeliveryError`]) because they never terminate the agent.

use std::path::PathBuf;
use thiserror::Error;

use crate::sensor::SensorError;

/// The main error type for measuresync operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Storage Errors ===
    /// Failed to open or create the database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    /// A thread panicked while holding the buffer connection.
    #[error("storage connection lock poisoned")]
    StorageLockPoisoned,

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Sampling Errors ===
    /// The sample source could not produce a measurement.
    #[error("sample capture failed: {0}")]
    Sensor(#[from] SensorError),

    // === HTTP Errors ===
    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for measuresync operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a configuration validation error.
    #[must_use]
    pub fn config_validation(message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
        }
    }

    /// Check if this error came from the local buffer.
    #[must_use]
    pub fn is_storage_error(&self) -> bool {
        matches!(
            self,
            Self::DatabaseOpen { .. }
                | Self::DatabaseQuery(_)
                | Self::DatabaseMigration { .. }
                | Self::StorageLockPoisoned
        )
    }

    /// Check if this error came from the sample source.
    #[must_use]
    pub fn is_sensor_error(&self) -> bool {
        matches!(self, Self::Sensor(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_error() {
        let err = Error::internal("something went wrong");
        assert_eq!(err.to_string(), "internal error: something went wrong");
    }

    #[test]
    fn test_config_validation_error_display() {
        let err = Error::config_validation("interval_secs must be greater than 0");
        assert!(err.to_string().contains("interval_secs"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_rusqlite_error() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let sqlite_err = conn
            .execute("INSERT INTO missing_table VALUES (1)", [])
            .unwrap_err();
        let err: Error = sqlite_err.into();
        assert!(matches!(err, Error::DatabaseQuery(_)));
        assert!(err.is_storage_error());
        assert!(!err.is_sensor_error());
    }

    #[test]
    fn test_lock_poisoning_is_storage_error() {
        let err = Error::StorageLockPoisoned;
        assert!(err.is_storage_error());
        assert_eq!(err.to_string(), "storage connection lock poisoned");
        assert!(!Error::internal("bug").is_storage_error());
    }

    #[test]
    fn test_from_sensor_error() {
        let err: Error = SensorError::Unavailable("load cell offline".to_string()).into();
        assert!(err.is_sensor_error());
        assert!(!err.is_storage_error());
        assert!(err.to_string().contains("load cell offline"));
    }

    #[test]
    fn test_from_json_error() {
        let json_result: std::result::Result<i32, serde_json::Error> =
            serde_json::from_str("not valid json");
        if let Err(json_err) = json_result {
            let err: Error = json_err.into();
            assert!(matches!(err, Error::Json(_)));
        }
    }

    #[test]
    fn test_database_migration_error_display() {
        let err = Error::DatabaseMigration {
            message: "version mismatch".to_string(),
        };
        assert!(err.to_string().contains("version mismatch"));
        assert!(err.is_storage_error());
    }

    #[test]
    fn test_directory_create_error_display() {
        let err = Error::DirectoryCreate {
            path: PathBuf::from("/var/lib/measuresync"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied"),
        };
        let text = err.to_string();
        assert!(text.contains("/var/lib/measuresync"));
        assert!(text.contains("access denied"));
    }

    #[test]
    fn test_database_open_error_display() {
        let result = rusqlite::Connection::open_with_flags(
            "/nonexistent/path/db.sqlite",
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
        );
        if let Err(sqlite_err) = result {
            let err = Error::DatabaseOpen {
                path: PathBuf::from("/nonexistent/path/db.sqlite"),
                source: sqlite_err,
            };
            assert!(err.to_string().contains("/nonexistent/path/db.sqlite"));
        }
    }
}
