//! Output formatting for CLI
//!
//! Renders buffered measurements and buffer status for the terminal:
//! - Plain one-line-per-record output
//! - Aligned table output (default for `list`)
//! - JSON output for scripting

use std::path::Path;

use chrono::{DateTime, Utc};

use super::OutputFormat;
use crate::error::Result;
use crate::measurement::{format_timestamp, MeasurementRecord};
use crate::storage::StorageStats;

/// Output helper for consistent formatting.
#[derive(Debug, Clone, Copy)]
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    /// Create an output helper for `format`.
    #[must_use]
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Print a list of measurement records.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn print_records(&self, records: &[MeasurementRecord]) -> Result<()> {
        match self.format {
            OutputFormat::Plain => {
                for record in records {
                    println!("{}", plain_line(record));
                }
            }
            OutputFormat::Table => {
                if records.is_empty() {
                    println!("No measurements found.");
                    return Ok(());
                }
                println!("{}", table_header());
                for record in records {
                    println!("{}", table_row(record));
                }
                println!("\n{} measurement(s)", records.len());
            }
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(records)?);
            }
        }
        Ok(())
    }

    /// Print buffer status.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn print_status(&self, stats: &StorageStats, database: &Path, endpoint: &str) -> Result<()> {
        if self.format == OutputFormat::Json {
            let status = serde_json::json!({
                "database_path": database,
                "endpoint": endpoint,
                "total_records": stats.total_records,
                "unsynced_records": stats.unsynced_records,
                "failing_records": stats.failing_records,
                "oldest_unsynced": stats.oldest_unsynced.map(format_timestamp),
                "last_synced": stats.last_synced.map(format_timestamp),
                "db_size_bytes": stats.db_size_bytes,
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
            return Ok(());
        }

        println!("measuresync status");
        println!("------------------");
        println!("Database:        {}", database.display());
        println!("Endpoint:        {endpoint}");
        println!("Size:            {}", format_bytes(stats.db_size_bytes));
        println!("Measurements:    {}", stats.total_records);
        println!("Unsynced:        {}", stats.unsynced_records);
        println!("Failing:         {}", stats.failing_records);
        println!("Oldest unsynced: {}", display_time(stats.oldest_unsynced));
        println!("Last synced:     {}", display_time(stats.last_synced));
        Ok(())
    }
}

fn plain_line(record: &MeasurementRecord) -> String {
    format!(
        "{} {} {} {} {} {}",
        record.id,
        record.student_id,
        record.height,
        record.weight,
        record.timestamp,
        if record.synced { "synced" } else { "pending" }
    )
}

fn table_header() -> String {
    format!(
        "{:>6}  {:>8}  {:>7}  {:>7}  {:<20}  {:<8}  {:>8}",
        "ID", "STUDENT", "HEIGHT", "WEIGHT", "TIMESTAMP", "STATE", "ATTEMPTS"
    )
}

fn table_row(record: &MeasurementRecord) -> String {
    let state = if record.synced {
        "synced"
    } else if record.attempts > 0 {
        "failing"
    } else {
        "pending"
    };
    let captured = record.captured_at().map_or_else(
        || record.timestamp.clone(),
        |at| at.format("%Y-%m-%d %H:%M:%S").to_string(),
    );
    let mut row = format!(
        "{:>6}  {:>8}  {:>7.1}  {:>7.1}  {:<20}  {:<8}  {:>8}",
        record.id,
        record.student_id,
        record.height,
        record.weight,
        captured,
        state,
        record.attempts
    );
    if let (false, Some(err)) = (record.synced, &record.last_error) {
        row.push_str("  ");
        row.push_str(&truncate(err, 40));
    }
    row
}

fn display_time(time: Option<DateTime<Utc>>) -> String {
    time.map_or_else(
        || "-".to_string(),
        |t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

/// Format a byte count with a binary unit suffix.
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    #[allow(clippy::cast_precision_loss)]
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}
