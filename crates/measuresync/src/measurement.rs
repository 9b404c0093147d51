//! Core measurement types for measuresync.
//!
//! A [`Sample`] is what a sensing station produces; a [`MeasurementRecord`] is
//! a sample once it has been buffered locally; a [`MeasurementPayload`] is the
//! body posted to the remote measurement API.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// One reading from a sensing station.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Identifier of the student in the remote system.
    pub student_id: i64,
    /// Height reading.
    pub height: f64,
    /// Weight reading.
    pub weight: f64,
}

impl Sample {
    /// Create a new sample.
    #[must_use]
    pub fn new(student_id: i64, height: f64, weight: f64) -> Self {
        Self {
            student_id,
            height,
            weight,
        }
    }
}

/// A buffered measurement and its synchronization state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    /// Local identifier, assigned by the buffer and never reused.
    pub id: i64,
    /// Identifier of the student in the remote system.
    pub student_id: i64,
    /// Height reading.
    pub height: f64,
    /// Weight reading.
    pub weight: f64,
    /// Capture time exactly as stored in the buffer.
    pub timestamp: String,
    /// Whether the remote API has confirmed this record.
    pub synced: bool,
    /// Number of failed delivery attempts.
    pub attempts: u32,
    /// Earliest time the next delivery may be attempted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Description of the most recent delivery failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// When the record was marked synced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<DateTime<Utc>>,
}

impl MeasurementRecord {
    /// Whether a delivery attempt is allowed at `now`.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.synced && self.next_attempt_at.map_or(true, |at| at <= now)
    }

    /// Capture time as an instant, if the stored text can be read as one.
    #[must_use]
    pub fn captured_at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.timestamp).ok()
    }

    /// Build the wire payload for this record.
    ///
    /// The stored timestamp text is sent unchanged.
    #[must_use]
    pub fn to_payload(&self) -> MeasurementPayload {
        MeasurementPayload {
            student_id: self.student_id,
            height: self.height,
            weight: self.weight,
            timestamp: self.timestamp.clone(),
        }
    }
}

/// Body of a create-measurement request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementPayload {
    /// Identifier of the student in the remote system.
    pub student_id: i64,
    /// Height reading.
    pub height: f64,
    /// Weight reading.
    pub weight: f64,
    /// Capture time as stored locally.
    pub timestamp: String,
}

/// Format a timestamp the way the buffer stores it.
///
/// Fixed microsecond precision with a `Z` suffix keeps the text sortable.
#[must_use]
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp.
///
/// Accepts RFC 3339 text. Offset-less ISO 8601 text, as written by older
/// buffers, is read as UTC, with either a `T` or a space between date and
/// time.
///
/// # Errors
///
/// Returns an error if the text is neither form.
pub fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    match DateTime::parse_from_rfc3339(text) {
        Ok(dt) => Ok(dt.with_timezone(&Utc)),
        Err(err) => NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
            .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f"))
            .map(|naive| naive.and_utc())
            .map_err(|_| err),
    }
}
