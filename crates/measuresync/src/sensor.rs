//! Sample sources.
//!
//! A sensing station identifies a student and reads height and weight. The
//! hardware side is pluggable: anything implementing [`SampleSource`] can
//! feed the agent.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::measurement::Sample;

/// Errors that can occur while taking a sample.
#[derive(Debug, Error)]
pub enum SensorError {
    /// The sensing hardware could not be reached.
    #[error("sensor unavailable: {0}")]
    Unavailable(String),

    /// No student was identified in front of the station.
    #[error("no student identified")]
    NoStudent,

    /// A sensor returned a reading that could not be used.
    #[error("invalid reading from {sensor}: {message}")]
    InvalidReading {
        /// Which sensor produced the reading.
        sensor: &'static str,
        /// Description of the problem.
        message: String,
    },
}

/// Which sample source the agent uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    /// A constant, configured reading. Used on stations without hardware.
    #[default]
    Fixed,
    /// No sampling; the agent only synchronizes what is already buffered.
    Disabled,
}

impl std::fmt::Display for SensorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fixed => write!(f, "fixed"),
            Self::Disabled => write!(f, "disabled"),
        }
    }
}

/// A source of measurement samples.
///
/// Each call to [`capture`](SampleSource::capture) yields at most one sample.
/// A failed capture must leave no side effects behind.
#[async_trait]
pub trait SampleSource: Send + Sync + std::fmt::Debug {
    /// The name of this source (for logging).
    fn name(&self) -> &'static str;

    /// Take one sample.
    ///
    /// # Errors
    ///
    /// Returns a [`SensorError`] if no usable sample could be taken.
    async fn capture(&mut self) -> Result<Sample, SensorError>;
}

/// Returns the same configured sample on every capture.
#[derive(Debug, Clone)]
pub struct FixedSampleSource {
    sample: Sample,
}

impl FixedSampleSource {
    /// Create a source that always yields `sample`.
    #[must_use]
    pub fn new(sample: Sample) -> Self {
        Self { sample }
    }
}

#[async_trait]
impl SampleSource for FixedSampleSource {
    fn name(&self) -> &'static str {
        "fixed"
    }

    async fn capture(&mut self) -> Result<Sample, SensorError> {
        Ok(self.sample)
    }
}

/// Build the sample source selected in the configuration.
///
/// Returns `None` when sampling is disabled.
#[must_use]
pub fn from_config(config: &crate::config::SensorConfig) -> Option<Box<dyn SampleSource>> {
    match config.kind {
        SensorKind::Fixed => Some(Box::new(FixedSampleSource::new(Sample::new(
            config.student_id,
            config.height,
            config.weight,
        )))),
        SensorKind::Disabled => None,
    }
}
