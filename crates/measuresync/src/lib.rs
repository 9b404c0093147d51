//! `measuresync` - Buffers station measurements locally and syncs them upstream
//!
//! A sensing station takes one student measurement per cycle, appends it to a
//! durable `SQLite` buffer, and then pushes every unsynced record to the remote
//! measurement API. Records are marked synced only after the API confirmed
//! creation, so delivery is at-least-once.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod agent;
pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod measurement;
pub mod producer;
pub mod sensor;
pub mod shutdown;
pub mod storage;
pub mod sync;

pub use agent::{Agent, AgentSummary, CycleReport};
pub use api::{DeliveryError, HttpMeasurementApi, MeasurementApi};
pub use config::Config;
pub use error::{Error, Result};
pub use logging::init_logging;
pub use measurement::{MeasurementPayload, MeasurementRecord, Sample};
pub use producer::SampleProducer;
pub use sensor::{SampleSource, SensorError};
pub use shutdown::{Shutdown, ShutdownSignal};
pub use storage::{Storage, StorageStats};
pub use sync::{RetryPolicy, SyncEngine, SyncReport};
