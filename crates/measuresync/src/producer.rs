//! Sample producer: takes a sample and appends it to the buffer.

use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::sensor::SampleSource;
use crate::storage::Storage;

/// Feeds samples from a [`SampleSource`] into the buffer.
#[derive(Debug)]
pub struct SampleProducer {
    source: Box<dyn SampleSource>,
    storage: Arc<Storage>,
}

impl SampleProducer {
    /// Create a producer appending samples from `source` to `storage`.
    #[must_use]
    pub fn new(source: Box<dyn SampleSource>, storage: Arc<Storage>) -> Self {
        Self { source, storage }
    }

    /// Name of the underlying source.
    #[must_use]
    pub fn source_name(&self) -> &'static str {
        self.source.name()
    }

    /// Take one sample and buffer it.
    ///
    /// Returns the new record ID.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Sensor`] if the capture failed, in which case
    /// nothing was appended, or a storage error if the append failed, in
    /// which case the sample is dropped.
    pub async fn produce(&mut self) -> Result<i64> {
        let sample = self.source.capture().await?;
        debug!(
            "Captured sample from {}: student {} height {} weight {}",
            self.source.name(),
            sample.student_id,
            sample.height,
            sample.weight
        );
        self.storage.append_sample(&sample)
    }
}
