//! The agent loop: sample, buffer, sync, wait.
//!
//! One cycle takes a sample (if a source is configured) and then runs a full
//! sync pass. Cycles never overlap; the next one starts `interval` after the
//! previous one finished, or not at all once shutdown is requested.

use std::time::Duration;

use tracing::{error, info, warn};

use crate::error::Error;
use crate::producer::SampleProducer;
use crate::shutdown::ShutdownSignal;
use crate::sync::{SyncEngine, SyncReport};

/// What happened during one agent cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// ID of the record buffered this cycle.
    pub appended: Option<i64>,
    /// Result of the sync pass, if it ran to completion or shutdown.
    pub sync: Option<SyncReport>,
}

/// Totals over the lifetime of an agent run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AgentSummary {
    /// Completed cycles.
    pub cycles: u64,
    /// Samples buffered.
    pub appended: u64,
    /// Records delivered.
    pub synced: u64,
    /// Failed delivery attempts.
    pub failed: u64,
}

impl AgentSummary {
    fn record(&mut self, cycle: &CycleReport) {
        self.cycles += 1;
        if cycle.appended.is_some() {
            self.appended += 1;
        }
        if let Some(sync) = cycle.sync {
            self.synced += sync.synced as u64;
            self.failed += sync.failed as u64;
        }
    }
}

/// Scheduler that drives the producer and the sync engine.
#[derive(Debug)]
pub struct Agent {
    producer: Option<SampleProducer>,
    engine: SyncEngine,
    interval: Duration,
}

impl Agent {
    /// Create an agent. Without a producer it only synchronizes.
    #[must_use]
    pub fn new(producer: Option<SampleProducer>, engine: SyncEngine, interval: Duration) -> Self {
        Self {
            producer,
            engine,
            interval,
        }
    }

    /// Delay between cycles.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run a single cycle.
    ///
    /// Never fails: capture, storage, and delivery problems are logged and
    /// leave the buffer consistent for the next cycle.
    pub async fn run_cycle(&mut self, shutdown: &ShutdownSignal) -> CycleReport {
        let mut report = CycleReport::default();

        if let Some(producer) = self.producer.as_mut() {
            match producer.produce().await {
                Ok(id) => {
                    info!("Buffered measurement ID {}", id);
                    report.appended = Some(id);
                }
                Err(Error::Sensor(e)) => {
                    warn!("Capture from {} failed, skipping sample: {}", producer.source_name(), e);
                }
                Err(e) => {
                    error!("Failed to buffer sample, dropping it: {}", e);
                }
            }
        }

        match self.engine.run_pass(shutdown).await {
            Ok(sync) => {
                if !sync.is_idle() {
                    info!("Sync pass complete: {}", sync);
                }
                report.sync = Some(sync);
            }
            Err(e) => {
                error!("Sync pass aborted, resuming next cycle: {}", e);
            }
        }

        report
    }

    /// Run cycles until shutdown is requested.
    pub async fn run(mut self, shutdown: ShutdownSignal) -> AgentSummary {
        let mut summary = AgentSummary::default();
        info!(
            "Agent started: sampling {}, interval {:?}",
            self.producer
                .as_ref()
                .map_or("disabled", SampleProducer::source_name),
            self.interval
        );

        while !shutdown.is_requested() {
            let cycle = self.run_cycle(&shutdown).await;
            summary.record(&cycle);

            tokio::select! {
                () = tokio::time::sleep(self.interval) => {}
                () = shutdown.requested() => {}
            }
        }

        info!(
            "Agent stopped after {} cycles ({} buffered, {} synced, {} failed attempts)",
            summary.cycles, summary.appended, summary.synced, summary.failed
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{CreatedMeasurement, DeliveryError, MeasurementApi};
    use crate::measurement::{MeasurementPayload, Sample};
    use crate::sensor::{FixedSampleSource, SampleSource, SensorError};
    use crate::shutdown::Shutdown;
    use crate::storage::Storage;
    use crate::sync::RetryPolicy;
    use async_trait::async_trait;
    use std::sync::Arc;

    #[derive(Debug)]
    struct StatusApi {
        accept: bool,
    }

    #[async_trait]
    impl MeasurementApi for StatusApi {
        async fn create_measurement(
            &self,
            _payload: &MeasurementPayload,
        ) -> std::result::Result<CreatedMeasurement, DeliveryError> {
            if self.accept {
                Ok(CreatedMeasurement::default())
            } else {
                Err(DeliveryError::UnexpectedStatus {
                    status: 503,
                    body: String::new(),
                })
            }
        }
    }

    #[derive(Debug)]
    struct OfflineSensor;

    #[async_trait]
    impl SampleSource for OfflineSensor {
        fn name(&self) -> &'static str {
            "offline"
        }

        async fn capture(&mut self) -> std::result::Result<Sample, SensorError> {
            Err(SensorError::Unavailable("camera disconnected".to_string()))
        }
    }

    fn agent(
        source: Option<Box<dyn SampleSource>>,
        accept: bool,
        interval: Duration,
    ) -> (Arc<Storage>, Agent) {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        let engine = SyncEngine::new(
            storage.clone(),
            Arc::new(StatusApi { accept }),
            RetryPolicy::disabled(),
        );
        let producer = source.map(|s| SampleProducer::new(s, storage.clone()));
        (storage, Agent::new(producer, engine, interval))
    }

    fn fixed() -> Option<Box<dyn SampleSource>> {
        Some(Box::new(FixedSampleSource::new(Sample::new(123, 170.5, 65.3))))
    }

    #[tokio::test]
    async fn test_cycle_buffers_and_syncs() {
        let (storage, mut agent) = agent(fixed(), true, Duration::from_secs(60));

        let report = agent.run_cycle(&ShutdownSignal::never()).await;

        assert!(report.appended.is_some());
        assert_eq!(report.sync.unwrap().synced, 1);
        assert_eq!(storage.count().unwrap(), 1);
        assert_eq!(storage.count_unsynced().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cycle_keeps_record_when_remote_fails() {
        let (storage, mut agent) = agent(fixed(), false, Duration::from_secs(60));

        let report = agent.run_cycle(&ShutdownSignal::never()).await;

        assert_eq!(report.sync.unwrap().failed, 1);
        assert_eq!(storage.count_unsynced().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_capture_failure_still_syncs_backlog() {
        let (storage, mut agent) =
            agent(Some(Box::new(OfflineSensor)), true, Duration::from_secs(60));
        storage.append_sample(&Sample::new(7, 120.0, 30.0)).unwrap();

        let report = agent.run_cycle(&ShutdownSignal::never()).await;

        assert!(report.appended.is_none());
        assert_eq!(report.sync.unwrap().synced, 1);
        assert_eq!(storage.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sync_only_agent() {
        let (storage, mut agent) = agent(None, true, Duration::from_secs(60));

        let report = agent.run_cycle(&ShutdownSignal::never()).await;

        assert!(report.appended.is_none());
        assert!(report.sync.unwrap().is_idle());
        assert_eq!(storage.count().unwrap(), 0);
    }

    const FAIL_INSERTS: &str = "CREATE TRIGGER fail_inserts BEFORE INSERT ON measurements
        BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END;";
    const FAIL_UPDATES: &str = "CREATE TRIGGER fail_updates BEFORE UPDATE ON measurements
        BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END;";

    #[tokio::test]
    async fn test_append_failure_drops_sample_but_cycle_continues() {
        let (storage, mut agent) = agent(fixed(), true, Duration::from_secs(60));
        storage.append_sample(&Sample::new(7, 120.0, 30.0)).unwrap();
        storage.execute_batch(FAIL_INSERTS).unwrap();

        let report = agent.run_cycle(&ShutdownSignal::never()).await;
        assert!(report.appended.is_none());
        assert_eq!(report.sync.unwrap().synced, 1);
        assert_eq!(storage.count().unwrap(), 1);

        storage
            .execute_batch("DROP TRIGGER fail_inserts")
            .unwrap();
        let report = agent.run_cycle(&ShutdownSignal::never()).await;
        assert!(report.appended.is_some());
        assert_eq!(storage.count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_read_failure_aborts_pass_and_next_cycle_resumes() {
        let (storage, mut agent) = agent(None, true, Duration::from_secs(60));
        storage.append_sample(&Sample::new(7, 120.0, 30.0)).unwrap();
        storage
            .execute_batch("ALTER TABLE measurements RENAME TO measurements_offline")
            .unwrap();

        let report = agent.run_cycle(&ShutdownSignal::never()).await;
        assert!(report.sync.is_none());

        storage
            .execute_batch("ALTER TABLE measurements_offline RENAME TO measurements")
            .unwrap();
        let report = agent.run_cycle(&ShutdownSignal::never()).await;
        assert_eq!(report.sync.unwrap().synced, 1);
        assert_eq!(storage.count_unsynced().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_mark_failure_aborts_pass_and_record_is_redelivered() {
        let (storage, mut agent) = agent(None, true, Duration::from_secs(60));
        storage.append_sample(&Sample::new(1, 120.0, 30.0)).unwrap();
        storage.append_sample(&Sample::new(2, 121.0, 31.0)).unwrap();
        storage.execute_batch(FAIL_UPDATES).unwrap();

        let report = agent.run_cycle(&ShutdownSignal::never()).await;
        assert!(report.sync.is_none());
        assert_eq!(storage.count_unsynced().unwrap(), 2);

        storage
            .execute_batch("DROP TRIGGER fail_updates")
            .unwrap();
        let report = agent.run_cycle(&ShutdownSignal::never()).await;
        assert_eq!(report.sync.unwrap().synced, 2);
        assert_eq!(storage.count_unsynced().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failure_bookkeeping_fault_aborts_pass() {
        let (storage, mut agent) = agent(None, false, Duration::from_secs(60));
        let id = storage.append_sample(&Sample::new(1, 120.0, 30.0)).unwrap();
        storage.execute_batch(FAIL_UPDATES).unwrap();

        let report = agent.run_cycle(&ShutdownSignal::never()).await;
        assert!(report.sync.is_none());
        assert_eq!(storage.get(id).unwrap().unwrap().attempts, 0);

        storage
            .execute_batch("DROP TRIGGER fail_updates")
            .unwrap();
        let report = agent.run_cycle(&ShutdownSignal::never()).await;
        assert_eq!(report.sync.unwrap().failed, 1);
        assert_eq!(storage.get(id).unwrap().unwrap().attempts, 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (storage, agent) = agent(fixed(), true, Duration::from_secs(3600));
        let shutdown = Shutdown::new();
        let handle = tokio::spawn(agent.run(shutdown.signal()));

        // The first cycle runs immediately, then the agent waits out the interval.
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.trigger();

        let summary = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("agent did not stop")
            .unwrap();
        assert_eq!(summary.cycles, 1);
        assert_eq!(summary.appended, 1);
        assert_eq!(summary.synced, 1);
        assert_eq!(storage.count_unsynced().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_run_with_shutdown_already_requested_does_nothing() {
        let (storage, agent) = agent(fixed(), true, Duration::from_secs(1));
        let shutdown = Shutdown::new();
        shutdown.trigger();

        let summary = agent.run(shutdown.signal()).await;
        assert_eq!(summary, AgentSummary::default());
        assert_eq!(storage.count().unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_repeats_on_interval() {
        let (storage, agent) = agent(fixed(), false, Duration::from_secs(60));
        let shutdown = Shutdown::new();
        let handle = tokio::spawn(agent.run(shutdown.signal()));

        tokio::time::sleep(Duration::from_secs(150)).await;
        shutdown.trigger();

        let summary = handle.await.unwrap();
        assert_eq!(summary.cycles, 3);
        assert_eq!(storage.count_unsynced().unwrap(), 3);
    }
}
