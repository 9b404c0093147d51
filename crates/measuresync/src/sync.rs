//! Sync engine: delivers buffered measurements to the remote API.
//!
//! A pass walks the unsynced records oldest first. Each record is attempted
//! independently; a failure is recorded on the record and the pass moves on.
//! A record is marked synced only after the API confirmed creation.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::MeasurementApi;
use crate::config::Config;
use crate::error::Result;
use crate::shutdown::ShutdownSignal;
use crate::storage::Storage;

/// Lease duration used unless [`SyncEngine::with_lease_ttl`] overrides it.
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(120);

/// Per-record exponential backoff.
///
/// After the n-th consecutive failure a record waits
/// `min(initial_backoff * 2^(n-1), max_backoff)` before its next attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Whether backoff is applied at all.
    pub enabled: bool,
    /// Delay after the first failure.
    pub initial_backoff: Duration,
    /// Upper bound on the delay.
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Create an enabled policy.
    #[must_use]
    pub fn new(initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            enabled: true,
            initial_backoff,
            max_backoff,
        }
    }

    /// A policy that retries every record on every pass.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Build the policy described by the configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        if config.sync.backoff_enabled {
            Self::new(config.initial_backoff(), config.max_backoff())
        } else {
            Self::disabled()
        }
    }

    /// Delay before the next attempt after `failures` consecutive failures.
    #[must_use]
    pub fn delay_for(&self, failures: u32) -> Option<Duration> {
        if !self.enabled || failures == 0 {
            return None;
        }
        let exponent = (failures - 1).min(31);
        let delay = self
            .initial_backoff
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_backoff);
        Some(delay.min(self.max_backoff))
    }

    /// Earliest time of the next attempt after `failures` consecutive failures.
    #[must_use]
    pub fn next_attempt_at(&self, failures: u32, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let delay = chrono::Duration::from_std(self.delay_for(failures)?).ok()?;
        now.checked_add_signed(delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(60), Duration::from_secs(3600))
    }
}

/// Outcome counts of one sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Records sent to the API.
    pub attempted: usize,
    /// Records confirmed and marked synced.
    pub synced: usize,
    /// Records that failed delivery and stay unsynced.
    pub failed: usize,
    /// Records skipped because their backoff has not elapsed.
    pub deferred: usize,
    /// Whether the pass stopped early for shutdown or a lost lease.
    pub interrupted: bool,
    /// Whether the pass was skipped because another pass holds the buffer.
    pub busy: bool,
}

impl SyncReport {
    /// Whether the pass had nothing to do.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.attempted == 0 && self.deferred == 0
    }
}

impl std::fmt::Display for SyncReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.busy {
            return write!(f, "skipped, another sync pass is running");
        }
        write!(
            f,
            "{} synced, {} failed, {} deferred",
            self.synced, self.failed, self.deferred
        )?;
        if self.interrupted {
            write!(f, " (interrupted)")?;
        }
        Ok(())
    }
}

/// Delivers unsynced records from the buffer to the remote API.
///
/// A pass holds the buffer's sync lease for its whole duration, so passes
/// from different engines or processes never overlap.
#[derive(Debug)]
pub struct SyncEngine {
    storage: Arc<Storage>,
    api: Arc<dyn MeasurementApi>,
    policy: RetryPolicy,
    holder: String,
    lease_ttl: Duration,
}

impl SyncEngine {
    /// Create an engine over `storage` delivering to `api`.
    #[must_use]
    pub fn new(storage: Arc<Storage>, api: Arc<dyn MeasurementApi>, policy: RetryPolicy) -> Self {
        Self {
            storage,
            api,
            policy,
            holder: format!("{}-{}", std::process::id(), Uuid::new_v4()),
            lease_ttl: DEFAULT_LEASE_TTL,
        }
    }

    /// Set how long the sync lease stays valid without renewal.
    ///
    /// The lease is renewed before every delivery, so this must exceed the
    /// request timeout.
    #[must_use]
    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    /// Identity this engine uses for the sync lease.
    #[must_use]
    pub fn lease_holder(&self) -> &str {
        &self.holder
    }

    /// The retry policy in use.
    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Run one sync pass.
    ///
    /// Delivery failures are recorded per record and never abort the pass.
    /// Once `shutdown` is requested no further records are attempted; an
    /// in-flight delivery is completed and recorded first. If another pass
    /// holds the buffer, nothing is attempted and the report is `busy`.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer cannot be read or updated; the pass
    /// stops at that point and the remaining records wait for the next pass.
    pub async fn run_pass(&self, shutdown: &ShutdownSignal) -> Result<SyncReport> {
        if !self
            .storage
            .acquire_sync_lease(&self.holder, self.lease_ttl)?
        {
            info!("Another sync pass holds the buffer, skipping this pass");
            return Ok(SyncReport {
                busy: true,
                ..SyncReport::default()
            });
        }

        let result = self.deliver_unsynced(shutdown).await;
        if let Err(e) = self.storage.release_sync_lease(&self.holder) {
            warn!("Failed to release sync lease: {}", e);
        }
        result
    }

    async fn deliver_unsynced(&self, shutdown: &ShutdownSignal) -> Result<SyncReport> {
        let records = self.storage.list_unsynced()?;
        let mut report = SyncReport::default();
        if records.is_empty() {
            debug!("No unsynced measurements");
            return Ok(report);
        }

        debug!("Sync pass over {} unsynced measurements", records.len());
        let started = Utc::now();

        for record in records {
            if shutdown.is_requested() {
                info!("Shutdown requested, stopping sync pass");
                report.interrupted = true;
                break;
            }

            if self.policy.enabled && !record.is_due(started) {
                debug!(
                    "Deferring measurement ID {} until {:?}",
                    record.id, record.next_attempt_at
                );
                report.deferred += 1;
                continue;
            }

            if !self
                .storage
                .acquire_sync_lease(&self.holder, self.lease_ttl)?
            {
                warn!("Sync lease lost to another pass, stopping");
                report.interrupted = true;
                break;
            }

            report.attempted += 1;
            match self.api.create_measurement(&record.to_payload()).await {
                Ok(created) => {
                    if !self.storage.mark_synced(record.id)? {
                        debug!("Measurement ID {} was already synced", record.id);
                    }
                    report.synced += 1;
                    match created.id {
                        Some(remote_id) => info!(
                            "Synced measurement ID {} (remote ID {})",
                            record.id, remote_id
                        ),
                        None => info!("Synced measurement ID {}", record.id),
                    }
                }
                Err(err) => {
                    report.failed += 1;
                    let failures = record.attempts.saturating_add(1);
                    let next_attempt_at = self.policy.next_attempt_at(failures, Utc::now());
                    warn!(
                        "Failed to sync measurement ID {} (attempt {}): {}",
                        record.id, failures, err
                    );
                    self.storage
                        .record_failure(record.id, &err.to_string(), next_attempt_at)?;
                }
            }
        }

        Ok(report)
    }
}
