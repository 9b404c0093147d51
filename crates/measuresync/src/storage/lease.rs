//! Exclusive sync lease.
//!
//! Only one sync pass may work on a buffer file at a time, even across
//! processes. The holder is recorded in the `metadata` table together with an
//! expiry, written inside an immediate (write-locking) transaction. A holder
//! that dies without releasing simply lets the lease expire.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::Storage;
use crate::error::{Error, Result};
use crate::measurement::{format_timestamp, parse_timestamp};

/// Metadata key holding the current lease.
const LEASE_KEY: &str = "sync_lease";

#[derive(Debug, Serialize, Deserialize)]
struct Lease {
    holder: String,
    expires_at: String,
}

impl Lease {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        parse_timestamp(&self.expires_at).is_ok_and(|at| at > now)
    }
}

impl Storage {
    /// Take or extend the sync lease for `holder` until `ttl` from now.
    ///
    /// Returns `false` if another holder owns an unexpired lease. Calling it
    /// again while holding the lease renews it.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn acquire_sync_lease(&self, holder: &str, ttl: Duration) -> Result<bool> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| Error::internal(format!("sync lease ttl out of range: {e}")))?;
        let now = Utc::now();

        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if let Some(current) = read_lease(&tx)? {
            if current.holder != holder && current.is_live(now) {
                debug!(
                    "Sync lease held by {} until {}",
                    current.holder, current.expires_at
                );
                return Ok(false);
            }
        }

        let lease = Lease {
            holder: holder.to_string(),
            expires_at: format_timestamp(now + ttl),
        };
        tx.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
            params![LEASE_KEY, serde_json::to_string(&lease)?],
        )?;
        tx.commit()?;
        Ok(true)
    }

    /// Give up the sync lease if `holder` owns it.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn release_sync_lease(&self, holder: &str) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if read_lease(&tx)?.is_some_and(|lease| lease.holder == holder) {
            tx.execute("DELETE FROM metadata WHERE key = ?1", [LEASE_KEY])?;
        }
        tx.commit()?;
        Ok(())
    }
}

/// Read the stored lease. An unreadable value counts as no lease.
fn read_lease(conn: &rusqlite::Connection) -> Result<Option<Lease>> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM metadata WHERE key = ?1",
            [LEASE_KEY],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value.and_then(|v| serde_json::from_str(&v).ok()))
}
