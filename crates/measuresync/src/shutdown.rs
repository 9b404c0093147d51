//! Graceful shutdown signalling.
//!
//! [`Shutdown`] is the trigger side, [`ShutdownSignal`] the observer side
//! handed to the agent loop and the sync engine.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, warn};

/// Trigger for a graceful shutdown. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

/// Observes whether shutdown has been requested.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Create a new, untriggered shutdown handle.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Get a signal that observes this handle.
    #[must_use]
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Request shutdown.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Check if shutdown has been requested.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    /// A signal that is never triggered.
    #[must_use]
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    /// Check if shutdown has been requested.
    #[must_use]
    pub fn is_requested(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until shutdown is requested.
    ///
    /// Never completes if the trigger is dropped without firing.
    pub async fn requested(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|requested| *requested).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Trigger `shutdown` on Ctrl+C.
///
/// The first Ctrl+C lets the current delivery finish; a second one exits
/// immediately with status 130.
pub fn install_ctrl_c_handler(shutdown: Shutdown) {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            return;
        }

        warn!("Shutdown requested, finishing current delivery (Ctrl+C again to force quit)");
        shutdown.trigger();

        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Force quit");
            std::process::exit(130);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_new_is_not_triggered() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.is_triggered());
        assert!(!shutdown.signal().is_requested());
    }

    #[test]
    fn test_trigger_is_seen_by_all_signals() {
        let shutdown = Shutdown::new();
        let before = shutdown.signal();
        shutdown.trigger();
        let after = shutdown.signal();

        assert!(shutdown.is_triggered());
        assert!(before.is_requested());
        assert!(after.is_requested());
    }

    #[test]
    fn test_clone_shares_trigger() {
        let shutdown = Shutdown::new();
        let signal = shutdown.signal();
        shutdown.clone().trigger();
        assert!(signal.is_requested());
    }

    #[tokio::test]
    async fn test_requested_completes_after_trigger() {
        let shutdown = Shutdown::new();
        let signal = shutdown.signal();

        let waiter = tokio::spawn(async move { signal.requested().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        shutdown.trigger();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("signal did not complete")
            .unwrap();
    }

    #[tokio::test]
    async fn test_requested_completes_if_already_triggered() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), shutdown.signal().requested())
            .await
            .expect("signal did not complete");
    }

    #[tokio::test]
    async fn test_never_stays_pending() {
        let signal = ShutdownSignal::never();
        assert!(!signal.is_requested());
        let result = tokio::time::timeout(Duration::from_millis(20), signal.requested()).await;
        assert!(result.is_err());
    }
}
