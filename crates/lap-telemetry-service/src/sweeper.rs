use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

use lap_telemetry_core::{now_utc, TelemetryError};
use lap_telemetry_store_sqlite::SqliteTelemetryStore;
use serde::Serialize;
use time::OffsetDateTime;

use crate::config::RetentionConfig;
use crate::registry::LapRegistry;

/// Summary of one sweep pass.
#[derive(Debug, Clone, Copy, Serialize, Default, Eq, PartialEq)]
pub struct SweepReport {
    pub examined: usize,
    pub swept: usize,
    pub failed: usize,
}

/// Periodically deletes laps older than the retention window, cascading to
/// their parameters. Runs independently of request traffic and takes no
/// cross-operation locks: an append racing a sweep either fails `NotFound`
/// or its write is removed by the cascade.
pub struct RetentionSweeper {
    registry: LapRegistry,
    store: Arc<SqliteTelemetryStore>,
    config: RetentionConfig,
}

impl RetentionSweeper {
    #[must_use]
    pub fn new(store: Arc<SqliteTelemetryStore>, config: RetentionConfig) -> Self {
        Self {
            registry: LapRegistry::new(Arc::clone(&store)),
            store,
            config,
        }
    }

    /// One cutoff-based deletion pass. The expired set is snapshotted once,
    /// so laps created during the sweep are never affected. Per-lap failures
    /// are logged and counted; the next scheduled sweep retries them.
    ///
    /// # Errors
    /// Returns [`TelemetryError::StorageFailure`] only when the snapshot
    /// query itself fails.
    pub fn sweep_once(&self, now: OffsetDateTime) -> Result<SweepReport, TelemetryError> {
        let cutoff = now - self.config.retention_window();
        let expired = self.store.laps_created_before(cutoff)?;

        let mut report = SweepReport {
            examined: expired.len(),
            ..SweepReport::default()
        };

        for lap in expired {
            match self.registry.delete(lap.lap_id) {
                Ok(()) => report.swept += 1,
                // Already gone: a concurrent pass or an earlier retry got it.
                Err(TelemetryError::NotFound(_)) => report.swept += 1,
                Err(err) => {
                    report.failed += 1;
                    tracing::warn!(lap = %lap.name, error = %err, "failed to sweep expired lap");
                }
            }
        }

        tracing::info!(
            examined = report.examined,
            swept = report.swept,
            failed = report.failed,
            "retention sweep finished"
        );
        Ok(report)
    }

    /// Starts the periodic sweep thread. Sweeping begins one full interval
    /// after start; call [`SweeperHandle::stop`] to shut it down.
    #[must_use]
    pub fn spawn(self) -> SweeperHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let interval = self.config.sweep_interval();

        let join = std::thread::spawn(move || loop {
            match shutdown_rx.recv_timeout(interval) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    if let Err(err) = self.sweep_once(now_utc()) {
                        tracing::warn!(error = %err, "retention sweep failed; retrying next interval");
                    }
                }
            }
        });

        SweeperHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        }
    }
}

/// Lifecycle handle for the background sweep thread.
pub struct SweeperHandle {
    shutdown: Sender<()>,
    join: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Signals shutdown and joins the sweep thread.
    pub fn stop(mut self) {
        self.shutdown_and_join();
    }

    fn shutdown_and_join(&mut self) {
        let _ = self.shutdown.send(());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}
