//! Background sweep of expired entries
//!
//! Entries that are written once and never read again would otherwise never be
//! expired lazily. The sweeper calls [`Cache::purge_expired`] on a fixed
//! interval until it is shut down or its handle is dropped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::cache::{Cache, SweepReport};

/// Shortest interval the sweeper accepts
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Handle for controlling the background sweep task
pub struct SweepHandle {
    /// Channel for receiving the report of each completed sweep
    pub receiver: mpsc::Receiver<SweepReport>,
    /// Flag to signal shutdown
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl SweepHandle {
    /// Spawns a sweep task using the cache's configured interval
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(cache: Arc<Cache>) -> Self {
        let interval = cache.config().sweep_interval;
        Self::spawn_with_interval(cache, interval)
    }

    /// Spawns a sweep task running every `interval`
    ///
    /// The first sweep happens one full interval after spawning.
    pub fn spawn_with_interval(cache: Arc<Cache>, interval: Duration) -> Self {
        let (report_tx, report_rx) = mpsc::channel(32);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let period = interval.max(MIN_INTERVAL);

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // Skip the first tick (immediate)
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let report = cache.purge_expired().await;
                        // Nobody draining the channel is fine; drop the report
                        let _ = report_tx.try_send(report);
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Sweeper shutting down");
                        break;
                    }
                }
            }
        });

        Self {
            receiver: report_rx,
            shutdown_tx,
            task,
        }
    }

    /// Stops the sweep task and waits for it to finish
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(()).await;
        let _ = (&mut self.task).await;
    }

    /// Whether the task has stopped
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for SweepHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Checks for a pending sweep report without blocking
pub fn try_recv(handle: &mut SweepHandle) -> Option<SweepReport> {
    handle.receiver.try_recv().ok()
}
