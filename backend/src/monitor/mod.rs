//! Cycle monitor
//!
//! Background task that polls the collector for the last completed cycle
//! and pushes every newly completed cycle number on a channel. The monitor
//! is the only async component; collector calls run on the blocking pool.
//!
//! # Critical Invariants
//!
//! 1. **Ordered and gapless**: cycles are sent in increasing order with no
//!    gaps, even when several complete between two polls.
//! 2. **Cancellation**: cancelling (or dropping) the monitor ends the task
//!    and closes the channel.

use crate::chain::Collector;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, warn};

const CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleMonitorOptions {
    pub poll_interval: Duration,
    /// Wait after a failed poll
    pub error_backoff: Duration,
    /// Last cycle already handled; `None` takes the first poll as baseline
    pub start_after: Option<i64>,
}

impl Default for CycleMonitorOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            error_backoff: Duration::from_secs(30),
            start_after: None,
        }
    }
}

/// Handle on a running cycle monitor
#[derive(Debug)]
pub struct CycleMonitor {
    cancel: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl CycleMonitor {
    /// Start polling on the current tokio runtime
    ///
    /// # Returns
    /// The monitor handle and the receiving end of the cycle channel.
    pub fn spawn(
        collector: Arc<dyn Collector + Send + Sync>,
        options: CycleMonitorOptions,
    ) -> (Self, mpsc::Receiver<i64>) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let handle = tokio::spawn(poll_cycles(collector, options, tx, cancel_rx));
        (
            Self {
                cancel: Some(cancel_tx),
                handle: Some(handle),
            },
            rx,
        )
    }

    /// Ask the task to stop; the channel closes once it has
    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }

    /// Cancel and wait for the task to finish
    pub async fn shutdown(mut self) {
        self.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                error!(error = %e, "cycle monitor task failed");
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl Drop for CycleMonitor {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn poll_cycles(
    collector: Arc<dyn Collector + Send + Sync>,
    options: CycleMonitorOptions,
    tx: mpsc::Sender<i64>,
    mut cancel: oneshot::Receiver<()>,
) {
    info!(
        poll_interval_secs = options.poll_interval.as_secs(),
        start_after = ?options.start_after,
        "cycle monitor starting"
    );
    let mut last = options.start_after;

    loop {
        let polled = {
            let collector = Arc::clone(&collector);
            tokio::task::spawn_blocking(move || collector.get_last_completed_cycle()).await
        };

        let wait = match polled {
            Ok(Ok(current)) => {
                match last {
                    None => {
                        info!(cycle = current, "cycle monitor baseline");
                        last = Some(current);
                    }
                    Some(previous) if current > previous => {
                        for cycle in previous + 1..=current {
                            debug!(cycle, "cycle completed");
                            if tx.send(cycle).await.is_err() {
                                info!("cycle receiver dropped, monitor stopping");
                                return;
                            }
                        }
                        last = Some(current);
                    }
                    Some(_) => {}
                }
                options.poll_interval
            }
            Ok(Err(e)) => {
                warn!(error = %e, backoff_secs = options.error_backoff.as_secs(), "failed to poll last completed cycle");
                options.error_backoff
            }
            Err(e) => {
                error!(error = %e, "cycle poll task panicked");
                options.error_backoff
            }
        };

        tokio::select! {
            biased;
            _ = &mut cancel => {
                info!("cycle monitor cancelled");
                return;
            }
            _ = time::sleep(wait) => {}
        }
    }
}
