//! Background progress monitor for batch dispatch.
//!
//! Periodically logs dispatch counters (jobs launched, completed, failed,
//! rewarded) so operators can track long-running batches without parsing
//! individual task log lines.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

/// Snapshot of dispatch counters at a point in time.
#[derive(Debug, Clone)]
pub struct DispatchSnapshot {
    /// Jobs handed to the runner so far.
    pub launched: usize,
    /// Jobs whose harbor process exited zero.
    pub completed: usize,
    /// Jobs that failed, timed out, or could not be spawned.
    pub failed: usize,
    /// Jobs for which a reward was read back from the run directory.
    pub rewarded: usize,
    /// Wall-clock elapsed time since the monitor started.
    pub elapsed: Duration,
}

/// Shared atomic counters incremented by dispatch workers.
#[derive(Debug, Clone, Default)]
pub struct DispatchCounters {
    pub launched: Arc<AtomicUsize>,
    pub completed: Arc<AtomicUsize>,
    pub failed: Arc<AtomicUsize>,
    pub rewarded: Arc<AtomicUsize>,
}

impl DispatchCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a snapshot of the current counter values.
    pub fn snapshot(&self, start: Instant) -> DispatchSnapshot {
        DispatchSnapshot {
            launched: self.launched.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            rewarded: self.rewarded.load(Ordering::Relaxed),
            elapsed: start.elapsed(),
        }
    }
}

/// A background task that periodically logs dispatch progress.
///
/// Call [`DispatchMonitor::stop`] to cancel; dropping it also signals stop.
pub struct DispatchMonitor {
    stop_flag: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl DispatchMonitor {
    /// Start a monitor that logs every `interval`.
    pub fn start(counters: DispatchCounters, total_jobs: usize, interval: Duration) -> Self {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let flag = stop_flag.clone();
        let start = Instant::now();

        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.tick().await; // skip the immediate first tick

            loop {
                tick.tick().await;
                if flag.load(Ordering::Relaxed) {
                    break;
                }

                let snap = counters.snapshot(start);
                let done = snap.completed + snap.failed;
                let pct = if total_jobs > 0 {
                    (done as f64 / total_jobs as f64 * 100.0).min(100.0)
                } else {
                    0.0
                };

                tracing::info!(
                    launched = snap.launched,
                    completed = snap.completed,
                    failed = snap.failed,
                    rewarded = snap.rewarded,
                    total_jobs = total_jobs,
                    progress_pct = format!("{:.1}%", pct),
                    elapsed_secs = snap.elapsed.as_secs(),
                    "Batch progress"
                );
            }
        });

        Self {
            stop_flag,
            handle: Some(handle),
        }
    }

    /// Signal the background monitor to stop and wait for it to finish.
    pub async fn stop(mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for DispatchMonitor {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
    }
}
