//! Periodic expiry sweeps for the in-memory managers.
//!
//! Every manager exposes a synchronous `sweep()` that drops expired state.
//! A [`Sweeper`] drives it on a fixed period until cancelled, so tests can
//! call `sweep()` directly while production relies on the background task.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// State that can drop its own expired entries.
pub trait Sweep: Send + Sync + 'static {
    /// Remove expired entries and return how many were removed.
    fn sweep(&self) -> usize;
}

/// Shortest period a sweep task runs at.
pub const MIN_SWEEP_PERIOD: Duration = Duration::from_secs(1);

/// Handle to a running background sweep task.
pub struct Sweeper {
    name: &'static str,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Sweeper {
    /// Spawn a task that sweeps `target` every `period`.
    ///
    /// The first pass runs one `period` after spawning. Periods below
    /// [`MIN_SWEEP_PERIOD`] are raised to it.
    pub fn spawn<T: Sweep>(name: &'static str, target: Arc<T>, period: Duration) -> Self {
        let period = if period < MIN_SWEEP_PERIOD {
            warn!(sweeper = name, ?period, "Sweep period too short, using the minimum");
            MIN_SWEEP_PERIOD
        } else {
            period
        };

        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();

        let handle = tokio::spawn(async move {
            run_sweep_loop(name, target, period, cancel_clone).await;
        });

        Self {
            name,
            cancel,
            handle,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Signal the task to stop and wait for it. A pass already running completes.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!(sweeper = self.name, error = %e, "Sweep task ended abnormally");
        }
    }
}

async fn run_sweep_loop<T: Sweep>(
    name: &'static str,
    target: Arc<T>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(sweeper = name, period_secs = period.as_secs(), "Sweep task started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!(sweeper = name, "Sweep task shutting down");
                break;
            }
            _ = ticker.tick() => {
                let removed = target.sweep();
                if removed > 0 {
                    debug!(sweeper = name, removed, "Sweep pass removed expired entries");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingTarget {
        passes: AtomicUsize,
    }

    impl Sweep for CountingTarget {
        fn sweep(&self) -> usize {
            self.passes.fetch_add(1, Ordering::SeqCst);
            0
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_runs_every_period() {
        let target = Arc::new(CountingTarget::default());
        let sweeper = Sweeper::spawn("test", target.clone(), Duration::from_secs(10));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(target.passes.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(26)).await;
        assert_eq!(target.passes.load(Ordering::SeqCst), 3);

        sweeper.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_period_is_raised_to_minimum() {
        let target = Arc::new(CountingTarget::default());
        let sweeper = Sweeper::spawn("zero", target.clone(), Duration::ZERO);

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(target.passes.load(Ordering::SeqCst), 2);

        // The task is still alive, so shutdown completes cleanly.
        sweeper.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_stops_after_shutdown() {
        let target = Arc::new(CountingTarget::default());
        let sweeper = Sweeper::spawn("test", target.clone(), Duration::from_secs(1));
        assert_eq!(sweeper.name(), "test");

        tokio::time::sleep(Duration::from_millis(1500)).await;
        sweeper.shutdown().await;
        let passes = target.passes.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(target.passes.load(Ordering::SeqCst), passes);
    }
}
