//! Stall detection watchdog.
//!
//! Both worker loops stamp a shared [`ActivityClock`] on every tick. The
//! watchdog warns when the worker-drained queues hold runs but no tick has
//! completed for longer than the threshold.

use crate::registry::RunQueues;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default stall detection threshold (30 seconds).
pub const STALL_DETECTION_THRESHOLD_MS: u64 = 30_000;

/// Default watchdog check interval (10 seconds).
pub const STALL_WATCHDOG_INTERVAL_SECS: u64 = 10;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Timestamp of the latest worker tick.
#[derive(Debug)]
pub struct ActivityClock {
    last_tick_ms: AtomicU64,
}

impl Default for ActivityClock {
    fn default() -> Self {
        Self {
            last_tick_ms: AtomicU64::new(now_ms()),
        }
    }
}

impl ActivityClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a completed tick.
    pub fn touch(&self) {
        self.last_tick_ms.store(now_ms(), Ordering::Relaxed);
    }

    /// Milliseconds since the last tick.
    pub fn elapsed_ms(&self) -> u64 {
        now_ms().saturating_sub(self.last_tick_ms.load(Ordering::Relaxed))
    }
}

/// Stall detection watchdog for the worker loops.
pub struct StallWatchdog {
    activity: Arc<ActivityClock>,
    queues: Arc<RunQueues>,
    threshold_ms: u64,
    interval: Duration,
}

impl StallWatchdog {
    /// Creates a watchdog with the default threshold and interval.
    pub fn new(activity: Arc<ActivityClock>, queues: Arc<RunQueues>) -> Self {
        Self {
            activity,
            queues,
            threshold_ms: STALL_DETECTION_THRESHOLD_MS,
            interval: Duration::from_secs(STALL_WATCHDOG_INTERVAL_SECS),
        }
    }

    /// Runs the watchdog until cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    self.check_health();
                }
            }
        }
    }

    /// Returns true if a stall was detected.
    fn check_health(&self) -> bool {
        let elapsed_ms = self.activity.elapsed_ms();
        let queued = self.queues.active_len();

        match (elapsed_ms > self.threshold_ms, queued > 0) {
            (true, true) => {
                warn!(
                    elapsed_ms,
                    queued_runs = queued,
                    threshold_ms = self.threshold_ms,
                    "STALL DETECTED: {} runs queued but no worker tick for {}s",
                    queued,
                    elapsed_ms / 1000
                );
                true
            }
            (true, false) => {
                debug!(elapsed_ms, "Stall watchdog: workers idle (no queued runs)");
                false
            }
            (false, _) => {
                debug!(elapsed_ms, queued_runs = queued, "Stall watchdog: workers healthy");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::QueueKind;
    use crate::run::RunId;

    #[test]
    fn test_watchdog_defaults() {
        let watchdog = StallWatchdog::new(Arc::new(ActivityClock::new()), Arc::default());
        assert_eq!(watchdog.threshold_ms, STALL_DETECTION_THRESHOLD_MS);
        assert_eq!(
            watchdog.interval,
            Duration::from_secs(STALL_WATCHDOG_INTERVAL_SECS)
        );
    }

    #[test]
    fn test_stall_requires_queued_runs() {
        let clock = Arc::new(ActivityClock {
            last_tick_ms: AtomicU64::new(now_ms() - 60_000),
        });
        let queues = Arc::new(RunQueues::new());
        let watchdog = StallWatchdog::new(clock.clone(), queues.clone());

        assert!(!watchdog.check_health());
        queues.push_back(QueueKind::ReadyRun, RunId::new(1));
        assert!(watchdog.check_health());

        clock.touch();
        assert!(!watchdog.check_health());
        assert!(clock.elapsed_ms() < 1_000);
    }

    #[tokio::test]
    async fn test_watchdog_stops_on_cancellation() {
        let watchdog = StallWatchdog::new(Arc::new(ActivityClock::new()), Arc::default());
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let result = tokio::time::timeout(Duration::from_millis(100), watchdog.run(shutdown)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_watchdog_checks_on_every_tick() {
        let clock = Arc::new(ActivityClock {
            last_tick_ms: AtomicU64::new(now_ms() - 60_000),
        });
        let queues = Arc::new(RunQueues::new());
        queues.push_back(QueueKind::Prepare, RunId::new(7));
        let watchdog = StallWatchdog {
            activity: clock,
            queues,
            threshold_ms: STALL_DETECTION_THRESHOLD_MS,
            interval: Duration::from_millis(5),
        };
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(watchdog.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!task.is_finished());

        shutdown.cancel();
        let joined = tokio::time::timeout(Duration::from_millis(200), task).await;
        assert!(matches!(joined, Ok(Ok(()))));
    }
}
