use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

// ---------------------------------------------------------------------------
// ActivityTracker
// ---------------------------------------------------------------------------

/// Shared monotonic record of the last activity signal.
///
/// Content frames, in-stream heartbeats, and successful probes all call
/// [`touch`](Self::touch); the stall detector reads the result. Stored as
/// milliseconds past a fixed epoch so writers never take a lock.
#[derive(Debug)]
pub struct ActivityTracker {
    epoch: Instant,
    last_ms: AtomicU64,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self { epoch: Instant::now(), last_ms: AtomicU64::new(0) }
    }

    /// Record activity now. `fetch_max` keeps the timestamp monotonic even
    /// when signals race.
    pub fn touch(&self) {
        let ms = self.epoch.elapsed().as_millis() as u64;
        self.last_ms.fetch_max(ms, Ordering::Relaxed);
    }

    pub fn last_activity(&self) -> Instant {
        self.epoch + Duration::from_millis(self.last_ms.load(Ordering::Relaxed))
    }

    pub fn idle_for(&self) -> Duration {
        Instant::now().duration_since(self.last_activity())
    }
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// StallDetector
// ---------------------------------------------------------------------------

/// Watchdog over an [`ActivityTracker`].
///
/// [`stalled`](Self::stalled) resolves only once no activity of any kind has
/// been observed for the full timeout. Every `touch` pushes the deadline
/// out; the future re-checks after each sleep, so a signal landing just
/// before the deadline always wins. This is the sole authoritative death
/// signal for a connection — probe failures never are.
#[derive(Debug, Clone)]
pub struct StallDetector {
    activity: Arc<ActivityTracker>,
    timeout: Duration,
}

impl StallDetector {
    pub fn new(activity: Arc<ActivityTracker>, timeout: Duration) -> Self {
        Self { activity, timeout }
    }

    /// Instant at which, absent further activity, the connection is dead.
    pub fn deadline(&self) -> Instant {
        self.activity.last_activity() + self.timeout
    }

    /// Wait for a genuine stall. Cancel-safe: dropping the future arms
    /// nothing and leaks nothing.
    pub async fn stalled(&self) {
        loop {
            let deadline = self.deadline();
            if Instant::now() >= deadline {
                return;
            }
            tokio::time::sleep_until(deadline).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(100);

    #[test]
    fn test_touch_advances_last_activity() {
        tokio_test::block_on(async {
            let tracker = ActivityTracker::new();
            let before = tracker.last_activity();
            tokio::time::sleep(Duration::from_millis(5)).await;
            tracker.touch();
            assert!(tracker.last_activity() >= before);
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_exactly_the_timeout_with_no_signals() {
        let activity = Arc::new(ActivityTracker::new());
        let detector = StallDetector::new(activity, TIMEOUT);
        let start = Instant::now();
        detector.stalled().await;
        assert_eq!(Instant::now() - start, TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_at_timeout_minus_epsilon_rearms() {
        let activity = Arc::new(ActivityTracker::new());
        let detector = StallDetector::new(Arc::clone(&activity), TIMEOUT);
        let start = Instant::now();

        let waiter = tokio::spawn(async move {
            detector.stalled().await;
            Instant::now()
        });

        tokio::time::sleep(TIMEOUT - Duration::from_millis(1)).await;
        activity.touch();

        let fired_at = waiter.await.expect("waiter panicked");
        // One rearm: 99 ms of silence, a touch, then the full timeout again.
        assert_eq!(fired_at - start, TIMEOUT - Duration::from_millis(1) + TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_signals_keep_it_quiet() {
        let activity = Arc::new(ActivityTracker::new());
        let detector = StallDetector::new(Arc::clone(&activity), TIMEOUT);

        let waiter = tokio::spawn(async move {
            detector.stalled().await;
        });

        for _ in 0..5 {
            tokio::time::sleep(TIMEOUT / 2).await;
            activity.touch();
        }
        assert!(!waiter.is_finished(), "activity every timeout/2 must prevent firing");

        // Silence from here on: the watchdog must fire.
        waiter.await.expect("waiter panicked");
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_tracks_latest_touch() {
        let activity = Arc::new(ActivityTracker::new());
        let detector = StallDetector::new(Arc::clone(&activity), TIMEOUT);
        let first = detector.deadline();
        tokio::time::sleep(Duration::from_millis(10)).await;
        activity.touch();
        assert_eq!(detector.deadline(), first + Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_for_grows_with_silence() {
        let activity = ActivityTracker::new();
        activity.touch();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(activity.idle_for(), Duration::from_millis(40));
    }
}
