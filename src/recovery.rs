use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rand::Rng;

// ---------------------------------------------------------------------------
// RecoveryStats
// ---------------------------------------------------------------------------

/// Process-lifetime counters for the out-of-band recovery fetch.
///
/// Observability only — nothing reads these for control flow. They are never
/// reset; the ratio they feed answers "how often does recovery actually get
/// the answer back".
#[derive(Debug, Default)]
pub struct RecoveryStats {
    attempts: AtomicU64,
    successes: AtomicU64,
}

impl RecoveryStats {
    pub fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.successes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    /// Success percentage over all attempts, 0.0 when none were made.
    pub fn recovery_rate(&self) -> f64 {
        let attempts = self.attempts();
        if attempts == 0 {
            return 0.0;
        }
        self.successes() as f64 / attempts as f64 * 100.0
    }
}

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

/// Reconnect pause: the configured base ±25%, so a fleet of clients that
/// lost the same server does not retry in lockstep.
pub fn jittered_backoff(base: Duration) -> Duration {
    if base.is_zero() {
        return base;
    }
    let base_ms = base.as_millis() as u64;
    let spread = (base_ms / 4).max(1);
    let jitter = rand::thread_rng().gen_range(0..=spread * 2);
    Duration::from_millis(base_ms - spread + jitter)
}
