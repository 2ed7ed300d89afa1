use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::Client;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::error::RestreamError;
use crate::protocol::ProbeResponse;
use crate::stall::ActivityTracker;

// ---------------------------------------------------------------------------
// HeartbeatRecord
// ---------------------------------------------------------------------------

/// Last confirmed liveness signal. Written by the heartbeat monitor (and by
/// in-stream heartbeat frames), read by the UI collaborator.
///
/// Connectivity here is advisory only — a failed probe marks the link down
/// for display purposes but never fails the session. The stall detector is
/// the sole authority on connection death.
#[derive(Debug, Clone, Default)]
pub struct HeartbeatRecord {
    /// Server-reported timestamp of the most recent signal.
    pub last_seen: Option<u64>,
    pub connected: bool,
}

impl HeartbeatRecord {
    pub fn observe(&mut self, timestamp: u64) {
        self.last_seen = Some(timestamp);
        self.connected = true;
    }

    pub fn mark_down(&mut self) {
        self.connected = false;
    }
}

/// Lock without propagating poison; a panicked writer leaves the record
/// readable with its last value.
pub(crate) fn lock_record(record: &Mutex<HeartbeatRecord>) -> std::sync::MutexGuard<'_, HeartbeatRecord> {
    record.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// HeartbeatMonitor
// ---------------------------------------------------------------------------

/// Periodic out-of-band liveness probe, one per exchange.
///
/// Runs `GET /heartbeat-probe` at a fixed interval; a success updates the
/// shared record and counts as stream activity (rearming the stall
/// detector). Returns a guard whose `Drop` aborts the task, so teardown is
/// tied to scope exit and cannot be forgotten on any path out of a stream.
pub struct HeartbeatMonitor;

impl HeartbeatMonitor {
    pub fn spawn(
        client: Client,
        probe_url: String,
        interval: Duration,
        record: Arc<Mutex<HeartbeatRecord>>,
        activity: Arc<ActivityTracker>,
    ) -> HeartbeatGuard {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // interval fires immediately; the stream itself just produced
            // activity, so wait a full period before the first probe
            ticker.tick().await;

            let mut consecutive_failures: u32 = 0;

            loop {
                ticker.tick().await;

                match probe(&client, &probe_url).await {
                    Ok(timestamp) => {
                        consecutive_failures = 0;
                        lock_record(&record).observe(timestamp);
                        activity.touch();
                        debug!(timestamp, "liveness probe ok");
                    }
                    Err(e) => {
                        consecutive_failures = consecutive_failures.saturating_add(1);
                        lock_record(&record).mark_down();
                        if consecutive_failures >= 5 {
                            error!(
                                error = %e,
                                url = %probe_url,
                                consecutive_failures,
                                "liveness probe failing repeatedly, will retry next tick"
                            );
                        } else {
                            warn!(error = %e, url = %probe_url, "liveness probe failed, will retry next tick");
                        }
                    }
                }
            }
        });

        HeartbeatGuard { handle }
    }
}

async fn probe(client: &Client, url: &str) -> Result<u64, RestreamError> {
    let resp = client.get(url).send().await?;
    if !resp.status().is_success() {
        return Err(RestreamError::Http {
            status: resp.status().as_u16(),
            url: url.to_string(),
        });
    }
    let body: ProbeResponse = resp.json().await?;
    Ok(body.timestamp)
}

/// Aborts the probe task when dropped.
pub struct HeartbeatGuard {
    handle: JoinHandle<()>,
}

impl Drop for HeartbeatGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_starts_disconnected() {
        let record = HeartbeatRecord::default();
        assert!(!record.connected);
        assert!(record.last_seen.is_none());
    }

    #[test]
    fn test_observe_marks_connected() {
        let mut record = HeartbeatRecord::default();
        record.observe(1_722_945_600_000);
        assert!(record.connected);
        assert_eq!(record.last_seen, Some(1_722_945_600_000));
    }

    #[test]
    fn test_mark_down_keeps_last_seen() {
        let mut record = HeartbeatRecord::default();
        record.observe(42);
        record.mark_down();
        assert!(!record.connected);
        assert_eq!(record.last_seen, Some(42), "last_seen survives a downed link");
    }

    #[test]
    fn test_lock_record_survives_poison() {
        let record = Arc::new(Mutex::new(HeartbeatRecord::default()));
        let cloned = Arc::clone(&record);
        let _ = std::thread::spawn(move || {
            let _guard = cloned.lock().expect("first lock");
            panic!("poison the mutex");
        })
        .join();
        lock_record(&record).observe(7);
        assert_eq!(lock_record(&record).last_seen, Some(7));
    }

    #[tokio::test]
    async fn test_dropped_guard_stops_probing() {
        let record = Arc::new(Mutex::new(HeartbeatRecord::default()));
        let activity = Arc::new(ActivityTracker::new());
        let before = activity.last_activity();
        let guard = HeartbeatMonitor::spawn(
            Client::new(),
            // unroutable; a probe could only ever fail
            "http://127.0.0.1:1/heartbeat-probe".to_string(),
            Duration::from_millis(10),
            Arc::clone(&record),
            Arc::clone(&activity),
        );
        drop(guard);
        tokio::time::sleep(Duration::from_millis(50)).await;
        // the aborted task never probed, so it never touched anything
        assert_eq!(activity.last_activity(), before);
        assert!(lock_record(&record).last_seen.is_none());
    }
}
