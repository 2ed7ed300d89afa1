use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use futures_util::future::join_all;
use reqwest::Client;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::RestreamError;
use crate::protocol::MessageRecoveryResponse;

/// Appended to the displayed text when the authoritative fetch fails.
pub const INCOMPLETE_NOTICE: &str = "\n\n[response may be incomplete]";

#[derive(Debug, Clone)]
struct PendingMessage {
    displayed: String,
    last_update: Instant,
}

/// Outcome of resolving one stalled message.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageResolution {
    pub message_id: String,
    /// Text the UI should now display.
    pub content: String,
    /// Whether `content` differs from what was displayed before.
    pub changed: bool,
    /// Whether the authoritative content was actually fetched.
    pub recovered: bool,
}

// ---------------------------------------------------------------------------
// StalledMessageWatchdog
// ---------------------------------------------------------------------------

/// Recovery for the out-of-stream message channel.
///
/// Messages delivered over the companion transport are registered here while
/// updates keep arriving. When one goes silent past the timeout, the
/// watchdog fetches the authoritative final content exactly once, replaces
/// the displayed text only if it differs, and clears the pending entry
/// before the fetch even starts — whatever the fetch does, no message stays
/// "loading" forever. A failed fetch appends [`INCOMPLETE_NOTICE`] instead.
pub struct StalledMessageWatchdog {
    client: Client,
    base_url: String,
    timeout: Duration,
    pending: Mutex<HashMap<String, PendingMessage>>,
}

impl StalledMessageWatchdog {
    pub fn new(client: Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            timeout,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Register a message as pending with its currently displayed text.
    pub fn track(&self, message_id: impl Into<String>, displayed: impl Into<String>) {
        self.lock().insert(
            message_id.into(),
            PendingMessage { displayed: displayed.into(), last_update: Instant::now() },
        );
    }

    /// Record a fresh update for a tracked message, resetting its deadline.
    /// Unknown ids are ignored — the message already resolved.
    pub fn update(&self, message_id: &str, displayed: impl Into<String>) {
        if let Some(entry) = self.lock().get_mut(message_id) {
            entry.displayed = displayed.into();
            entry.last_update = Instant::now();
        }
    }

    pub fn is_pending(&self, message_id: &str) -> bool {
        self.lock().contains_key(message_id)
    }

    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    /// Resolve every message that has gone silent past the timeout.
    /// Stale entries leave the pending set immediately; resolutions are
    /// fetched concurrently.
    pub async fn sweep(&self) -> Vec<MessageResolution> {
        let stale = self.take_stale();
        if stale.is_empty() {
            return Vec::new();
        }
        debug!(count = stale.len(), "resolving stalled messages");
        join_all(
            stale
                .into_iter()
                .map(|(id, displayed)| self.resolve_against(id, displayed)),
        )
        .await
    }

    /// Force-resolve one tracked message now, regardless of its deadline.
    /// Returns `None` when the id is not pending (already resolved).
    pub async fn resolve(&self, message_id: &str) -> Option<MessageResolution> {
        let entry = self.lock().remove(message_id)?;
        Some(self.resolve_against(message_id.to_string(), entry.displayed).await)
    }

    /// Remove and return every entry whose deadline has passed.
    fn take_stale(&self) -> Vec<(String, String)> {
        let now = Instant::now();
        let mut pending = self.lock();
        let stale_ids: Vec<String> = pending
            .iter()
            .filter(|(_, m)| now.duration_since(m.last_update) >= self.timeout)
            .map(|(id, _)| id.clone())
            .collect();
        stale_ids
            .into_iter()
            .filter_map(|id| pending.remove(&id).map(|m| (id, m.displayed)))
            .collect()
    }

    async fn resolve_against(&self, message_id: String, displayed: String) -> MessageResolution {
        match self.fetch_final(&message_id).await {
            Ok(resp) if resp.success => {
                let changed = resp.content != displayed;
                debug!(message_id = %message_id, changed, "authoritative content fetched");
                MessageResolution {
                    message_id,
                    content: if changed { resp.content } else { displayed },
                    changed,
                    recovered: true,
                }
            }
            Ok(_) => {
                warn!(message_id = %message_id, "server had no final content for stalled message");
                MessageResolution {
                    message_id,
                    content: format!("{displayed}{INCOMPLETE_NOTICE}"),
                    changed: true,
                    recovered: false,
                }
            }
            Err(e) => {
                warn!(message_id = %message_id, error = %e, "stalled-message fetch failed");
                MessageResolution {
                    message_id,
                    content: format!("{displayed}{INCOMPLETE_NOTICE}"),
                    changed: true,
                    recovered: false,
                }
            }
        }
    }

    async fn fetch_final(&self, message_id: &str) -> Result<MessageRecoveryResponse, RestreamError> {
        let url = format!(
            "{}/recover-message/{}",
            self.base_url.trim_end_matches('/'),
            message_id
        );
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(RestreamError::Http { status: resp.status().as_u16(), url });
        }
        Ok(resp.json::<MessageRecoveryResponse>().await?)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, PendingMessage>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn watchdog(timeout_ms: u64) -> StalledMessageWatchdog {
        StalledMessageWatchdog::new(
            Client::new(),
            "http://localhost:8080",
            Duration::from_millis(timeout_ms),
        )
    }

    #[test]
    fn test_track_makes_message_pending() {
        let dog = watchdog(100);
        dog.track("m1", "partial");
        assert!(dog.is_pending("m1"));
        assert_eq!(dog.pending_count(), 1);
    }

    #[test]
    fn test_update_unknown_id_is_ignored() {
        let dog = watchdog(100);
        dog.update("ghost", "text");
        assert!(!dog.is_pending("ghost"));
    }

    #[test]
    fn test_track_same_id_twice_keeps_one_entry() {
        let dog = watchdog(100);
        dog.track("m1", "a");
        dog.track("m1", "b");
        assert_eq!(dog.pending_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_take_stale_respects_deadline() {
        let dog = watchdog(100);
        dog.track("old", "a");
        tokio::time::sleep(Duration::from_millis(60)).await;
        dog.track("fresh", "b");
        tokio::time::sleep(Duration::from_millis(40)).await;

        let stale = dog.take_stale();
        assert_eq!(stale, vec![("old".to_string(), "a".to_string())]);
        assert!(!dog.is_pending("old"), "stale entries leave the set immediately");
        assert!(dog.is_pending("fresh"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_resets_the_deadline() {
        let dog = watchdog(100);
        dog.track("m1", "v1");
        tokio::time::sleep(Duration::from_millis(90)).await;
        dog.update("m1", "v2");
        tokio::time::sleep(Duration::from_millis(90)).await;
        assert!(dog.take_stale().is_empty(), "update must rearm the deadline");
        tokio::time::sleep(Duration::from_millis(10)).await;
        let stale = dog.take_stale();
        assert_eq!(stale, vec![("m1".to_string(), "v2".to_string())]);
    }

    #[tokio::test]
    async fn test_sweep_with_nothing_stale_makes_no_requests() {
        let dog = watchdog(60_000);
        dog.track("m1", "still fresh");
        assert!(dog.sweep().await.is_empty());
        assert!(dog.is_pending("m1"));
    }

    #[tokio::test]
    async fn test_resolve_unknown_id_returns_none() {
        let dog = watchdog(100);
        assert!(dog.resolve("nope").await.is_none());
    }

    #[tokio::test]
    async fn test_resolve_clears_pending_even_when_fetch_fails() {
        // Port 1 is unroutable: the fetch fails, the notice is appended,
        // and the message is no longer pending.
        let dog = StalledMessageWatchdog::new(
            Client::new(),
            "http://127.0.0.1:1",
            Duration::from_millis(10),
        );
        dog.track("m1", "partial answer");
        let resolution = dog.resolve("m1").await.expect("was pending");
        assert!(!dog.is_pending("m1"));
        assert!(!resolution.recovered);
        assert!(resolution.changed);
        assert_eq!(resolution.content, format!("partial answer{INCOMPLETE_NOTICE}"));
    }
}
