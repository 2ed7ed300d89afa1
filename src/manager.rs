use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use reqwest::Client;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::StreamConfig;
use crate::error::RestreamError;
use crate::heartbeat::{lock_record, HeartbeatRecord};
use crate::protocol::{RecoverRequest, RecoverResponse, ServerErrorBody};
use crate::recovery::RecoveryStats;
use crate::session::{SessionStatus, SessionUpdate, StreamSession};
use crate::stall::ActivityTracker;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// State shared between the manager and its driver task.
///
/// Every mutation from a driver or recovery path goes through
/// [`apply`](Shared::apply), which no-ops for stale generations: a timer or
/// callback that outlives its session cannot touch the replacement.
pub(crate) struct Shared {
    pub config: StreamConfig,
    pub client: Client,
    pub session: Mutex<StreamSession>,
    pub heartbeat: Arc<Mutex<HeartbeatRecord>>,
    pub activity: Arc<ActivityTracker>,
    pub stats: Arc<RecoveryStats>,
    pub generation: AtomicU64,
    updates: mpsc::UnboundedSender<SessionUpdate>,
}

impl Shared {
    pub fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.current_generation() == generation
    }

    /// Run `f` against the session iff `generation` is still current.
    /// The generation is re-checked under the session lock so a concurrent
    /// submit can never interleave between check and mutation.
    pub fn apply<R>(&self, generation: u64, f: impl FnOnce(&mut StreamSession) -> R) -> Option<R> {
        if !self.is_current(generation) {
            return None;
        }
        let mut session = self.lock_session();
        if !self.is_current(generation) {
            return None;
        }
        Some(f(&mut session))
    }

    /// Apply a status transition and notify on success.
    pub fn transition(&self, generation: u64, next: SessionStatus, error: Option<String>) -> bool {
        self.apply(generation, |session| {
            if !session.advance(next) {
                return false;
            }
            let update = SessionUpdate {
                status: session.status,
                content: session.content.clone(),
                delta: None,
                error,
            };
            self.notify(update);
            true
        })
        .unwrap_or(false)
    }

    pub fn notify(&self, update: SessionUpdate) {
        // A gone receiver means the UI detached; nothing left to inform.
        let _ = self.updates.send(update);
    }

    pub fn lock_session(&self) -> std::sync::MutexGuard<'_, StreamSession> {
        self.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

struct DriverHandle {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

// ---------------------------------------------------------------------------
// StreamManager
// ---------------------------------------------------------------------------

/// Owner of the single current streaming exchange.
///
/// One instance per UI; no ambient globals. Constructed together with the
/// update receiver that carries every [`SessionUpdate`] to the collaborating
/// UI layer.
pub struct StreamManager {
    shared: Arc<Shared>,
    driver: Mutex<Option<DriverHandle>>,
}

impl StreamManager {
    pub fn new(
        config: StreamConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SessionUpdate>), RestreamError> {
        config.validate()?;

        // Client::builder() can fail in extreme environments; fall back to a
        // default client instead of failing construction.
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .unwrap_or_default();

        let (tx, rx) = mpsc::unbounded_channel();
        let manager = StreamManager {
            shared: Arc::new(Shared {
                config,
                client,
                session: Mutex::new(StreamSession::new(String::new())),
                heartbeat: Arc::new(Mutex::new(HeartbeatRecord::default())),
                activity: Arc::new(ActivityTracker::new()),
                stats: Arc::new(RecoveryStats::default()),
                generation: AtomicU64::new(0),
                updates: tx,
            }),
            driver: Mutex::new(None),
        };
        Ok((manager, rx))
    }

    // -----------------------------------------------------------------------
    // submit / cancel
    // -----------------------------------------------------------------------

    /// Begin a new exchange, replacing and aborting any active one.
    ///
    /// Returns the client-side correlation id of the new session. An empty
    /// prompt is rejected without touching existing state.
    pub fn submit(&self, prompt: &str) -> Result<Uuid, RestreamError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(RestreamError::EmptyPrompt);
        }

        // Bump the generation first: from this instant, the previous driver
        // and any of its pending timers are no-ops.
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;

        // Then abort the old transport before arming anything new.
        if let Some(old) = self.lock_driver().take() {
            let _ = old.cancel.send(true);
            old.task.abort();
            debug!("aborted previous exchange");
        }

        let session = StreamSession::new(prompt.to_string());
        let id = session.id;
        info!(session = %id, generation, "submitting prompt");

        {
            let mut current = self.shared.lock_session();
            *current = session;
            current.advance(SessionStatus::Connecting);
            self.shared.notify(SessionUpdate {
                status: current.status,
                content: String::new(),
                delta: None,
                error: None,
            });
        }
        self.shared.activity.touch();

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let task = tokio::spawn(crate::reader::run_exchange(
            Arc::clone(&self.shared),
            generation,
            cancel_rx,
        ));
        *self.lock_driver() = Some(DriverHandle { cancel: cancel_tx, task });

        Ok(id)
    }

    /// Stop the current exchange. A user stop lands in `Completed`, not
    /// `Failed`, and emits no error notification.
    pub fn cancel(&self) {
        let generation = self.shared.current_generation();

        if let Some(driver) = self.lock_driver().as_ref() {
            let _ = driver.cancel.send(true);
        }

        // Recovery runs outside the driver task; complete it directly. The
        // transition table refuses this for terminal or driver-owned states.
        self.shared.apply(generation, |session| {
            if session.status == SessionStatus::Recovering && session.advance(SessionStatus::Completed)
            {
                self.shared.notify(SessionUpdate {
                    status: session.status,
                    content: session.content.clone(),
                    delta: None,
                    error: None,
                });
            }
        });
    }

    // -----------------------------------------------------------------------
    // Recovery
    // -----------------------------------------------------------------------

    /// One-shot out-of-band fetch of the complete answer after a terminal
    /// failure. On success the accumulated content is replaced wholesale; on
    /// failure the session returns to `Failed` with partial content intact
    /// and recovery stays available.
    pub async fn recover_full_response(&self) -> Result<String, RestreamError> {
        let generation = self.shared.current_generation();

        let (prompt, request_id) = {
            let session = self.shared.lock_session();
            if session.status != SessionStatus::Failed {
                return Err(RestreamError::NothingToRecover);
            }
            (session.prompt.clone(), session.request_id.clone())
        };

        if !self.shared.transition(generation, SessionStatus::Recovering, None) {
            return Err(RestreamError::NothingToRecover);
        }
        self.shared.stats.record_attempt();

        let url = self.shared.config.endpoint("/recover-complete");
        info!(url = %url, request_id = ?request_id, "requesting full-response recovery");

        match self.fetch_recovery(&url, prompt, request_id).await {
            Ok(text) => {
                self.shared.stats.record_success();
                self.shared.apply(generation, |session| {
                    session.content = text.clone();
                    if session.advance(SessionStatus::Completed) {
                        self.shared.notify(SessionUpdate {
                            status: session.status,
                            content: session.content.clone(),
                            delta: None,
                            error: None,
                        });
                    }
                });
                Ok(text)
            }
            Err(detail) => {
                warn!(error = %detail, "recovery fetch failed");
                let err = RestreamError::Recovery { detail };
                self.shared.transition(generation, SessionStatus::Failed, Some(err.to_string()));
                Err(err)
            }
        }
    }

    async fn fetch_recovery(
        &self,
        url: &str,
        prompt: String,
        request_id: Option<String>,
    ) -> Result<String, String> {
        let body = RecoverRequest { prompt, request_id };
        let resp = self
            .shared
            .client
            .post(url)
            .json(&body)
            .timeout(self.shared.config.recovery_timeout)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if resp.status().is_success() {
            let recovered: RecoverResponse = resp.json().await.map_err(|e| e.to_string())?;
            Ok(recovered.response)
        } else {
            let status = resp.status().as_u16();
            let detail = match resp.json::<ServerErrorBody>().await {
                Ok(body) => body.error,
                Err(_) => format!("HTTP {status}"),
            };
            Err(detail)
        }
    }

    // -----------------------------------------------------------------------
    // Snapshots for the UI collaborator
    // -----------------------------------------------------------------------

    pub fn session_snapshot(&self) -> StreamSession {
        self.shared.lock_session().clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.shared.lock_session().status
    }

    pub fn heartbeat_record(&self) -> HeartbeatRecord {
        lock_record(&self.shared.heartbeat).clone()
    }

    pub fn recovery_stats(&self) -> Arc<RecoveryStats> {
        Arc::clone(&self.shared.stats)
    }

    fn lock_driver(&self) -> std::sync::MutexGuard<'_, Option<DriverHandle>> {
        self.driver.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
