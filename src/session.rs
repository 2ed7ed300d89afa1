use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// SessionStatus
// ---------------------------------------------------------------------------

/// Lifecycle of one streaming exchange.
///
/// `Completed` covers both a normal `done` and a user-initiated stop; a stop
/// is not an error. `Failed` is reached only through an explicit server
/// error or exhausted reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Connecting,
    Streaming,
    Reconnecting,
    Recovering,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }

    /// States in which the heartbeat monitor and stall detector run.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SessionStatus::Connecting | SessionStatus::Streaming | SessionStatus::Reconnecting
        )
    }

    /// Legal transitions. Cancellation maps any non-terminal state to
    /// `Completed`; recovery is only reachable from `Failed`.
    pub fn can_transition(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        match (self, next) {
            (Idle, Connecting) => true,
            (Connecting, Streaming | Reconnecting | Completed | Failed) => true,
            (Streaming, Reconnecting | Completed | Failed) => true,
            (Reconnecting, Connecting | Completed | Failed) => true,
            (Failed, Recovering) => true,
            (Recovering, Completed | Failed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Connecting => "connecting",
            SessionStatus::Streaming => "streaming",
            SessionStatus::Reconnecting => "reconnecting",
            SessionStatus::Recovering => "recovering",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

// ---------------------------------------------------------------------------
// StreamSession
// ---------------------------------------------------------------------------

/// State of one in-flight or finished exchange. At most one exists per
/// manager; a new submission replaces it wholesale.
#[derive(Debug, Clone)]
pub struct StreamSession {
    /// Client-side correlation id, used only for log lines.
    pub id: Uuid,
    /// The submitted prompt, immutable for the session.
    pub prompt: String,
    /// Server-assigned identifier, `None` until the `request_id` frame.
    pub request_id: Option<String>,
    /// Accumulated answer text, append-only between resets.
    pub content: String,
    pub status: SessionStatus,
    /// Reconnect attempts consumed so far.
    pub reconnects: u32,
}

impl StreamSession {
    pub fn new(prompt: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            prompt,
            request_id: None,
            content: String::new(),
            status: SessionStatus::Idle,
            reconnects: 0,
        }
    }

    /// Apply a transition if legal. Illegal transitions are refused and
    /// logged rather than applied; callers treat `false` as "state moved on
    /// without us" (e.g. a cancel won the race).
    pub fn advance(&mut self, next: SessionStatus) -> bool {
        if self.status.can_transition(next) {
            self.status = next;
            true
        } else {
            warn!(
                session = %self.id,
                from = %self.status,
                to = %next,
                "refusing illegal status transition"
            );
            false
        }
    }
}

// ---------------------------------------------------------------------------
// SessionUpdate — collaborator-facing notifications
// ---------------------------------------------------------------------------

/// One notification to the UI layer: enough to update banners, toggle the
/// submit control (`status.is_terminal()` / `is_active()`), and append text
/// incrementally (`delta`) or re-render wholesale (`content`).
#[derive(Debug, Clone, Serialize)]
pub struct SessionUpdate {
    pub status: SessionStatus,
    /// Full accumulated content at the time of the update.
    pub content: String,
    /// Newly appended text, present only on incremental content updates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
