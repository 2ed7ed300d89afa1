use std::sync::Arc;

use tokio::sync::watch;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::error::RestreamError;
use crate::frame::FrameDecoder;
use crate::heartbeat::{lock_record, HeartbeatMonitor};
use crate::manager::Shared;
use crate::protocol::{StreamEvent, StreamStartRequest};
use crate::recovery::jittered_backoff;
use crate::session::{SessionStatus, SessionUpdate};
use crate::stall::StallDetector;

/// How one connection attempt ended.
#[derive(Debug)]
enum StreamOutcome {
    /// `done` frame, or the server closed the body cleanly.
    Done,
    /// User-initiated stop; never an error.
    Canceled,
    /// The session was replaced by a newer submission.
    Superseded,
    /// Explicit `error` frame — ends the session, no reconnect.
    ServerError(String),
    /// Non-2xx answer to the stream request — ends the session.
    Rejected { status: u16, url: String },
    /// The stall detector declared the connection dead.
    Stalled,
    /// Network-level failure on connect or mid-body.
    Transport(String),
}

// ---------------------------------------------------------------------------
// Exchange driver
// ---------------------------------------------------------------------------

/// Drive one exchange to a terminal state: stream, reconnect up to the
/// configured bound, and settle `Completed` or `Failed`.
///
/// Runs as a single task owning its own timers, so a content chunk and a
/// stall deadline can never race across tasks — the `select!` loop decides.
pub(crate) async fn run_exchange(
    shared: Arc<Shared>,
    generation: u64,
    mut cancel: watch::Receiver<bool>,
) {
    // One probe task for the whole exchange, across reconnects. The guard
    // drops on every way out of this function, including a hard task abort.
    let _probe = HeartbeatMonitor::spawn(
        shared.client.clone(),
        shared.config.endpoint("/heartbeat-probe"),
        shared.config.heartbeat_interval,
        Arc::clone(&shared.heartbeat),
        Arc::clone(&shared.activity),
    );

    loop {
        let outcome = attempt_stream(&shared, generation, &mut cancel).await;
        match outcome {
            StreamOutcome::Done | StreamOutcome::Canceled => {
                shared.transition(generation, SessionStatus::Completed, None);
                return;
            }
            StreamOutcome::Superseded => return,
            StreamOutcome::ServerError(message) => {
                let err = RestreamError::Server { message };
                shared.transition(generation, SessionStatus::Failed, Some(err.to_string()));
                return;
            }
            StreamOutcome::Rejected { status, url } => {
                let err = RestreamError::Http { status, url };
                shared.transition(generation, SessionStatus::Failed, Some(err.to_string()));
                return;
            }
            StreamOutcome::Stalled => {
                if !begin_reconnect(&shared, generation, &mut cancel).await {
                    return;
                }
            }
            StreamOutcome::Transport(detail) => {
                warn!(error = %detail, "stream transport failed");
                if !begin_reconnect(&shared, generation, &mut cancel).await {
                    return;
                }
            }
        }
    }
}

/// Consume one reconnect attempt, or settle the terminal failure when the
/// budget is spent. Returns whether another attempt should run.
async fn begin_reconnect(
    shared: &Arc<Shared>,
    generation: u64,
    cancel: &mut watch::Receiver<bool>,
) -> bool {
    let max = shared.config.max_reconnects;
    let used = match shared.apply(generation, |session| session.reconnects) {
        Some(used) => used,
        None => return false,
    };

    if used >= max {
        let err = RestreamError::ConnectionLost { attempts: used };
        shared.transition(generation, SessionStatus::Failed, Some(err.to_string()));
        return false;
    }

    // Reconnection restarts the exchange from scratch: the partial content
    // is discarded and the UI buffer reset before the new attempt.
    let applied = shared.apply(generation, |session| {
        session.reconnects += 1;
        session.content.clear();
        if session.advance(SessionStatus::Reconnecting) {
            shared.notify(SessionUpdate {
                status: session.status,
                content: String::new(),
                delta: None,
                error: None,
            });
            true
        } else {
            false
        }
    });
    if applied != Some(true) {
        return false;
    }
    info!(attempt = used + 1, max, "reconnecting after dead connection");

    let backoff = jittered_backoff(shared.config.reconnect_backoff);
    tokio::select! {
        biased;
        _ = cancel_requested(cancel) => {
            shared.transition(generation, SessionStatus::Completed, None);
            return false;
        }
        _ = tokio::time::sleep(backoff) => {}
    }

    // Fresh timers start from now, not from the dead connection's past.
    shared.activity.touch();
    shared.transition(generation, SessionStatus::Connecting, None)
}

/// Open the stream and pump it until something ends this attempt.
async fn attempt_stream(
    shared: &Arc<Shared>,
    generation: u64,
    cancel: &mut watch::Receiver<bool>,
) -> StreamOutcome {
    let prompt = match shared.apply(generation, |session| session.prompt.clone()) {
        Some(prompt) => prompt,
        None => return StreamOutcome::Superseded,
    };

    let url = shared.config.endpoint("/stream-start");
    let request = shared
        .client
        .post(&url)
        .json(&StreamStartRequest { prompt })
        .send();

    let response = tokio::select! {
        biased;
        _ = cancel_requested(cancel) => return StreamOutcome::Canceled,
        result = request => match result {
            Ok(response) => response,
            Err(e) => return StreamOutcome::Transport(e.to_string()),
        },
    };

    if !response.status().is_success() {
        return StreamOutcome::Rejected { status: response.status().as_u16(), url };
    }

    if !shared.transition(generation, SessionStatus::Streaming, None) {
        return StreamOutcome::Superseded;
    }
    shared.activity.touch();

    let detector = StallDetector::new(Arc::clone(&shared.activity), shared.config.stall_timeout);

    let mut decoder = FrameDecoder::new();
    let mut body = response.bytes_stream();

    loop {
        tokio::select! {
            biased;
            _ = cancel_requested(cancel) => return StreamOutcome::Canceled,
            _ = detector.stalled() => {
                warn!(
                    idle = ?shared.activity.idle_for(),
                    "no activity within stall timeout, declaring connection dead"
                );
                return StreamOutcome::Stalled;
            }
            chunk = body.next() => match chunk {
                None => {
                    if decoder.pending() > 0 {
                        debug!(pending = decoder.pending(), "stream closed mid-record");
                    }
                    // No `done` frame, but the server closed cleanly; the
                    // protocol treats that as normal completion.
                    debug!("stream closed without done frame, treating as complete");
                    return StreamOutcome::Done;
                }
                Some(Err(e)) => return StreamOutcome::Transport(e.to_string()),
                Some(Ok(bytes)) => {
                    for event in decoder.feed(&bytes) {
                        match dispatch_event(shared, generation, event) {
                            Dispatch::Continue => {}
                            Dispatch::End(outcome) => return outcome,
                        }
                    }
                }
            }
        }
    }
}

enum Dispatch {
    Continue,
    End(StreamOutcome),
}

fn dispatch_event(shared: &Arc<Shared>, generation: u64, event: StreamEvent) -> Dispatch {
    match event {
        StreamEvent::RequestId { id } => {
            debug!(request_id = %id, "server assigned request id");
            if shared
                .apply(generation, |session| session.request_id = Some(id))
                .is_none()
            {
                return Dispatch::End(StreamOutcome::Superseded);
            }
        }
        StreamEvent::Content { content } => {
            shared.activity.touch();
            let applied = shared.apply(generation, |session| {
                session.content.push_str(&content);
                shared.notify(SessionUpdate {
                    status: session.status,
                    content: session.content.clone(),
                    delta: Some(content.clone()),
                    error: None,
                });
            });
            if applied.is_none() {
                return Dispatch::End(StreamOutcome::Superseded);
            }
        }
        StreamEvent::Heartbeat { timestamp } => {
            shared.activity.touch();
            lock_record(&shared.heartbeat).observe(timestamp);
        }
        StreamEvent::Done => return Dispatch::End(StreamOutcome::Done),
        StreamEvent::Error { error } => return Dispatch::End(StreamOutcome::ServerError(error)),
    }
    Dispatch::Continue
}

/// Resolves once cancellation is requested. A closed channel (the manager
/// went away) counts as a cancel.
async fn cancel_requested(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow() {
            return;
        }
        if cancel.changed().await.is_err() {
            return;
        }
    }
}
