use serde::{Deserialize, Serialize};

// -- Stream frame payloads --------------------------------------------------

/// One parsed event from the `data: <json>` stream.
///
/// The server multiplexes every event kind through a single frame shape,
/// discriminated by the `type` field. Unknown types fail to parse and are
/// skipped by the decoder.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Server-assigned identifier for this exchange, needed for recovery.
    RequestId { id: String },
    /// A chunk of answer text, appended in arrival order.
    Content { content: String },
    /// In-stream liveness signal.
    Heartbeat { timestamp: u64 },
    /// Normal termination.
    Done,
    /// Server-side failure; ends the exchange.
    Error { error: String },
}

// -- Request/response bodies ------------------------------------------------

#[derive(Debug, Serialize)]
pub struct StreamStartRequest {
    pub prompt: String,
}

/// `GET /heartbeat-probe` success body.
#[derive(Debug, Deserialize)]
pub struct ProbeResponse {
    pub timestamp: u64,
}

/// `POST /recover-complete` request body. `request_id` is omitted when the
/// stream died before the server assigned one.
#[derive(Debug, Serialize)]
pub struct RecoverRequest {
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RecoverResponse {
    pub response: String,
}

/// Non-2xx bodies from the recovery endpoint.
#[derive(Debug, Deserialize)]
pub struct ServerErrorBody {
    pub error: String,
}

/// `GET /recover-message/{id}` body for the companion channel.
#[derive(Debug, Deserialize)]
pub struct MessageRecoveryResponse {
    pub success: bool,
    #[serde(default)]
    pub content: String,
}
