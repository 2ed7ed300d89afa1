//! Resilient client runtime for a streaming chat service.
//!
//! The server answers a prompt with a chunked HTTP body of
//! `data: <json>\n\n` frames. Networks being what they are, that body can
//! stall silently, drop mid-response, or never open. This crate wraps the
//! whole exchange in a recovery-aware state machine:
//!
//! - [`StreamManager`] owns the single current exchange and publishes
//!   [`SessionUpdate`]s to the UI layer,
//! - a frame decoder tolerates chunk-split records and skips corruption,
//! - a stall detector declares the connection dead after a full timeout with
//!   no activity signal of any kind,
//! - dead connections are retried a bounded number of times, and as a last
//!   resort [`StreamManager::recover_full_response`] asks the server for its
//!   best-known complete answer out of band,
//! - [`StalledMessageWatchdog`] applies the same recovery fetch to the
//!   companion message channel, guaranteeing nothing stays "loading"
//!   forever.

pub mod cli;
pub mod config;
pub mod error;
pub mod frame;
pub mod heartbeat;
pub mod manager;
pub mod protocol;
pub mod recovery;
pub mod session;
pub mod stall;
pub mod stalled;

mod reader;

pub use config::{StreamConfig, StreamConfigBuilder};
pub use error::RestreamError;
pub use frame::FrameDecoder;
pub use heartbeat::HeartbeatRecord;
pub use manager::StreamManager;
pub use protocol::StreamEvent;
pub use recovery::RecoveryStats;
pub use session::{SessionStatus, SessionUpdate, StreamSession};
pub use stall::{ActivityTracker, StallDetector};
pub use stalled::{MessageResolution, StalledMessageWatchdog, INCOMPLETE_NOTICE};
