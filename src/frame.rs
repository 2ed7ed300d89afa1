use tracing::warn;

use crate::protocol::StreamEvent;

/// Marker every payload-bearing line starts with.
const DATA_PREFIX: &str = "data: ";
/// Blank line separating records.
const RECORD_SEPARATOR: &str = "\n\n";

// ---------------------------------------------------------------------------
// FrameDecoder — incremental bytes → events
// ---------------------------------------------------------------------------

/// Incremental decoder for the `data: <json>\n\n` stream.
///
/// Network chunks arrive with no alignment guarantees: a record may be split
/// across reads, and a multi-byte character may be split across chunks. The
/// decoder keeps both an undecoded byte tail and the decoded-but-unterminated
/// text, so `feed` can be called with arbitrary slices.
///
/// Malformed payloads are logged and skipped; corruption inside one frame
/// never ends the stream.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Bytes that did not yet form complete UTF-8.
    bytes: Vec<u8>,
    /// Decoded text awaiting a record separator.
    text: String,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one network chunk and return every event completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.bytes.extend_from_slice(chunk);
        self.decode_pending();

        let mut events = Vec::new();
        while let Some(pos) = self.text.find(RECORD_SEPARATOR) {
            let frame = self.text[..pos].to_string();
            self.text.drain(..pos + RECORD_SEPARATOR.len());
            events.extend(parse_frame(&frame));
        }
        events
    }

    /// Bytes and characters buffered but not yet emitted. Non-zero at end of
    /// stream means the server closed mid-record.
    pub fn pending(&self) -> usize {
        self.bytes.len() + self.text.len()
    }

    /// Move every complete UTF-8 sequence out of `bytes` into `text`,
    /// keeping an incomplete trailing sequence for the next chunk and
    /// skipping invalid sequences outright.
    fn decode_pending(&mut self) {
        loop {
            match std::str::from_utf8(&self.bytes) {
                Ok(s) => {
                    self.text.push_str(s);
                    self.bytes.clear();
                    return;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    self.text.push_str(&String::from_utf8_lossy(&self.bytes[..valid]));
                    match e.error_len() {
                        // Incomplete trailing sequence: wait for more bytes.
                        None => {
                            self.bytes.drain(..valid);
                            return;
                        }
                        // Invalid sequence: drop it and keep decoding.
                        Some(len) => {
                            warn!(invalid_bytes = len, "invalid UTF-8 in stream, skipping");
                            self.bytes.drain(..valid + len);
                        }
                    }
                }
            }
        }
    }
}

/// Parse one record into events. Lines without the data marker are ignored;
/// unparseable payloads are logged and skipped.
fn parse_frame(frame: &str) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    for line in frame.lines() {
        let line = line.trim_end_matches('\r');
        if let Some(payload) = line.strip_prefix(DATA_PREFIX) {
            match serde_json::from_str::<StreamEvent>(payload) {
                Ok(event) => events.push(event),
                Err(e) => {
                    warn!(error = %e, payload, "malformed stream frame, skipping");
                }
            }
        }
    }
    events
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
