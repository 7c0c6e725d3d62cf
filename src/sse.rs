//! # Event-Stream Framing
//!
//! Encoding and buffered decoding of `text/event-stream` frames. The relay
//! writes one frame per provider fragment:
//!
//! ```text
//! data: {"content":"Hi"}\n\n
//! ```
//!
//! Readers receive these bytes in arbitrary segments: a delimiter may be split
//! across two reads and a single read may carry several frames. [`FrameDecoder`]
//! keeps the unconsumed tail between reads, and buffers raw bytes rather than
//! text so a multi-byte character split across reads is decoded intact.
//!
//! The same decoder parses the upstream provider stream and the relay stream
//! on the client side.

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Separator between two frames.
pub const FRAME_DELIMITER: &[u8] = b"\n\n";

/// Payload of one relayed frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFrame {
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,
}

/// Encode a fragment as a complete `data:` frame.
pub fn encode_frame(content: &str) -> Bytes {
    // serde_json::Value::to_string cannot fail, unlike to_string on a struct
    let payload = serde_json::json!({ "content": content }).to_string();
    Bytes::from(format!("data: {}\n\n", payload))
}

/// Extract the `data:` payload of a frame.
///
/// Multiple `data:` lines are joined with `\n`; comment lines (starting with
/// `:`) and other fields (`event:`, `id:`, `retry:`) are ignored. Returns
/// `None` when the frame carries no data line at all.
pub fn data_payload(frame: &str) -> Option<String> {
    let mut data: Option<String> = None;

    for line in frame.lines() {
        let Some(value) = line.strip_prefix("data:") else {
            continue;
        };
        let value = value.strip_prefix(' ').unwrap_or(value);
        match data.as_mut() {
            Some(existing) => {
                existing.push('\n');
                existing.push_str(value);
            }
            None => data = Some(value.to_string()),
        }
    }

    data
}

/// Incremental frame splitter with a persistent pending buffer.
///
/// Each pending byte is scanned for the delimiter once, however many reads it
/// takes to complete the frame.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    pending: BytesMut,
    /// Prefix of `pending` already known to hold no delimiter start.
    scanned: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one read's worth of bytes.
    pub fn push(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
    }

    /// Take the next complete frame, without its delimiter.
    ///
    /// Returns `None` once only a partial frame (or nothing) remains.
    pub fn next_frame(&mut self) -> Option<Result<String, FrameError>> {
        let end = match find_delimiter(&self.pending[self.scanned..]) {
            Some(offset) => self.scanned + offset,
            None => {
                // the last byte may be the first half of a delimiter
                self.scanned = self.pending.len().saturating_sub(FRAME_DELIMITER.len() - 1);
                return None;
            }
        };

        let mut frame = self.pending.split_to(end + FRAME_DELIMITER.len());
        frame.truncate(end);
        self.scanned = 0;
        Some(String::from_utf8(frame.to_vec()).map_err(|_| FrameError::InvalidUtf8))
    }

    /// Bytes of the trailing partial frame still waiting for a delimiter.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

fn find_delimiter(buf: &[u8]) -> Option<usize> {
    buf.windows(FRAME_DELIMITER.len())
        .position(|window| window == FRAME_DELIMITER)
}
