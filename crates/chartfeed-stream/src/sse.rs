//! Server-sent-event framing.
//!
//! Frames are separated by a blank line. Only `data:` lines carry content;
//! comment lines and other fields are ignored. Carriage returns are dropped on
//! input so `\r\n` line endings decode like `\n`.

use crate::message::is_handshake;
use serde_json::Value;

const DATA_PREFIX: &str = "data:";

/// Incremental decoder over a chunked response body.
///
/// Bytes are buffered until a full frame is available, so a JSON payload (or
/// a multi-byte character) split across chunk boundaries is reassembled.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return the data payload of every completed frame.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer
            .extend(chunk.iter().copied().filter(|b| *b != b'\r'));

        let mut payloads = Vec::new();
        while let Some(end) = find_frame_end(&self.buffer) {
            let frame: Vec<u8> = self.buffer.drain(..end + 2).collect();
            if let Some(data) = frame_data(&frame[..end]) {
                payloads.push(data);
            }
        }
        payloads
    }

    /// Flush a trailing frame left without its blank-line terminator at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        frame_data(&rest)
    }

    /// Bytes buffered but not yet framed.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

fn find_frame_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\n\n")
}

fn frame_data(frame: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(frame);
    let lines: Vec<&str> = text
        .lines()
        .filter_map(|line| line.strip_prefix(DATA_PREFIX))
        .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
        .collect();

    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

/// Classified content of one `data:` payload.
#[derive(Debug, Clone, PartialEq)]
pub enum SsePayload {
    /// Application data to forward.
    Data(Value),
    /// Initial `{"event":"connected"}` marker.
    Handshake { subscription_id: Option<String> },
    /// Payload that is not valid JSON.
    Malformed(String),
}

pub fn parse_payload(data: &str) -> SsePayload {
    match serde_json::from_str::<Value>(data) {
        Ok(value) if is_handshake(&value) => SsePayload::Handshake {
            subscription_id: value
                .get("subscriptionId")
                .and_then(Value::as_str)
                .map(str::to_string),
        },
        Ok(value) => SsePayload::Data(value),
        Err(e) => SsePayload::Malformed(e.to_string()),
    }
}

/// Encode one value as a `data:` frame including the terminating blank line.
pub fn encode_frame(value: &Value) -> String {
    format!("{DATA_PREFIX} {value}\n\n")
}
