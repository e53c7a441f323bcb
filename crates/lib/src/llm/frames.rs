//! Event-stream frame decoding.
//!
//! The prediction endpoint answers a streaming request with newline-delimited frames of the
//! form `data: {"event": "...", "data": ...}`, ending with `data: [DONE]` or end of body.
//! Chunks from the transport do not respect line boundaries, so bytes are buffered until a
//! full line is available.

use crate::session::ToolInvocation;

const DATA_PREFIX: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";

/// One decoded stream event. Anything unrecognized or malformed becomes `Unknown`.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A content delta to append.
    Token(String),
    /// The flow started using tools.
    UsedToolsSignal,
    /// Terminal metadata; `None` when the payload had no usable tool list.
    Metadata(Option<Vec<ToolInvocation>>),
    Unknown,
}

/// Longest line kept by default. Longer lines are dropped whole.
pub const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

/// Splits a chunked byte stream into complete lines.
///
/// Only bytes of the incoming chunk are scanned for newlines; the buffer holds the unfinished
/// tail of the current line.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    max_line: usize,
    /// Set while skipping the rest of an oversized line.
    discarding: bool,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_line: max_line.max(1),
            discarding: false,
        }
    }

    /// Feed one chunk; returns the lines completed by it (without line terminators).
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for piece in chunk.split_inclusive(|&b| b == b'\n') {
            let (body, complete) = match piece.split_last() {
                Some((&b'\n', body)) => (body, true),
                _ => (piece, false),
            };
            if !self.discarding {
                self.buffer.extend_from_slice(body);
                if self.buffer.len() > self.max_line {
                    log::warn!(
                        "dropping stream line longer than {} bytes",
                        self.max_line
                    );
                    self.buffer.clear();
                    self.discarding = true;
                }
            }
            if complete {
                if self.discarding {
                    self.discarding = false;
                } else if let Some(line) = Self::take_line(&mut self.buffer) {
                    lines.push(line);
                }
            }
        }
        lines
    }

    /// Flush a trailing line that had no terminating newline.
    pub fn finish(&mut self) -> Option<String> {
        if std::mem::take(&mut self.discarding) {
            self.buffer.clear();
            return None;
        }
        Self::take_line(&mut self.buffer)
    }

    fn take_line(buffer: &mut Vec<u8>) -> Option<String> {
        let bytes = std::mem::take(buffer);
        let line = String::from_utf8_lossy(&bytes);
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            None
        } else {
            Some(line.to_string())
        }
    }
}

/// Decode one line. Returns `None` for non-data lines and the `[DONE]` sentinel.
pub fn decode_frame(line: &str) -> Option<StreamEvent> {
    let payload = line.strip_prefix(DATA_PREFIX)?.trim();
    if payload.is_empty() || payload == DONE_SENTINEL {
        return None;
    }
    let value: serde_json::Value = match serde_json::from_str(payload) {
        Ok(v) => v,
        Err(e) => {
            log::warn!("skipping malformed stream frame ({}): {}", e, line);
            return Some(StreamEvent::Unknown);
        }
    };
    Some(classify(&value))
}

fn classify(value: &serde_json::Value) -> StreamEvent {
    let event = value.get("event").and_then(|e| e.as_str()).unwrap_or("");
    let data = value.get("data").unwrap_or(&serde_json::Value::Null);
    match event {
        "token" => match data.as_str() {
            Some(s) if !s.is_empty() => StreamEvent::Token(s.to_string()),
            _ => StreamEvent::Unknown,
        },
        "usedTools" if is_truthy(data) => StreamEvent::UsedToolsSignal,
        "metadata" if is_truthy(data) => StreamEvent::Metadata(tools_from(data)),
        "" => {
            log::debug!("stream frame without event name: {}", value);
            StreamEvent::Unknown
        }
        other => {
            log::debug!("ignoring stream event {}", other);
            StreamEvent::Unknown
        }
    }
}

/// Extract `usedTools` from an object, if present and well-formed.
pub(crate) fn tools_from(value: &serde_json::Value) -> Option<Vec<ToolInvocation>> {
    let tools = value.get("usedTools")?;
    if !is_truthy(tools) {
        return None;
    }
    match serde_json::from_value::<Vec<ToolInvocation>>(tools.clone()) {
        Ok(list) => Some(list),
        Err(e) => {
            log::warn!("ignoring malformed usedTools list: {}", e);
            None
        }
    }
}

/// Truthiness of frame data: null, false, 0, "" and [] are falsy.
fn is_truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => false,
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        serde_json::Value::String(s) => !s.is_empty(),
        serde_json::Value::Array(items) => !items.is_empty(),
        serde_json::Value::Object(_) => true,
    }
}
