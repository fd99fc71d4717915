//! Server-Sent Events decoding
//!
//! Splits an upstream byte stream into `data:` events without interpreting
//! the chunk payloads.

use crate::error::UpstreamError;
use serde_json::Value;

/// One decoded event
#[derive(Debug, Clone, PartialEq)]
pub enum SseEvent {
    /// A JSON chunk, relayed as-is
    Data(Value),

    /// The `[DONE]` end marker
    Done,
}

/// Parse SSE data line into an event
pub fn parse_sse_line(line: &str) -> Result<Option<SseEvent>, UpstreamError> {
    // Skip empty lines and comments
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') {
        return Ok(None);
    }

    // Parse data: prefix
    if let Some(data) = line.strip_prefix("data:") {
        let data = data.trim();

        if data == "[DONE]" {
            return Ok(Some(SseEvent::Done));
        }

        let chunk: Value = serde_json::from_str(data).map_err(|e| {
            UpstreamError::Decode(format!("failed to parse SSE chunk: {}. Data: {}", e, data))
        })?;

        // Providers report mid-stream failures as an `error` object
        if let Some(error) = chunk.get("error").filter(|e| !e.is_null()) {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Err(UpstreamError::Stream(message));
        }

        return Ok(Some(SseEvent::Data(chunk)));
    }

    // Ignore other event types (event:, id:, retry:)
    Ok(None)
}

/// Incremental line splitter over arbitrary byte boundaries
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes; returns the events completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Result<SseEvent, UpstreamError>> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(event) = decode_line(&line).transpose() {
                events.push(event);
            }
        }
        events
    }

    /// Flush a trailing line that had no newline.
    pub fn finish(&mut self) -> Option<Result<SseEvent, UpstreamError>> {
        if self.buffer.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.buffer);
        decode_line(&line).transpose()
    }
}

fn decode_line(line: &[u8]) -> Result<Option<SseEvent>, UpstreamError> {
    let text = std::str::from_utf8(line)
        .map_err(|e| UpstreamError::Decode(format!("invalid UTF-8 in SSE stream: {}", e)))?;
    parse_sse_line(text)
}
