//! Line framing for the chat streaming endpoint.
//!
//! The body is a sequence of `\n`-terminated lines. Only lines starting with
//! `data: ` carry a payload; the payload is either `[DONE]` or a JSON object
//! whose optional `content` string is the next text delta. Chunk boundaries
//! carry no meaning: partial lines (and partial UTF-8 sequences) are held
//! back until their newline arrives.

use serde_json::Value;

const DATA_PREFIX: &[u8] = b"data: ";
const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Text after the `data: ` prefix.
    Payload(String),
    /// The `[DONE]` sentinel.
    Done,
}

#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk and returns the frames of every line it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            frames.extend(parse_line(&self.buffer[start..end]));
            start = end + 1;
        }
        self.buffer.drain(..start);
        frames
    }

    /// Called at end-of-stream: a final line without a newline still counts.
    pub fn finish(&mut self) -> Option<Frame> {
        let rest = std::mem::take(&mut self.buffer);
        parse_line(&rest)
    }

    /// Bytes held back waiting for a newline.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

fn parse_line(line: &[u8]) -> Option<Frame> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let payload = line.strip_prefix(DATA_PREFIX)?;
    let payload = String::from_utf8_lossy(payload);
    if payload == DONE_SENTINEL {
        Some(Frame::Done)
    } else {
        Some(Frame::Payload(payload.into_owned()))
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Malformed stream frame {payload:?}: {source}")]
pub struct FrameParseError {
    pub payload: String,
    #[source]
    pub source: serde_json::Error,
}

/// Extracts the text delta from a payload. `Ok(None)` means the frame was
/// valid JSON but carried no (or empty) `content`.
pub fn parse_delta(payload: &str) -> Result<Option<String>, FrameParseError> {
    let value: Value = serde_json::from_str(payload).map_err(|source| FrameParseError {
        payload: payload.to_string(),
        source,
    })?;

    Ok(value
        .get("content")
        .and_then(Value::as_str)
        .filter(|content| !content.is_empty())
        .map(str::to_string))
}
