//! Server-to-client event frames.
//!
//! Each frame is a `data: ` line carrying
//! `{"choices":[{"delta":{"content":"..."}}]}`, followed by a blank line.
//! The stream ends with the literal `data: [DONE]` frame.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Payload of the terminal frame
pub const DONE_MARKER: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventFrame {
    /// One increment of assistant output
    Delta(String),
    /// End of the reply
    Done,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("Malformed frame: {0}")]
    Malformed(String),
}

#[derive(Serialize, Deserialize)]
struct FramePayload {
    choices: Vec<FrameChoice>,
}

#[derive(Serialize, Deserialize)]
struct FrameChoice {
    delta: FrameDelta,
}

#[derive(Serialize, Deserialize)]
struct FrameDelta {
    #[serde(default)]
    content: Option<String>,
}

impl EventFrame {
    pub fn delta(content: impl Into<String>) -> Self {
        EventFrame::Delta(content.into())
    }

    pub fn is_done(&self) -> bool {
        matches!(self, EventFrame::Done)
    }

    /// Wire form, including the trailing blank line
    pub fn encode(&self) -> String {
        match self {
            EventFrame::Delta(content) => {
                let payload = FramePayload {
                    choices: vec![FrameChoice {
                        delta: FrameDelta {
                            content: Some(content.clone()),
                        },
                    }],
                };
                // Serializing plain strings cannot fail
                let json = serde_json::to_string(&payload).unwrap_or_default();
                format!("data: {json}\n\n")
            }
            EventFrame::Done => format!("data: {DONE_MARKER}\n\n"),
        }
    }

    /// Parse the data portion of one frame.
    pub fn parse_data(data: &str) -> Result<EventFrame, FrameError> {
        let data = data.trim();
        if data == DONE_MARKER {
            return Ok(EventFrame::Done);
        }
        let payload: FramePayload = serde_json::from_str(data)
            .map_err(|e| FrameError::Malformed(format!("{e}: {data}")))?;
        let content = payload
            .choices
            .into_iter()
            .filter_map(|c| c.delta.content)
            .collect::<String>();
        Ok(EventFrame::Delta(content))
    }
}

/// Incremental decoder for the frame stream.
///
/// Network reads split frames at arbitrary byte offsets (including inside
/// multi-byte characters), so bytes are buffered until a full line arrives.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    data_lines: Vec<String>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes, returning every frame completed by them in order.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Result<EventFrame, FrameError>> {
        self.buf.extend_from_slice(bytes);
        let mut frames = Vec::new();

        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }

            let line = match String::from_utf8(line) {
                Ok(l) => l,
                Err(e) => {
                    frames.push(Err(FrameError::Malformed(format!("invalid utf-8: {e}"))));
                    continue;
                }
            };

            if line.is_empty() {
                if let Some(frame) = self.dispatch() {
                    frames.push(frame);
                }
            } else if let Some(data) = line.strip_prefix("data:") {
                self.data_lines
                    .push(data.strip_prefix(' ').unwrap_or(data).to_string());
            } else if line.starts_with(':') {
                // comment / keep-alive
            } else {
                tracing::debug!(line = %line, "Ignoring non-data line");
            }
        }

        frames
    }

    /// Flush a final frame that was not followed by a blank line.
    pub fn finish(&mut self) -> Option<Result<EventFrame, FrameError>> {
        if !self.buf.is_empty() {
            let rest = std::mem::take(&mut self.buf);
            let line = String::from_utf8_lossy(&rest).trim_end().to_string();
            if let Some(data) = line.strip_prefix("data:") {
                self.data_lines
                    .push(data.strip_prefix(' ').unwrap_or(data).to_string());
            }
        }
        self.dispatch()
    }

    fn dispatch(&mut self) -> Option<Result<EventFrame, FrameError>> {
        if self.data_lines.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data_lines).join("\n");
        Some(EventFrame::parse_data(&data))
    }
}
