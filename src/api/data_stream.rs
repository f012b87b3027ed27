//! Line-oriented data-stream framing used on `POST /api/chat` responses.
//!
//! Each line is `<code>:<json>\n`:
//!
//! - `0:"text"` carries one text delta,
//! - `3:{"kind":..}` carries a [`FailureReason`],
//! - `d:{"finishReason":"stop"}` marks completion.
//!
//! A response carries any number of deltas followed by at most one terminal
//! part. A response that ends without a terminal part was cut off.

use bytes::Bytes;
use memchr::memchr;
use serde::{Deserialize, Serialize};

use crate::core::chat_stream::{FailureReason, StreamEvent};

pub const TEXT_PART: &str = "0";
pub const ERROR_PART: &str = "3";
pub const FINISH_PART: &str = "d";

pub const PROTOCOL_HEADER: &str = "x-vercel-ai-data-stream";
pub const PROTOCOL_VERSION: &str = "v1";
pub const CONTENT_TYPE: &str = "text/plain; charset=utf-8";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FinishPayload {
    finish_reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("data stream is not valid UTF-8")]
    InvalidUtf8,

    #[error("data stream line has no part separator: {0}")]
    MissingSeparator(String),

    #[error("unknown data stream part `{0}`")]
    UnknownPart(String),

    #[error("invalid payload for part `{part}`: {message}")]
    InvalidPayload { part: String, message: String },
}

pub fn encode_event(event: &StreamEvent) -> Bytes {
    let line = match event {
        StreamEvent::Delta(text) => encode_part(TEXT_PART, &serde_json::json!(text)),
        StreamEvent::Done => encode_part(
            FINISH_PART,
            &serde_json::json!(FinishPayload {
                finish_reason: "stop".to_string(),
            }),
        ),
        // Serialized straight to text so fields keep declaration order.
        StreamEvent::Failed(reason) => match serde_json::to_string(reason) {
            Ok(payload) => format!("{ERROR_PART}:{payload}\n"),
            Err(_) => encode_part(
                ERROR_PART,
                &serde_json::json!({
                    "kind": "upstream_unavailable",
                    "message": reason.to_string(),
                }),
            ),
        },
    };
    Bytes::from(line)
}

fn encode_part(code: &str, payload: &serde_json::Value) -> String {
    format!("{code}:{payload}\n")
}

/// Decode one line (without its trailing newline). Blank lines decode to
/// `None`.
pub fn decode_line(line: &str) -> Result<Option<StreamEvent>, DecodeError> {
    let line = line.trim_end_matches('\r');
    if line.trim().is_empty() {
        return Ok(None);
    }

    let (code, payload) = line
        .split_once(':')
        .ok_or_else(|| DecodeError::MissingSeparator(line.to_string()))?;
    let invalid = |err: serde_json::Error| DecodeError::InvalidPayload {
        part: code.to_string(),
        message: err.to_string(),
    };

    let event = match code {
        TEXT_PART => StreamEvent::Delta(serde_json::from_str(payload).map_err(invalid)?),
        ERROR_PART => StreamEvent::Failed(serde_json::from_str(payload).map_err(invalid)?),
        FINISH_PART => {
            let _: FinishPayload = serde_json::from_str(payload).map_err(invalid)?;
            StreamEvent::Done
        }
        other => return Err(DecodeError::UnknownPart(other.to_string())),
    };
    Ok(Some(event))
}

/// Reassembles data-stream lines from arbitrarily split body chunks.
#[derive(Debug, Default)]
pub struct DataStreamDecoder {
    buffer: Vec<u8>,
}

impl DataStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    pub fn next_event(&mut self) -> Option<Result<StreamEvent, DecodeError>> {
        loop {
            let newline_pos = memchr(b'\n', &self.buffer)?;
            let decoded = std::str::from_utf8(&self.buffer[..newline_pos])
                .map_err(|_| DecodeError::InvalidUtf8)
                .and_then(decode_line);
            self.buffer.drain(..=newline_pos);

            if let Some(result) = decoded.transpose() {
                return Some(result);
            }
        }
    }

    /// Decode whatever unterminated line is left once the body has closed.
    pub fn finish(&mut self) -> Result<Option<StreamEvent>, DecodeError> {
        let remainder = std::mem::take(&mut self.buffer);
        if remainder.is_empty() {
            return Ok(None);
        }
        let line = std::str::from_utf8(&remainder).map_err(|_| DecodeError::InvalidUtf8)?;
        decode_line(line)
    }
}
