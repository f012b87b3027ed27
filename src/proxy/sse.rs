//! Incremental decoder for OpenAI-compatible server-sent event bodies.

use memchr::memchr;

use crate::api::ChatResponse;
use crate::core::chat_stream::FailureReason;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseItem {
    Delta(String),
    Done,
}

/// Splits arbitrarily chunked bytes into lines and decodes each `data:` line.
///
/// Bytes go in through [`SseDecoder::push`]; decoded items come out one at a
/// time through [`SseDecoder::next_item`], so output decoded ahead of a bad
/// line is never lost.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    finished: bool,
    saw_data: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer one chunk. Ignored once `Done` has been decoded.
    pub fn push(&mut self, chunk: &[u8]) {
        if !self.finished {
            self.buffer.extend_from_slice(chunk);
        }
    }

    /// Next item from the complete lines buffered so far. Nothing after
    /// `Done` is decoded.
    pub fn next_item(&mut self) -> Option<Result<SseItem, FailureReason>> {
        while !self.finished {
            let newline_pos = memchr(b'\n', &self.buffer)?;
            let decoded = self.decode_tracked(newline_pos);
            self.buffer.drain(..=newline_pos);

            match decoded {
                Ok(None) => continue,
                Ok(Some(SseItem::Done)) => {
                    self.finished = true;
                    self.buffer.clear();
                    return Some(Ok(SseItem::Done));
                }
                other => return other.transpose(),
            }
        }
        None
    }

    /// Flush an unterminated trailing line once the body has closed.
    ///
    /// A body that never carried a `data:` line is not an event stream (for
    /// example a provider that ignored `stream: true`) and is rejected.
    pub fn finish(&mut self) -> Result<Option<SseItem>, FailureReason> {
        if self.finished {
            return Ok(None);
        }
        self.finished = true;
        let item = if self.buffer.is_empty() {
            None
        } else {
            let decoded = self.decode_tracked(self.buffer.len());
            self.buffer.clear();
            decoded?
        };
        if !self.saw_data {
            return Err(FailureReason::malformed(
                "upstream response contained no data events",
            ));
        }
        Ok(item)
    }

    fn decode_tracked(&mut self, end: usize) -> Result<Option<SseItem>, FailureReason> {
        let raw = &self.buffer[..end];
        if raw.trim_ascii_start().starts_with(b"data:") {
            self.saw_data = true;
        }
        decode_raw_line(raw)
    }
}

fn decode_raw_line(raw: &[u8]) -> Result<Option<SseItem>, FailureReason> {
    let line = std::str::from_utf8(raw)
        .map_err(|e| FailureReason::malformed(format!("invalid UTF-8 in upstream stream: {e}")))?;
    decode_line(line.trim())
}

fn extract_data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim_start)
}

/// Decode one trimmed SSE line. Blank lines, `:` comments (keep-alives) and
/// non-`data` fields yield `None`.
pub fn decode_line(line: &str) -> Result<Option<SseItem>, FailureReason> {
    if line.is_empty() || line.starts_with(':') {
        return Ok(None);
    }

    let Some(payload) = extract_data_payload(line) else {
        return Ok(None);
    };

    if payload == "[DONE]" {
        return Ok(Some(SseItem::Done));
    }

    let value: serde_json::Value = serde_json::from_str(payload)
        .map_err(|e| FailureReason::malformed(format!("invalid JSON in upstream chunk: {e}")))?;

    if value.get("error").is_some() {
        let status = value
            .pointer("/error/code")
            .and_then(|code| code.as_u64())
            .and_then(|code| u16::try_from(code).ok());
        let message = extract_error_summary(&value).unwrap_or_else(|| payload.to_string());
        return Err(FailureReason::UpstreamRejected { status, message });
    }

    let response: ChatResponse = serde_json::from_value(value).map_err(|e| {
        FailureReason::malformed(format!("unexpected upstream chunk shape: {e}"))
    })?;

    Ok(response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|content| !content.is_empty())
        .map(SseItem::Delta))
}

pub fn extract_error_summary(value: &serde_json::Value) -> Option<String> {
    let summary = value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .or_else(|| {
            value.get("error").and_then(|v| match v {
                serde_json::Value::String(s) => Some(s.to_string()),
                _ => None,
            })
        })
        .or_else(|| {
            value
                .get("message")
                .and_then(|v| v.as_str().map(str::to_owned))
        });

    summary
        .map(|text| text.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|text| !text.is_empty())
}

/// One-line description of a non-success response body.
pub fn summarize_error_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "<empty body>".to_string();
    }

    serde_json::from_str::<serde_json::Value>(trimmed)
        .ok()
        .and_then(|value| extract_error_summary(&value))
        .unwrap_or_else(|| trimmed.to_string())
}
