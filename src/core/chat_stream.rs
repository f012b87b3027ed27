use std::sync::Arc;

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::backend::{GenerationBackend, GenerationRequest};

/// Why a generation ended without completing.
///
/// Serialized with a `kind` tag so the proxy can carry it over the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    #[error("upstream unavailable: {message}")]
    UpstreamUnavailable { message: String },

    #[error("{}", rejected_display(*status, message))]
    UpstreamRejected {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<u16>,
        message: String,
    },

    #[error("upstream did not finish within {after_secs}s")]
    Timeout { after_secs: u64 },

    #[error("malformed upstream chunk: {message}")]
    MalformedUpstreamChunk { message: String },

    #[error("cancelled")]
    Cancelled,
}

fn rejected_display(status: Option<u16>, message: &str) -> String {
    match status {
        Some(code) => format!("upstream rejected the request ({code}): {message}"),
        None => format!("upstream rejected the request: {message}"),
    }
}

impl FailureReason {
    pub fn unavailable(message: impl Into<String>) -> Self {
        FailureReason::UpstreamUnavailable {
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        FailureReason::MalformedUpstreamChunk {
            message: message.into(),
        }
    }

    /// Stable snake_case name, matching the wire `kind` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            FailureReason::UpstreamUnavailable { .. } => "upstream_unavailable",
            FailureReason::UpstreamRejected { .. } => "upstream_rejected",
            FailureReason::Timeout { .. } => "timeout",
            FailureReason::MalformedUpstreamChunk { .. } => "malformed_upstream_chunk",
            FailureReason::Cancelled => "cancelled",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEvent {
    Delta(String),
    Done,
    Failed(FailureReason),
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Delta(_))
    }
}

pub struct StreamParams {
    pub backend: Arc<dyn GenerationBackend>,
    pub request: GenerationRequest,
    pub cancel_token: CancellationToken,
    pub stream_id: u64,
}

/// Runs generations on background tasks and funnels their events, tagged with
/// the stream id, into a single receiver.
#[derive(Clone)]
pub struct ChatStreamService {
    tx: mpsc::UnboundedSender<(StreamEvent, u64)>,
}

impl ChatStreamService {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(StreamEvent, u64)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn spawn_stream(&self, params: StreamParams) {
        let tx_clone = self.tx.clone();
        tokio::spawn(async move {
            let StreamParams {
                backend,
                request,
                cancel_token,
                stream_id,
            } = params;

            let mut events = backend.open(request, cancel_token.clone());

            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel_token.cancelled() => {
                        debug!(stream_id, "stream cancelled by consumer");
                        return;
                    }
                    next = events.next() => next,
                };

                match next {
                    Some(event) => {
                        let terminal = event.is_terminal();
                        if tx_clone.send((event, stream_id)).is_err() || terminal {
                            return;
                        }
                    }
                    None => {
                        if !cancel_token.is_cancelled() {
                            let reason =
                                FailureReason::unavailable("stream ended before completion");
                            let _ = tx_clone.send((StreamEvent::Failed(reason), stream_id));
                        }
                        return;
                    }
                }
            }
        });
    }
}
