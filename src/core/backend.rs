//! The seam between the conversation controller and whatever produces tokens.
//!
//! [`crate::proxy::StreamingProxy`] implements it in-process;
//! [`crate::core::proxy_client::ProxyClient`] implements it against a remote
//! proxy's `POST /api/chat`.

use futures_util::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use crate::api::ChatMessage;
use crate::core::chat_stream::StreamEvent;

pub type EventStream = BoxStream<'static, StreamEvent>;

/// Transcript snapshot plus model selection, built at submit time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub messages: Vec<ChatMessage>,
    pub model: String,
}

pub trait GenerationBackend: Send + Sync {
    /// Starts one generation.
    ///
    /// The returned sequence is lazy and single-use. It ends with exactly one
    /// `Done` or `Failed`, unless `cancel` fires first, in which case it ends
    /// without a terminal event and releases its upstream connection.
    fn open(&self, request: GenerationRequest, cancel: CancellationToken) -> EventStream;
}
