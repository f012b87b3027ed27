use serde::{Deserialize, Serialize};

pub mod data_stream;

/// A single `{role, content}` pair, both on the inbound proxy request and on
/// the outbound chat-completions request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Body accepted by `POST /api/chat`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyChatRequest {
    pub messages: Vec<ChatMessage>,
    pub model: String,
}

/// Outbound OpenAI-compatible streaming completion request.
#[derive(Debug, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Deserialize)]
pub struct ChatResponseDelta {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Deserialize)]
pub struct ChatResponseChoice {
    pub delta: ChatResponseDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Deserialize)]
pub struct ChatResponse {
    pub choices: Vec<ChatResponseChoice>,
}
