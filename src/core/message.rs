use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::ChatMessage;
use crate::core::chat_stream::FailureReason;

pub const ROLE_USER: &str = "user";
pub const ROLE_ASSISTANT: &str = "assistant";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => ROLE_USER,
            Role::Assistant => ROLE_ASSISTANT,
        }
    }

    pub fn is_user(self) -> bool {
        self == Role::User
    }

    pub fn is_assistant(self) -> bool {
        self == Role::Assistant
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for Role {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            ROLE_USER => Ok(Role::User),
            ROLE_ASSISTANT => Ok(Role::Assistant),
            _ => Err(format!("invalid message role: {value}")),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

impl From<Role> for String {
    fn from(value: Role) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Complete,
    Streaming,
    Errored,
}

impl MessageStatus {
    /// Complete and errored messages never change again.
    pub fn is_terminal(self) -> bool {
        !matches!(self, MessageStatus::Streaming)
    }
}

/// Opaque per-message token: 16 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

static FALLBACK_ID: AtomicU64 = AtomicU64::new(1);

impl MessageId {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 8];
        let value = match getrandom::fill(&mut bytes) {
            Ok(()) => u64::from_le_bytes(bytes),
            // OS entropy unavailable; mix the clock with a process counter.
            Err(_) => {
                let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default() as u64;
                nanos ^ FALLBACK_ID.fetch_add(1, Ordering::Relaxed).rotate_left(32)
            }
        };
        Self(format!("{value:016x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One turn of the transcript.
///
/// User messages are born complete. Assistant messages are born streaming,
/// accept appended text until they transition once to complete or errored,
/// and are frozen after that.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    id: MessageId,
    role: Role,
    content: String,
    status: MessageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure: Option<FailureReason>,
    created_at: DateTime<Utc>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: MessageId::generate(),
            role: Role::User,
            content: content.into(),
            status: MessageStatus::Complete,
            failure: None,
            created_at: Utc::now(),
        }
    }

    pub fn assistant_pending() -> Self {
        Self {
            id: MessageId::generate(),
            role: Role::Assistant,
            content: String::new(),
            status: MessageStatus::Streaming,
            failure: None,
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &MessageId {
        &self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn status(&self) -> MessageStatus {
        self.status
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        self.failure.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns false (and leaves the content alone) once the message is frozen.
    pub(crate) fn append(&mut self, text: &str) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.content.push_str(text);
        true
    }

    pub(crate) fn complete(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = MessageStatus::Complete;
        true
    }

    pub(crate) fn fail(&mut self, reason: FailureReason) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = MessageStatus::Errored;
        self.failure = Some(reason);
        true
    }

    pub fn to_api(&self) -> ChatMessage {
        ChatMessage {
            role: self.role.as_str().to_string(),
            content: self.content.clone(),
        }
    }
}
