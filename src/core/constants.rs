//! Shared constants used across the application

/// Sampling temperature sent with every upstream completion request.
pub const TEMPERATURE: f32 = 0.7;

/// Completion token ceiling sent with every upstream completion request.
pub const MAX_TOKENS: u32 = 4000;

/// Hard wall-clock ceiling for one generation.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_SITE_URL: &str = "http://localhost:3000";
pub const DEFAULT_APP_TITLE: &str = "Multi-Model Chatbot";
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:3000";

/// Keyring service and user under which the upstream API key is stored.
pub const KEYRING_SERVICE: &str = "polychat";
pub const KEYRING_USER: &str = "openrouter";
