//! Process-wide settings resolved once at startup.
//!
//! Precedence: environment, then config file, then built-in defaults.

use std::fmt;
use std::time::Duration;

use crate::core::config::data::Config;
use crate::core::config::io::ConfigError;
use crate::core::constants::{
    DEFAULT_APP_TITLE, DEFAULT_BASE_URL, DEFAULT_LISTEN_ADDR, DEFAULT_SITE_URL,
    DEFAULT_TIMEOUT_SECS,
};

pub const ENV_API_KEY: &str = "OPENROUTER_API_KEY";
pub const ENV_BASE_URL: &str = "POLYCHAT_BASE_URL";
pub const ENV_SITE_URL: &str = "NEXT_PUBLIC_SITE_URL";
pub const ENV_APP_TITLE: &str = "POLYCHAT_APP_TITLE";

/// Everything the streaming proxy needs to reach the upstream provider.
#[derive(Clone, PartialEq, Eq)]
pub struct ProxySettings {
    pub base_url: String,
    pub api_key: String,
    pub site_url: String,
    pub app_title: String,
    pub timeout: Duration,
}

// Keep the credential out of logs.
impl fmt::Debug for ProxySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxySettings")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("site_url", &self.site_url)
            .field("app_title", &self.app_title)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ProxySettings {
    pub fn resolve(config: &Config, api_key: String) -> Self {
        Self::resolve_with_env(config, api_key, |name| std::env::var(name).ok())
    }

    pub fn resolve_with_env<F>(config: &Config, api_key: String, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let pick = |var: &str, configured: &Option<String>, default: &str| {
            env(var)
                .filter(|value| !value.trim().is_empty())
                .or_else(|| configured.clone())
                .unwrap_or_else(|| default.to_string())
        };

        Self {
            base_url: pick(ENV_BASE_URL, &config.base_url, DEFAULT_BASE_URL),
            api_key,
            site_url: pick(ENV_SITE_URL, &config.site_url, DEFAULT_SITE_URL),
            app_title: pick(ENV_APP_TITLE, &config.app_title, DEFAULT_APP_TITLE),
            timeout: Duration::from_secs(config.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
        }
    }
}

/// Settings consumed by the chat front-end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub proxy_url: Option<String>,
    pub default_model: Option<String>,
    pub listen_addr: String,
}

impl ClientSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            proxy_url: config.proxy_url.clone(),
            default_model: config.default_model.clone(),
            listen_addr: config
                .listen_addr
                .clone()
                .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string()),
        }
    }
}

/// Environment first, then whatever `stored` finds (the keyring in practice).
pub fn resolve_api_key<F>(env_value: Option<String>, stored: F) -> Result<String, ConfigError>
where
    F: FnOnce() -> Result<Option<String>, ConfigError>,
{
    if let Some(key) = env_value.filter(|key| !key.trim().is_empty()) {
        return Ok(key.trim().to_string());
    }

    match stored()? {
        Some(key) if !key.trim().is_empty() => Ok(key.trim().to_string()),
        _ => Err(ConfigError::MissingApiKey),
    }
}
