use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::core::config::io::ConfigError;

/// On-disk configuration. Every field is optional; unset fields fall back to
/// the built-in defaults when settings are resolved.
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct Config {
    /// Upstream OpenAI-compatible API base URL
    pub base_url: Option<String>,
    /// Sent upstream as `HTTP-Referer`
    pub site_url: Option<String>,
    /// Sent upstream as `X-Title`
    pub app_title: Option<String>,
    /// Hard ceiling for one generation, in seconds
    pub timeout_secs: Option<u64>,
    /// Address `polychat serve` binds to
    pub listen_addr: Option<String>,
    /// Remote proxy used by `polychat chat`; the proxy runs in-process when unset
    pub proxy_url: Option<String>,
    /// Initial model selection for chat sessions
    pub default_model: Option<String>,
}

/// Keys accepted by `polychat set` / `polychat unset`.
pub const CONFIG_KEYS: &[&str] = &[
    "base-url",
    "site-url",
    "app-title",
    "timeout-secs",
    "listen-addr",
    "proxy-url",
    "default-model",
];

impl Config {
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: key.to_string(),
                reason: "value must not be empty".to_string(),
            });
        }

        match key {
            "base-url" => self.base_url = Some(value.to_string()),
            "site-url" => self.site_url = Some(value.to_string()),
            "app-title" => self.app_title = Some(value.to_string()),
            "timeout-secs" => {
                let secs: u64 = value.parse().map_err(|_| ConfigError::InvalidValue {
                    key: key.to_string(),
                    reason: format!("`{value}` is not a whole number of seconds"),
                })?;
                check_timeout(secs)?;
                self.timeout_secs = Some(secs);
            }
            "listen-addr" => self.listen_addr = Some(value.to_string()),
            "proxy-url" => self.proxy_url = Some(value.to_string()),
            "default-model" => self.default_model = Some(value.to_string()),
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        }
        Ok(())
    }

    /// Reject values that parse but cannot work, such as a zero timeout.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.timeout_secs {
            Some(secs) => check_timeout(secs),
            None => Ok(()),
        }
    }

    pub fn unset_value(&mut self, key: &str) -> Result<(), ConfigError> {
        match key {
            "base-url" => self.base_url = None,
            "site-url" => self.site_url = None,
            "app-title" => self.app_title = None,
            "timeout-secs" => self.timeout_secs = None,
            "listen-addr" => self.listen_addr = None,
            "proxy-url" => self.proxy_url = None,
            "default-model" => self.default_model = None,
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        }
        Ok(())
    }

    pub fn print_all(&self) {
        fn show(value: Option<&str>) -> &str {
            value.unwrap_or("(default)")
        }

        println!("base-url:      {}", show(self.base_url.as_deref()));
        println!("site-url:      {}", show(self.site_url.as_deref()));
        println!("app-title:     {}", show(self.app_title.as_deref()));
        match self.timeout_secs {
            Some(secs) => println!("timeout-secs:  {secs}"),
            None => println!("timeout-secs:  (default)"),
        }
        println!("listen-addr:   {}", show(self.listen_addr.as_deref()));
        println!("proxy-url:     {}", show(self.proxy_url.as_deref()));
        println!("default-model: {}", show(self.default_model.as_deref()));
    }
}

fn check_timeout(secs: u64) -> Result<(), ConfigError> {
    if secs == 0 {
        return Err(ConfigError::InvalidValue {
            key: "timeout-secs".to_string(),
            reason: "timeout must be at least one second".to_string(),
        });
    }
    Ok(())
}

/// Get a user-friendly display string for a path
/// Converts absolute paths to use ~ notation on Unix-like systems when possible
pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}
