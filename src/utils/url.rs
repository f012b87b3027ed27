//! Endpoint URL joining.

/// Strip trailing slashes so endpoint paths can be appended safely.
///
/// ```
/// use polychat::utils::url::normalize_base_url;
///
/// assert_eq!(normalize_base_url("https://openrouter.ai/api/v1//"), "https://openrouter.ai/api/v1");
/// ```
pub fn normalize_base_url(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

/// Join a base URL and an endpoint path with exactly one slash between them.
///
/// ```
/// use polychat::utils::url::construct_api_url;
///
/// assert_eq!(
///     construct_api_url("https://openrouter.ai/api/v1/", "/chat/completions"),
///     "https://openrouter.ai/api/v1/chat/completions"
/// );
/// assert_eq!(
///     construct_api_url("http://localhost:3000", "api/chat"),
///     "http://localhost:3000/api/chat"
/// );
/// ```
pub fn construct_api_url(base_url: &str, endpoint: &str) -> String {
    format!(
        "{}/{}",
        normalize_base_url(base_url),
        endpoint.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_completion_url_has_single_separator() {
        for base in [
            "https://openrouter.ai/api/v1",
            "https://openrouter.ai/api/v1/",
            "https://openrouter.ai/api/v1///",
        ] {
            assert_eq!(
                construct_api_url(base, "chat/completions"),
                "https://openrouter.ai/api/v1/chat/completions"
            );
        }
    }

    #[test]
    fn proxy_url_keeps_host_only_bases_intact() {
        assert_eq!(normalize_base_url("http://127.0.0.1:3000/"), "http://127.0.0.1:3000");
        assert_eq!(
            construct_api_url("http://127.0.0.1:3000", "/api/chat"),
            "http://127.0.0.1:3000/api/chat"
        );
    }
}
