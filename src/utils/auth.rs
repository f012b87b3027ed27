//! Authentication utilities for upstream API requests

use crate::core::config::ProxySettings;

pub const REFERER_HEADER: &str = "HTTP-Referer";
pub const TITLE_HEADER: &str = "X-Title";

/// Add the bearer credential and the two identifying headers OpenRouter uses
/// to attribute traffic to an application.
pub fn add_upstream_headers(
    request: reqwest::RequestBuilder,
    settings: &ProxySettings,
) -> reqwest::RequestBuilder {
    request
        .bearer_auth(&settings.api_key)
        .header(REFERER_HEADER, &settings.site_url)
        .header(TITLE_HEADER, &settings.app_title)
}
