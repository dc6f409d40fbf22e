//! Endpoint URL helpers shared by the LLM provider and the HTTP MCP transport.

/// Strips trailing slashes so endpoint paths can be appended safely.
///
/// ```
/// use mcpmux::utils::url::normalize_base_url;
///
/// assert_eq!(normalize_base_url("https://api.example.com/v1//"), "https://api.example.com/v1");
/// ```
pub fn normalize_base_url(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

/// Joins a base URL and an endpoint path with exactly one slash between them.
///
/// ```
/// use mcpmux::utils::url::construct_api_url;
///
/// assert_eq!(
///     construct_api_url("https://api.example.com/v1/", "/chat/completions"),
///     "https://api.example.com/v1/chat/completions"
/// );
/// ```
pub fn construct_api_url(base_url: &str, endpoint: &str) -> String {
    let endpoint = endpoint.trim_start_matches('/');
    format!("{}/{}", normalize_base_url(base_url), endpoint)
}

/// True for absolute `http://` or `https://` URLs.
pub fn is_http_url(value: &str) -> bool {
    let lowered = value.trim().to_ascii_lowercase();
    ["http://", "https://"]
        .iter()
        .any(|scheme| lowered.starts_with(scheme) && lowered.len() > scheme.len())
}
