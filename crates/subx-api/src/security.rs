//! Input validation for user-supplied endpoints, keys and names.
//!
//! A user can point the backend at their own R2 or B2 bucket. The endpoint is
//! fetched server-side, so it is checked against internal address patterns
//! and a provider suffix whitelist before any request goes out.

use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;
use url::Url;

const MAX_URL_LENGTH: usize = 2048;

/// Longest object key accepted from a client.
pub const MAX_KEY_LENGTH: usize = 1024;

/// Longest project or glossary name kept.
pub const MAX_NAME_LENGTH: usize = 200;

/// Hosts a user bucket endpoint may live under.
const ALLOWED_ENDPOINT_SUFFIXES: &[&str] = &["r2.cloudflarestorage.com", "backblazeb2.com"];

/// Internal ranges and metadata hosts.
static BLOCKED_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"^https?://127\.",
        r"^https?://localhost",
        r"^https?://0\.",
        r"^https?://10\.",
        r"^https?://172\.(1[6-9]|2[0-9]|3[0-1])\.",
        r"^https?://192\.168\.",
        r"^https?://169\.254\.",
        r"^https?://\[::1?\]",
        r"^https?://\[f[cd]",
        r"^https?://\[fe80",
        r"^https?://metadata\.",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// Check a user bucket endpoint, returning the normalized URL.
pub fn validate_endpoint_url(endpoint: &str) -> Result<String, String> {
    let endpoint = endpoint.trim();
    if endpoint.is_empty() {
        return Err("Endpoint cannot be empty".to_string());
    }
    if endpoint.len() > MAX_URL_LENGTH {
        return Err(format!(
            "Endpoint exceeds maximum length of {} characters",
            MAX_URL_LENGTH
        ));
    }

    let parsed = Url::parse(endpoint).map_err(|e| format!("Invalid endpoint URL: {}", e))?;
    if parsed.scheme() != "https" {
        return Err("Endpoint must use HTTPS".to_string());
    }

    let lowered = endpoint.to_ascii_lowercase();
    if BLOCKED_PATTERNS.iter().any(|p| p.is_match(&lowered)) {
        warn!(endpoint = %endpoint, "Blocked storage endpoint");
        return Err("Endpoint targets an internal or restricted address".to_string());
    }

    let host = parsed
        .host_str()
        .map(|h| h.to_ascii_lowercase())
        .ok_or_else(|| "Endpoint must have a host".to_string())?;

    let allowed = ALLOWED_ENDPOINT_SUFFIXES
        .iter()
        .any(|suffix| host == *suffix || host.ends_with(&format!(".{}", suffix)));
    if !allowed {
        return Err(format!(
            "Endpoint host '{}' is not a Cloudflare R2 or Backblaze B2 endpoint",
            host
        ));
    }

    Ok(parsed.to_string().trim_end_matches('/').to_string())
}

/// Object keys from clients: relative, no traversal, bounded.
pub fn is_valid_object_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= MAX_KEY_LENGTH
        && !key.starts_with('/')
        && !key.contains('\\')
        && !key.split('/').any(|segment| segment == "..")
        && !key.chars().any(|c| c.is_control())
}

/// Trim and strip control characters from a display name.
pub fn sanitize_name(input: &str) -> String {
    input
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_NAME_LENGTH)
        .collect()
}
