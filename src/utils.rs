//! Small helpers shared across modules.

use std::time::Duration;
use tracing::warn;

/// HTTP client whose requests time out after `timeout`.
///
/// If the configured client cannot be built the error is logged and a client
/// without the timeout is returned.
#[must_use]
pub fn create_http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            warn!(
                timeout_secs = timeout.as_secs_f64(),
                error = %e,
                "Failed to build HTTP client with timeout, using defaults"
            );
            reqwest::Client::new()
        })
}

/// Truncate a string to at most `max_chars` characters (not bytes).
#[must_use]
pub fn truncate_str(s: impl AsRef<str>, max_chars: usize) -> String {
    let s = s.as_ref();
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    s.char_indices()
        .nth(max_chars)
        .map_or_else(|| s.to_string(), |(pos, _)| s[..pos].to_string())
}

/// Resolve a sandbox path against the sandbox working directory.
///
/// Absolute paths are returned unchanged.
#[must_use]
pub fn resolve_sandbox_path(path: &str, working_dir: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        let trimmed = path.trim_start_matches("./");
        format!("{}/{trimmed}", working_dir.trim_end_matches('/'))
    }
}
