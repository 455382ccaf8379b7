//! `Retry-After` header parsing
//!
//! Throttled responses are surfaced to the caller instead of being retried;
//! the parsed delay travels inside [`ApiError::RateLimited`](crate::ApiError)
//! so the caller can decide when to try again.

use reqwest::header::{HeaderMap, RETRY_AFTER};
use tracing::debug;

/// Parse a `Retry-After` value given either as delta-seconds or as an
/// HTTP-date (RFC 7231).
///
/// Returns the number of seconds from now, `Some(0)` for dates in the past,
/// and `None` when the value cannot be parsed.
///
/// # Examples
/// ```
/// use atrium_client::parse_retry_after;
///
/// assert_eq!(parse_retry_after("60"), Some(60));
/// assert_eq!(parse_retry_after("invalid"), None);
/// ```
pub fn parse_retry_after(header_value: &str) -> Option<u64> {
    if let Ok(seconds) = header_value.trim().parse::<u64>() {
        return Some(seconds);
    }

    if let Ok(target_time) = chrono::DateTime::parse_from_rfc2822(header_value.trim()) {
        let remaining = target_time.signed_duration_since(chrono::Utc::now());
        return Some(u64::try_from(remaining.num_seconds()).unwrap_or(0));
    }

    debug!(header_value, "Failed to parse retry-after header");
    None
}

/// Read and parse the `Retry-After` header of a response
pub fn retry_after_from_headers(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_retry_after)
}
