//! Shared HTTP utilities for the URL shortener workspace.
//!
//! Provides the error body shape, short URL building, timestamp formatting
//! and pagination helpers used by the api-server.

use chrono::{DateTime, SecondsFormat, Utc};
use std::time::SystemTime;

// ============================================================================
// JSON Response Helpers (framework-agnostic)
// ============================================================================

/// Create a structured error JSON with a default message based on the code.
///
/// Returns: `{"error": {"code": "<code>", "message": "<default message>"}}`
pub fn json_err(code: &str) -> serde_json::Value {
    let message = match code {
        "not_found" => "Resource not found",
        "bad_request" => "Bad request",
        "invalid_short_code" => "Invalid short code format",
        "unpublished" => "This link is not published",
        "blocked" => "This link is blocked",
        "quota_exceeded" => "Daily limit of links for this email reached",
        "unauthorized" => "Authentication required",
        "forbidden" => "Access denied",
        "account_blocked" => "Your account is blocked",
        "conflict" => "Resource already exists",
        "last_admin" => "At least one administrator must remain",
        "error" | "internal" => "Internal server error",
        _ => code, // Fallback to code as message for unknown codes
    };
    serde_json::json!({"error": {"code": code, "message": message}})
}

/// Create a structured error JSON with a custom message.
///
/// Returns: `{"error": {"code": "<code>", "message": "<message>"}}`
pub fn json_error_with_message(code: &str, message: &str) -> serde_json::Value {
    serde_json::json!({"error": {"code": code, "message": message}})
}

// ============================================================================
// URL Building
// ============================================================================

/// Path prefix under which short codes are served.
pub const REDIRECT_PREFIX: &str = "/r";

/// Build the public short URL for `code`.
///
/// A configured `domain` wins (`{domain}/r/{code}`); otherwise falls back to
/// `https://{host}/r/{code}`, or the bare path when `host` is empty.
pub fn build_short_url(domain: Option<&str>, host: &str, code: &str) -> String {
    if let Some(dom) = domain.filter(|d| !d.is_empty()) {
        return format!("{}{}/{}", dom.trim_end_matches('/'), REDIRECT_PREFIX, code);
    }
    if host.is_empty() {
        format!("{}/{}", REDIRECT_PREFIX, code)
    } else {
        format!("https://{}{}/{}", host, REDIRECT_PREFIX, code)
    }
}

// ============================================================================
// Time Utilities
// ============================================================================

/// Convert SystemTime to RFC3339 string (seconds precision, UTC).
pub fn system_time_to_rfc3339(t: SystemTime) -> String {
    let dt: DateTime<Utc> = t.into();
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse an RFC3339 string to SystemTime.
///
/// Returns an error if the string is not a valid RFC3339 timestamp.
pub fn rfc3339_to_system_time(s: &str) -> Result<SystemTime, chrono::ParseError> {
    let dt = DateTime::parse_from_rfc3339(s.trim())?;
    Ok(dt.with_timezone(&Utc).into())
}

// ============================================================================
// Pagination
// ============================================================================

/// Largest page size a client may ask for.
pub const MAX_PER_PAGE: usize = 100;

/// Normalize `page`/`per_page` query values: pages start at 1, page size
/// falls back to `default_per_page` and is capped at [`MAX_PER_PAGE`].
pub fn normalize_page(
    page: Option<usize>,
    per_page: Option<usize>,
    default_per_page: usize,
) -> (usize, usize) {
    let page = page.unwrap_or(1).max(1);
    let per_page = per_page
        .filter(|n| *n > 0)
        .unwrap_or(default_per_page)
        .clamp(1, MAX_PER_PAGE);
    (page, per_page)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn test_json_err() {
        let err = json_err("not_found");
        assert_eq!(err, serde_json::json!({"error": {"code": "not_found", "message": "Resource not found"}}));

        let err = json_err("blocked");
        assert_eq!(err["error"]["message"], "This link is blocked");

        // Unknown code falls back to code as message
        let err = json_err("custom_error");
        assert_eq!(err, serde_json::json!({"error": {"code": "custom_error", "message": "custom_error"}}));
    }

    #[test]
    fn test_json_error_with_message() {
        let err = json_error_with_message("bad_request", "Invalid input");
        assert_eq!(
            err,
            serde_json::json!({"error": {"code": "bad_request", "message": "Invalid input"}})
        );
    }

    #[test]
    fn test_build_short_url() {
        assert_eq!(build_short_url(None, "example.com", "abc"), "https://example.com/r/abc");
        assert_eq!(build_short_url(None, "", "abc"), "/r/abc");
        assert_eq!(build_short_url(Some("https://s.io/"), "example.com", "abc"), "https://s.io/r/abc");
        assert_eq!(build_short_url(Some(""), "example.com", "abc"), "https://example.com/r/abc");
    }

    #[test]
    fn test_rfc3339_roundtrip() {
        let t = UNIX_EPOCH + Duration::from_secs(1_704_196_800);
        assert_eq!(system_time_to_rfc3339(t), "2024-01-02T12:00:00Z");
        assert_eq!(rfc3339_to_system_time("2024-01-02T13:00:00+01:00").unwrap(), t);
        assert!(rfc3339_to_system_time("yesterday").is_err());
    }

    #[test]
    fn test_normalize_page() {
        assert_eq!(normalize_page(None, None, 10), (1, 10));
        assert_eq!(normalize_page(Some(0), Some(0), 10), (1, 10));
        assert_eq!(normalize_page(Some(3), Some(25), 10), (3, 25));
        assert_eq!(normalize_page(Some(2), Some(1000), 10), (2, MAX_PER_PAGE));
    }
}
