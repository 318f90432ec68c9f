//! Lightweight input validation helpers. Keep logic minimal and deterministic.

use url::Url;

use crate::CoreError;
use crate::ShortCode;

pub const MAX_URL_LEN: usize = 2048;
pub const MIN_TAG_LEN: usize = 3;
pub const MAX_TAG_LEN: usize = 64;

/// Validate an original URL: an absolute http/https URL with a host, no
/// whitespace or control characters, at most [`MAX_URL_LEN`] characters.
pub fn validate_original_url(s: &str) -> Result<(), CoreError> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Err(CoreError::InvalidUrl("empty".into()));
    }
    if trimmed.chars().count() > MAX_URL_LEN {
        return Err(CoreError::InvalidUrl("too long".into()));
    }
    // Stored destinations go into a Location header verbatim
    if trimmed.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(CoreError::InvalidUrl(
            "contains whitespace or control characters".into(),
        ));
    }
    let rest = trimmed
        .strip_prefix("http://")
        .or_else(|| trimmed.strip_prefix("https://"))
        .ok_or_else(|| CoreError::InvalidUrl("must start with http:// or https://".into()))?;
    if rest.split(['/', '?', '#']).next().map_or(true, str::is_empty) {
        return Err(CoreError::InvalidUrl("missing host".into()));
    }
    let parsed = Url::parse(trimmed).map_err(|e| CoreError::InvalidUrl(e.to_string()))?;
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(CoreError::InvalidUrl("missing host".into()));
    }
    Ok(())
}

/// Validate an explicit short code using the same rules as `ShortCode::new`.
pub fn validate_short_code(s: &str) -> Result<ShortCode, CoreError> {
    ShortCode::new(s.trim().to_string())
}

/// Validate and normalize a tag title. Titles are stored lowercase.
pub fn validate_tag_title(s: &str) -> Result<String, CoreError> {
    let title = s.trim().to_lowercase();
    let len = title.chars().count();
    if len < MIN_TAG_LEN || len > MAX_TAG_LEN {
        return Err(CoreError::InvalidTag(format!(
            "title must be {MIN_TAG_LEN}-{MAX_TAG_LEN} characters"
        )));
    }
    if title.contains(',') {
        return Err(CoreError::InvalidTag("title must not contain commas".into()));
    }
    Ok(title)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_validation_basic() {
        assert!(validate_original_url("https://example.com").is_ok());
        assert!(validate_original_url("http://example.com/a?b=c#d").is_ok());
        assert!(validate_original_url("").is_err());
        assert!(validate_original_url("ftp://example.com").is_err());
        assert!(validate_original_url("https://").is_err());
        assert!(validate_original_url("https:///path").is_err());
        assert!(validate_original_url("https://exa mple.com").is_err());
        assert!(validate_original_url("https://exa_mple.com:99999").is_err());
    }

    #[test]
    fn url_with_control_characters_is_rejected() {
        assert!(matches!(
            validate_original_url("https://e.com/a\u{1}b"),
            Err(CoreError::InvalidUrl(_))
        ));
        assert!(validate_original_url("https://e.com/a\u{7f}").is_err());
        assert!(validate_original_url("https://e.com/caf\u{e9}").is_ok());
    }

    #[test]
    fn url_length_limit() {
        let ok = format!("https://e.com/{}", "a".repeat(MAX_URL_LEN - 14));
        assert_eq!(ok.len(), MAX_URL_LEN);
        assert!(validate_original_url(&ok).is_ok());
        let long = format!("{ok}a");
        assert!(matches!(validate_original_url(&long), Err(CoreError::InvalidUrl(_))));
    }

    #[test]
    fn short_code_validation_delegates() {
        assert_eq!(validate_short_code(" abc123 ").unwrap().as_str(), "abc123");
        assert!(validate_short_code("").is_err());
        assert!(validate_short_code("bad/char").is_err());
    }

    #[test]
    fn tag_titles() {
        assert_eq!(validate_tag_title("  rust ").unwrap(), "rust");
        assert_eq!(validate_tag_title("Rust").unwrap(), "rust");
        assert!(validate_tag_title("ab").is_err());
        assert!(validate_tag_title(&"x".repeat(65)).is_err());
        assert!(validate_tag_title("a,b,c").is_err());
    }
}
