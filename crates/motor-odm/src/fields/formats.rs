//! Format validation for structured string fields
//!
//! Pre-compiled patterns for email, URL and ObjectId text.

use once_cell::sync::Lazy;
use regex::Regex;

// ============================================================================
// Pre-compiled Regex Patterns
// ============================================================================

/// Email regex pattern: `local@domain.tld`
static EMAIL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9-]+(\.[a-zA-Z0-9-]+)*\.[a-zA-Z]{2,}$").unwrap()
});

/// URL regex pattern: scheme, host (domain, localhost or IPv4), optional port and path
static URL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?i)^(?:http|ftp)s?://",
        r"(?:(?:[A-Z0-9](?:[A-Z0-9-]{0,61}[A-Z0-9])?\.)+(?:[A-Z]{2,6}\.?|[A-Z0-9-]{2,}\.?)",
        r"|localhost",
        r"|\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})",
        r"(?::\d+)?",
        r"(?:/?|[/?]\S+)$",
    ))
    .unwrap()
});

// ============================================================================
// Format Validators
// ============================================================================

/// Validate email format
///
/// # Example
/// ```
/// use motor_odm::fields::formats::validate_email;
///
/// assert!(validate_email("someone@gmail.com"));
/// assert!(!validate_email("someone@localhost"));
/// ```
pub fn validate_email(value: &str) -> bool {
    EMAIL_REGEX.is_match(value)
}

/// Validate URL format (http, https, ftp, ftps)
///
/// # Example
/// ```
/// use motor_odm::fields::formats::validate_url;
///
/// assert!(validate_url("http://www.globo.com/"));
/// assert!(!validate_url("some non url"));
/// ```
pub fn validate_url(value: &str) -> bool {
    URL_REGEX.is_match(value)
}

/// Checks if a string has valid ObjectId format (24 hex characters)
pub fn validate_object_id(value: &str) -> bool {
    value.len() == 24 && value.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_validation() {
        // Valid emails
        assert!(validate_email("user@example.com"));
        assert!(validate_email("test.user+tag@subdomain.example.co.uk"));

        // Invalid emails
        assert!(!validate_email("invalid-email"));
        assert!(!validate_email("@example.com"));
        assert!(!validate_email("user@"));
        assert!(!validate_email("user@.com"));
        assert!(!validate_email("user@example"));
    }

    #[test]
    fn test_url_validation() {
        // Valid URLs
        assert!(validate_url("http://example.com/"));
        assert!(validate_url("https://sub.domain.example.com/path?query=value"));
        assert!(validate_url("http://localhost:8080/health"));
        assert!(validate_url("ftp://10.0.0.1/files"));

        // Invalid URLs
        assert!(!validate_url("not a url"));
        assert!(!validate_url("example.com"));
        assert!(!validate_url("://example.com"));
        assert!(!validate_url("gopher://example.com"));
    }

    #[test]
    fn test_object_id_validation() {
        assert!(validate_object_id("507f1f77bcf86cd799439011"));
        assert!(!validate_object_id("507f1f77bcf86cd79943901"));
        assert!(!validate_object_id("zzzzzzzzzzzzzzzzzzzzzzzz"));
    }
}
