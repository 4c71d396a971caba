use url::Url;

use crate::error::ServiceError;
use crate::models::BlacklistEntry;

/// Path prefixes the API itself occupies; none of them may become a short code.
pub const RESERVED_CODES: &[&str] = &[
    "api", "admin", "assets", "docs", "health", "login", "logout", "metrics", "static",
];

pub const MIN_CODE_LEN: usize = 4;
pub const MAX_CODE_LEN: usize = 10;

/// Screens a candidate destination: scheme and shape first, then the
/// tenant-independent blacklist. Pure — no side effects, no store writes.
pub fn screen_destination(
    raw: &str,
    blacklist: &[BlacklistEntry],
) -> Result<Url, ServiceError> {
    let url = Url::parse(raw)
        .map_err(|_| ServiceError::Validation("malformed destination URL".to_string()))?;
    if !matches!(url.scheme(), "https" | "http") {
        return Err(ServiceError::Validation(format!(
            "blocked scheme: {}",
            url.scheme()
        )));
    }
    if url.host_str().is_none() {
        return Err(ServiceError::Validation(
            "destination URL has no host".to_string(),
        ));
    }
    if let Some(entry) = blacklist.iter().find(|entry| entry.matches_url(&url)) {
        return Err(ServiceError::BlacklistedDestination(entry.reason.clone()));
    }
    Ok(url)
}

/// Shape rules for caller-supplied codes: 4-10 alphanumeric characters, not
/// a reserved word (case-insensitively).
pub fn validate_custom_code(code: &str) -> Result<(), ServiceError> {
    if code.len() < MIN_CODE_LEN || code.len() > MAX_CODE_LEN {
        return Err(ServiceError::Validation(format!(
            "short code must be {MIN_CODE_LEN}-{MAX_CODE_LEN} characters"
        )));
    }
    if !code.chars().all(|ch| ch.is_ascii_alphanumeric()) {
        return Err(ServiceError::Validation(
            "short code must be alphanumeric".to_string(),
        ));
    }
    if RESERVED_CODES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(code))
    {
        return Err(ServiceError::Validation(format!(
            "short code '{code}' is reserved"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MatchType;
    use uuid::Uuid;

    fn entry(destination: &str, match_type: MatchType) -> BlacklistEntry {
        BlacklistEntry::new(
            destination.to_string(),
            match_type,
            "spam".to_string(),
            Uuid::new_v4(),
        )
    }

    #[test]
    fn rejects_non_http_schemes() {
        for raw in [
            "javascript:alert(1)",
            "file:///etc/passwd",
            "data:text/html,hi",
            "ftp://example.com/x",
        ] {
            let err = screen_destination(raw, &[]).unwrap_err();
            assert!(matches!(err, ServiceError::Validation(_)), "{raw}");
        }
    }

    #[test]
    fn rejects_malformed_urls() {
        assert!(matches!(
            screen_destination("not a url", &[]),
            Err(ServiceError::Validation(_))
        ));
        assert!(matches!(
            screen_destination("https://", &[]),
            Err(ServiceError::Validation(_))
        ));
    }

    #[test]
    fn accepts_plain_https() {
        let url = screen_destination("https://example.com/x", &[]).unwrap();
        assert_eq!(url.as_str(), "https://example.com/x");
    }

    #[test]
    fn domain_blacklist_covers_subdomains_but_not_paths() {
        let blacklist = vec![entry("bad.test", MatchType::Domain)];
        assert!(matches!(
            screen_destination("https://bad.test/anything", &blacklist),
            Err(ServiceError::BlacklistedDestination(_))
        ));
        assert!(matches!(
            screen_destination("https://a.bad.test/", &blacklist),
            Err(ServiceError::BlacklistedDestination(_))
        ));
        assert!(screen_destination("https://good.test/bad.test", &blacklist).is_ok());
    }

    #[test]
    fn exact_blacklist_is_literal() {
        let blacklist = vec![entry("https://bad.test/page", MatchType::Exact)];
        assert!(matches!(
            screen_destination("https://bad.test/page", &blacklist),
            Err(ServiceError::BlacklistedDestination(_))
        ));
        assert!(screen_destination("https://bad.test/other", &blacklist).is_ok());
    }

    #[test]
    fn code_shape_bounds() {
        assert!(validate_custom_code("abcd").is_ok());
        assert!(validate_custom_code("abcdefghij").is_ok());
        assert!(validate_custom_code("abc").is_err());
        assert!(validate_custom_code("abcdefghijk").is_err());
        assert!(validate_custom_code("ab-c").is_err());
        assert!(validate_custom_code("ab c").is_err());
    }

    #[test]
    fn reserved_words_are_rejected_case_insensitively() {
        assert!(validate_custom_code("admin").is_err());
        assert!(validate_custom_code("ADMIN").is_err());
        assert!(validate_custom_code("Login").is_err());
        assert!(validate_custom_code("admins").is_ok());
    }
}
