use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

fn pattern(source: &str) -> Regex {
    match Regex::new(source) {
        Ok(regex) => regex,
        Err(err) => unreachable!("built-in redirect pattern failed to compile: {err}"),
    }
}

// Path traversal, the most common attack on relative redirects
static PATH_TRAVERSAL_PATTERN: Lazy<Regex> = Lazy::new(|| pattern(r"\.\."));

// Scheme or protocol-relative prefix smuggled into a path
static PROTOCOL_PATTERN: Lazy<Regex> = Lazy::new(|| pattern(r"(?i)^(?:[a-z][a-z0-9+.-]*:)|(?:/{2,})"));

// Control characters, encoded line breaks, backslashes and invisible code points
static SUSPICIOUS_PATTERN: Lazy<Regex> = Lazy::new(|| {
    pattern(r"(?i)[\x00-\x1F\x7F-\x9F]|%(?:00|0[aAdD]|09|5c)|\\|[\u{200E}\u{200F}\u{2060}-\u{2064}\u{2000}-\u{200A}]")
});

const DANGEROUS_PROTOCOLS: &[&str] = &["javascript:", "vbscript:", "data:", "file:"];

const MAX_REDIRECT_LENGTH: usize = 2048;

/// Validate a post-authentication redirect against the deployment's base URL
///
/// Relative paths are resolved against the base URL's origin; absolute URLs
/// must share that origin. Returns the absolute URL to redirect to, or
/// `None` when the target is unsafe.
#[must_use]
pub fn validate_redirect(redirect_url: &str, base_url: &str) -> Option<String> {
    let base = Url::parse(base_url).ok()?;
    if redirect_url.len() > MAX_REDIRECT_LENGTH {
        warn!("Excessively long redirect URL: {} characters", redirect_url.len());
        return None;
    }

    if is_relative_url(redirect_url) {
        if !passes_pattern_checks(redirect_url) {
            return None;
        }
        let resolved = format!("{}{redirect_url}", origin_of(&base));
        debug!("Validated relative redirect URL: {redirect_url}");
        return Some(resolved);
    }

    let parsed = match Url::parse(redirect_url) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!("Rejected unparsable redirect URL: {e}");
            return None;
        }
    };
    if parsed.origin() != base.origin() {
        warn!(
            "Rejected cross-origin redirect to {}",
            parsed.host_str().unwrap_or("<no host>")
        );
        return None;
    }
    if !passes_pattern_checks(parsed.path()) {
        return None;
    }
    Some(redirect_url.to_string())
}

/// The validated target, or the base URL when `redirect_url` is absent or
/// unsafe
#[must_use]
pub fn resolve_callback_url(redirect_url: Option<&str>, base_url: &str) -> String {
    redirect_url
        .filter(|url| !url.is_empty())
        .and_then(|url| validate_redirect(url, base_url))
        .unwrap_or_else(|| base_url.trim_end_matches('/').to_string())
}

/// Resolve a configured page (path or absolute URL) against the base URL
#[must_use]
pub fn absolute_page_url(page: &str, base_url: &str) -> String {
    if page.starts_with('/') && !page.starts_with("//") {
        match Url::parse(base_url) {
            Ok(base) => format!("{}{page}", origin_of(&base)),
            Err(_) => page.to_string(),
        }
    } else {
        page.to_string()
    }
}

/// Origin of `url` without a trailing slash
#[must_use]
pub fn origin_of(url: &Url) -> String {
    url.origin().ascii_serialization()
}

fn is_relative_url(url: &str) -> bool {
    url.starts_with('/') && !url.starts_with("//") && !url.contains(':')
}

fn passes_pattern_checks(path: &str) -> bool {
    for decoded in get_decoded_variants(path) {
        if PATH_TRAVERSAL_PATTERN.is_match(&decoded) {
            warn!("Path traversal attempt in redirect");
            return false;
        }
        if PROTOCOL_PATTERN.is_match(&decoded) {
            warn!("Protocol injection attempt in redirect");
            return false;
        }
        if SUSPICIOUS_PATTERN.is_match(&decoded) {
            warn!("Suspicious characters in redirect");
            return false;
        }
        let lower = decoded.to_lowercase();
        if DANGEROUS_PROTOCOLS.iter().any(|p| lower.contains(p)) {
            warn!("Dangerous protocol in redirect");
            return false;
        }
        if decoded.matches('@').count() > 1 {
            warn!("Multiple @ symbols in redirect (domain confusion)");
            return false;
        }
    }
    true
}

/// The input plus its single and double URL-decoded forms, when different
fn get_decoded_variants(path: &str) -> Vec<String> {
    let mut variants = Vec::with_capacity(3);
    variants.push(path.to_string());

    if let Ok(decoded) = urlencoding::decode(path) {
        let decoded = decoded.into_owned();
        if decoded != path {
            if let Ok(double_decoded) = urlencoding::decode(&decoded) {
                let double_decoded = double_decoded.into_owned();
                if double_decoded != decoded {
                    variants.push(double_decoded);
                }
            }
            variants.push(decoded);
        }
    }

    variants
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://app.example.com";

    #[test]
    fn test_legitimate_redirects() {
        for redirect in [
            "/dashboard",
            "/users/123",
            "/search?q=test",
            "/app/profile?tab=settings",
            "/",
        ] {
            assert_eq!(
                validate_redirect(redirect, BASE),
                Some(format!("{BASE}{redirect}")),
                "should allow {redirect}"
            );
        }
        assert_eq!(
            validate_redirect("https://app.example.com/welcome", BASE).as_deref(),
            Some("https://app.example.com/welcome")
        );
    }

    #[test]
    fn test_path_traversal_blocked() {
        for redirect in [
            "/api/../../../etc/passwd",
            "/..%2F..%2Fetc%2Fpasswd",
            "/..%252F..%252Fetc",
        ] {
            assert!(validate_redirect(redirect, BASE).is_none(), "should block {redirect}");
        }
    }

    #[test]
    fn test_open_redirects_blocked() {
        for redirect in [
            "//evil.com",
            "///evil.com",
            "http://evil.com",
            "https://app.example.com.evil.com/",
            "http://app.example.com/",
            "javascript:alert(1)",
            "data:text/html,<script>alert(1)</script>",
            "/path%00/to/file",
            "/a\\b",
        ] {
            assert!(validate_redirect(redirect, BASE).is_none(), "should block {redirect}");
        }
    }

    #[test]
    fn test_resolve_falls_back_to_base() {
        assert_eq!(resolve_callback_url(None, "https://app.example.com/"), BASE);
        assert_eq!(resolve_callback_url(Some(""), BASE), BASE);
        assert_eq!(resolve_callback_url(Some("//evil.com"), BASE), BASE);
        assert_eq!(
            resolve_callback_url(Some("/ok"), BASE),
            "https://app.example.com/ok"
        );
    }

    #[test]
    fn test_absolute_page_url() {
        assert_eq!(
            absolute_page_url("/auth/error", "https://app.example.com/base"),
            "https://app.example.com/auth/error"
        );
        assert_eq!(
            absolute_page_url("https://pages.example.com/x", BASE),
            "https://pages.example.com/x"
        );
    }
}
