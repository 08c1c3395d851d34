//! Assertion helpers for orchestrator responses

use std::collections::HashMap;

use url::Url;

use crate::error::ErrorKind;
use crate::orchestrator::AuthResponse;
use crate::session::cookie::is_removal;

/// Query parameters of the response's redirect target
///
/// # Panics
///
/// Panics if the redirect is not an absolute URL
#[must_use]
pub fn redirect_params(response: &AuthResponse) -> HashMap<String, String> {
    Url::parse(&response.redirect)
        .unwrap_or_else(|e| panic!("redirect '{}' is not a URL: {e}", response.redirect))
        .query_pairs()
        .into_owned()
        .collect()
}

/// Assert a successful response redirecting to `expected`
///
/// # Panics
///
/// Panics if the response carries an error or redirects elsewhere
pub fn assert_redirects_to(response: &AuthResponse, expected: &str) {
    assert_eq!(response.error, None, "unexpected error redirect to {}", response.redirect);
    assert_eq!(response.status, 302);
    assert_eq!(response.redirect, expected);
}

/// Assert an error response of `kind` that sends the user to `page`
///
/// # Panics
///
/// Panics if the kind, status, target page or `error` parameter differ
pub fn assert_auth_error(response: &AuthResponse, kind: ErrorKind, page: &str) {
    assert_eq!(response.error, Some(kind), "redirect was {}", response.redirect);
    assert_eq!(response.status, kind.status());
    assert!(
        response.redirect.starts_with(page),
        "expected redirect to {page}, got {}",
        response.redirect
    );
    assert_eq!(redirect_params(response).get("error").map(String::as_str), Some(kind.as_str()));
}

/// Assert that the response sets `name` to a non-empty value
///
/// # Panics
///
/// Panics if the cookie is absent or a removal
pub fn assert_cookie_set(response: &AuthResponse, name: &str) {
    let cookie = response
        .cookie(name)
        .unwrap_or_else(|| panic!("expected cookie '{name}' to be set"));
    assert!(!is_removal(cookie), "cookie '{name}' was cleared instead of set");
    assert!(!cookie.value().is_empty(), "cookie '{name}' is empty");
}

/// Assert that the response deletes `name`
///
/// # Panics
///
/// Panics if the response does not clear the cookie
pub fn assert_cookie_cleared(response: &AuthResponse, name: &str) {
    let cookie = response
        .cookie(name)
        .unwrap_or_else(|| panic!("expected cookie '{name}' to be cleared"));
    assert!(is_removal(cookie), "cookie '{name}' was set instead of cleared");
}
