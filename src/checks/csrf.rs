//! Double-submit CSRF token for form posts
//!
//! The cookie holds `token|hmac(token)`; the form echoes `token` in
//! `csrfToken`. A post is accepted only when the cookie verifies and both
//! tokens match.

use actix_web::cookie::Cookie;
use base64::{engine::general_purpose, Engine as _};

use crate::error::AuthError;
use crate::session::cookie::{CookieFactory, CookieOptions, CookieRole};
use crate::utils::crypto::{constant_time_eq, derive_key, generate_csrf_token, hmac_sha256, verify_hmac_sha256};

pub const FORM_FIELD: &str = "csrfToken";

#[derive(Clone)]
pub struct CsrfGuard {
    key: [u8; 32],
    cookies: CookieFactory,
}

impl CsrfGuard {
    #[must_use]
    pub fn new(secret: &str, cookies: CookieFactory) -> Self {
        Self {
            key: derive_key(secret.as_bytes(), "csrf"),
            cookies,
        }
    }

    #[must_use]
    pub fn cookie_name(&self) -> String {
        self.cookies.name(CookieRole::CsrfToken)
    }

    /// The token carried by a valid cookie, if any
    #[must_use]
    pub fn existing(&self, cookie_value: Option<&str>) -> Option<String> {
        let (token, tag) = cookie_value?.split_once('|')?;
        let tag = general_purpose::URL_SAFE_NO_PAD.decode(tag).ok()?;
        verify_hmac_sha256(&self.key, token.as_bytes(), &tag).then(|| token.to_string())
    }

    /// Reuse the token from a valid cookie, or mint a new one together with
    /// the cookie to set
    #[must_use]
    pub fn token(&self, cookie_value: Option<&str>) -> (String, Option<Cookie<'static>>) {
        if let Some(token) = self.existing(cookie_value) {
            return (token, None);
        }
        let token = generate_csrf_token();
        let tag = general_purpose::URL_SAFE_NO_PAD.encode(hmac_sha256(&self.key, token.as_bytes()));
        let cookie = self.cookies.create_cookie(
            &self.cookie_name(),
            format!("{token}|{tag}"),
            CookieOptions::default(),
        );
        (token, Some(cookie))
    }

    /// # Errors
    ///
    /// [`AuthError::MissingCsrf`] when the cookie is absent or forged, the
    /// form field is absent, or the two differ
    pub fn verify(&self, cookie_value: Option<&str>, submitted: Option<&str>) -> Result<(), AuthError> {
        let expected = self.existing(cookie_value).ok_or(AuthError::MissingCsrf)?;
        let submitted = submitted.ok_or(AuthError::MissingCsrf)?;
        if constant_time_eq(expected.as_bytes(), submitted.as_bytes()) {
            Ok(())
        } else {
            Err(AuthError::MissingCsrf)
        }
    }
}
