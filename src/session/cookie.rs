use actix_web::cookie::{time, Cookie, SameSite};
use chrono::{DateTime, Utc};

/// Prefix browsers only accept on cookies set over HTTPS
pub const SECURE_PREFIX: &str = "__Secure-";

/// The fixed roles a cookie can play; each maps to one wire name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CookieRole {
    SessionToken,
    State,
    PkceCodeVerifier,
    Nonce,
    CallbackUrl,
    CsrfToken,
}

impl CookieRole {
    #[must_use]
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::SessionToken => "session-token",
            Self::State => "state",
            Self::PkceCodeVerifier => "pkce.code_verifier",
            Self::Nonce => "nonce",
            Self::CallbackUrl => "callback-url",
            Self::CsrfToken => "csrf-token",
        }
    }
}

/// Options for cookie creation
#[derive(Debug, Clone)]
pub struct CookieOptions {
    pub http_only: bool,
    pub same_site: SameSite,
    pub path: String,
    pub max_age: Option<time::Duration>,
    /// Absolute expiry; set together with `max_age` so both agree
    pub expires: Option<DateTime<Utc>>,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            http_only: true,
            same_site: SameSite::Lax,
            path: "/".to_string(),
            max_age: None,
            expires: None,
        }
    }
}

impl CookieOptions {
    /// Options for a cookie that lives exactly until `expires`
    #[must_use]
    pub fn until(expires: DateTime<Utc>) -> Self {
        let remaining = (expires - Utc::now()).num_seconds().max(0);
        Self {
            max_age: Some(time::Duration::seconds(remaining)),
            expires: Some(expires),
            ..Self::default()
        }
    }
}

/// Builds every cookie the engine sets, so names and security attributes
/// stay consistent
#[derive(Debug, Clone)]
pub struct CookieFactory {
    prefix: String,
    secure: bool,
}

impl CookieFactory {
    #[must_use]
    pub fn new(prefix: &str, secure: bool) -> Self {
        Self {
            prefix: prefix.to_string(),
            secure,
        }
    }

    #[must_use]
    pub const fn secure(&self) -> bool {
        self.secure
    }

    /// Wire name for a role, e.g. `__Secure-authgate.session-token`
    #[must_use]
    pub fn name(&self, role: CookieRole) -> String {
        let base = format!("{}.{}", self.prefix, role.suffix());
        if self.secure {
            format!("{SECURE_PREFIX}{base}")
        } else {
            base
        }
    }

    #[must_use]
    pub fn create_cookie(&self, name: &str, value: String, options: CookieOptions) -> Cookie<'static> {
        let mut builder = Cookie::build(name.to_owned(), value)
            .http_only(options.http_only)
            .secure(self.secure)
            .same_site(options.same_site)
            .path(options.path);
        if let Some(max_age) = options.max_age {
            builder = builder.max_age(max_age);
        }
        if let Some(at) = options
            .expires
            .and_then(|at| time::OffsetDateTime::from_unix_timestamp(at.timestamp()).ok())
        {
            builder = builder.expires(at);
        }
        builder.finish()
    }

    /// Cookie that lives exactly until `expires`
    #[must_use]
    pub fn create_expiring_cookie(
        &self,
        name: &str,
        value: String,
        expires: DateTime<Utc>,
    ) -> Cookie<'static> {
        self.create_cookie(name, value, CookieOptions::until(expires))
    }

    /// Create an expired cookie to clear `name`
    #[must_use]
    pub fn create_expired_cookie(&self, name: &str) -> Cookie<'static> {
        create_expired_cookie(name, self.secure)
    }
}

/// Create an expired cookie to clear a specific cookie
#[must_use]
pub fn create_expired_cookie(name: &str, secure: bool) -> Cookie<'static> {
    Cookie::build(name.to_owned(), "")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(time::Duration::seconds(0))
        .expires(time::OffsetDateTime::UNIX_EPOCH)
        .finish()
}

/// Whether a `Set-Cookie` entry deletes its cookie
#[must_use]
pub fn is_removal(cookie: &Cookie<'_>) -> bool {
    cookie
        .max_age()
        .is_some_and(|max_age| max_age.whole_seconds() <= 0)
}
