//! Single-use security checks carried in encrypted cookies
//!
//! A check is issued when sign-in starts and read exactly once when the
//! provider calls back. Reading a check always schedules its cookie for
//! deletion, whether or not validation succeeds.

pub mod csrf;
pub mod pkce;

use actix_web::cookie::Cookie;
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CheckError;
use crate::session::cookie::{CookieFactory, CookieRole};
use crate::utils::crypto::{constant_time_eq, decrypt_data, derive_key, encrypt_data, generate_token};

pub use csrf::CsrfGuard;

const STATE_PARAM_CONTEXT: &str = "state-param";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckKind {
    State,
    Pkce,
    Nonce,
}

impl CheckKind {
    #[must_use]
    pub const fn role(self) -> CookieRole {
        match self {
            Self::State => CookieRole::State,
            Self::Pkce => CookieRole::PkceCodeVerifier,
            Self::Nonce => CookieRole::Nonce,
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::State => "state",
            Self::Pkce => "pkce",
            Self::Nonce => "nonce",
        }
    }
}

/// A decoded check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    pub kind: CheckKind,
    /// For `state` this is the full parameter sent to the provider; for
    /// `pkce` the code verifier; for `nonce` the raw nonce
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct SealedCheck {
    value: String,
    expires_at: i64,
}

#[derive(Serialize, Deserialize)]
struct StateParam {
    random: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    origin: Option<String>,
}

/// Issues and validates check cookies
#[derive(Clone)]
pub struct CheckCodec {
    key: [u8; 32],
    max_age: Duration,
    cookies: CookieFactory,
}

impl CheckCodec {
    #[must_use]
    pub fn new(secret: &str, max_age: Duration, cookies: CookieFactory) -> Self {
        Self {
            key: derive_key(secret.as_bytes(), "check"),
            max_age,
            cookies,
        }
    }

    #[must_use]
    pub fn cookie_name(&self, kind: CheckKind) -> String {
        self.cookies.name(kind.role())
    }

    /// Issue a fresh check and the cookie that carries it
    ///
    /// # Errors
    ///
    /// Returns an error if encryption fails
    pub fn issue(&self, kind: CheckKind) -> Result<(Check, Cookie<'static>)> {
        let value = match kind {
            CheckKind::State => self.encode_state(None)?,
            CheckKind::Pkce => pkce::generate_verifier(),
            CheckKind::Nonce => generate_token(32),
        };
        self.seal(kind, value)
    }

    /// Issue a `state` check that records the deployment the flow started on
    ///
    /// # Errors
    ///
    /// Returns an error if encryption fails
    pub fn issue_state(&self, origin: Option<&str>) -> Result<(Check, Cookie<'static>)> {
        let value = self.encode_state(origin)?;
        self.seal(CheckKind::State, value)
    }

    fn encode_state(&self, origin: Option<&str>) -> Result<String> {
        let param = StateParam {
            random: generate_token(32),
            origin: origin.map(str::to_string),
        };
        encrypt_data(&param, &self.key, STATE_PARAM_CONTEXT)
    }

    fn seal(&self, kind: CheckKind, value: String) -> Result<(Check, Cookie<'static>)> {
        let expires_at = Utc::now() + self.max_age;
        let sealed = SealedCheck {
            value: value.clone(),
            expires_at: expires_at.timestamp(),
        };
        let cookie_value = encrypt_data(&sealed, &self.key, kind.role().suffix())?;
        let cookie = self
            .cookies
            .create_expiring_cookie(&self.cookie_name(kind), cookie_value, expires_at);

        log::debug!("Issued {} check, expires at {expires_at}", kind.label());
        Ok((
            Check {
                kind,
                value,
                expires_at,
            },
            cookie,
        ))
    }

    /// Decode a check cookie value without comparing it to anything
    ///
    /// # Errors
    ///
    /// `Missing` when there is no cookie, `Invalid` when it does not decrypt
    /// for this role, `Expired` past its expiry
    pub fn open(&self, kind: CheckKind, cookie_value: Option<&str>) -> Result<Check, CheckError> {
        let cookie_value = cookie_value
            .filter(|v| !v.is_empty())
            .ok_or(CheckError::Missing(kind.label()))?;
        let sealed: SealedCheck = decrypt_data(cookie_value, &self.key, kind.role().suffix())
            .map_err(|_| CheckError::Invalid(kind.label()))?;
        let expires_at = DateTime::<Utc>::from_timestamp(sealed.expires_at, 0)
            .ok_or(CheckError::Invalid(kind.label()))?;
        if expires_at < Utc::now() {
            return Err(CheckError::Expired(kind.label()));
        }
        Ok(Check {
            kind,
            value: sealed.value,
            expires_at,
        })
    }

    /// Decode the check cookie and compare it with the value the caller
    /// presented, in constant time
    ///
    /// # Errors
    ///
    /// Any [`CheckError`] other than `OriginMismatch`
    pub fn validate(
        &self,
        kind: CheckKind,
        presented: Option<&str>,
        cookie_value: Option<&str>,
    ) -> Result<Check, CheckError> {
        let check = self.open(kind, cookie_value)?;
        let presented = presented.ok_or(CheckError::Mismatch(kind.label()))?;
        if constant_time_eq(presented.as_bytes(), check.value.as_bytes()) {
            Ok(check)
        } else {
            Err(CheckError::Mismatch(kind.label()))
        }
    }

    /// Validate `state` and, when `expected_origin` is given, require that
    /// the flow was started on that deployment
    ///
    /// # Errors
    ///
    /// As [`Self::validate`], plus `OriginMismatch`
    pub fn validate_state(
        &self,
        presented: Option<&str>,
        cookie_value: Option<&str>,
        expected_origin: Option<&str>,
    ) -> Result<Check, CheckError> {
        let check = self.validate(CheckKind::State, presented, cookie_value)?;
        if let (Some(expected), Some(actual)) = (expected_origin, self.state_origin(&check.value)?) {
            if actual != expected {
                return Err(CheckError::OriginMismatch {
                    expected: expected.to_string(),
                    actual,
                });
            }
        }
        Ok(check)
    }

    /// Origin recorded in a `state` parameter, readable without the cookie
    ///
    /// # Errors
    ///
    /// `Invalid` when the parameter was not produced by this codec
    pub fn state_origin(&self, state: &str) -> Result<Option<String>, CheckError> {
        decrypt_data::<StateParam>(state, &self.key, STATE_PARAM_CONTEXT)
            .map(|param| param.origin)
            .map_err(|_| CheckError::Invalid(CheckKind::State.label()))
    }

    /// The cookie that deletes a consumed check
    #[must_use]
    pub fn consume(&self, kind: CheckKind) -> Cookie<'static> {
        self.cookies.create_expired_cookie(&self.cookie_name(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::cookie::is_removal;

    fn codec() -> CheckCodec {
        CheckCodec::new(
            "check-test-secret",
            Duration::minutes(15),
            CookieFactory::new("authgate", false),
        )
    }

    #[test]
    fn test_issue_and_validate_state() {
        let codec = codec();
        let (check, cookie) = codec.issue(CheckKind::State).unwrap();
        assert_eq!(cookie.name(), "authgate.state");
        assert!((899..=900).contains(&cookie.max_age().unwrap().whole_seconds()));

        let validated = codec
            .validate(CheckKind::State, Some(&check.value), Some(cookie.value()))
            .unwrap();
        assert_eq!(validated.value, check.value);
    }

    #[test]
    fn test_missing_cookie() {
        let codec = codec();
        assert_eq!(
            codec.validate(CheckKind::State, Some("x"), None),
            Err(CheckError::Missing("state"))
        );
        assert_eq!(
            codec.open(CheckKind::Pkce, Some("")),
            Err(CheckError::Missing("pkce"))
        );
    }

    #[test]
    fn test_mismatch() {
        let codec = codec();
        let (_, cookie) = codec.issue(CheckKind::State).unwrap();
        let (other, _) = codec.issue(CheckKind::State).unwrap();
        assert_eq!(
            codec.validate(CheckKind::State, Some(&other.value), Some(cookie.value())),
            Err(CheckError::Mismatch("state"))
        );
        assert_eq!(
            codec.validate(CheckKind::State, None, Some(cookie.value())),
            Err(CheckError::Mismatch("state"))
        );
    }

    #[test]
    fn test_expired() {
        let codec = CheckCodec::new(
            "check-test-secret",
            Duration::seconds(-5),
            CookieFactory::new("authgate", false),
        );
        let (check, cookie) = codec.issue(CheckKind::Nonce).unwrap();
        assert_eq!(
            codec.validate(CheckKind::Nonce, Some(&check.value), Some(cookie.value())),
            Err(CheckError::Expired("nonce"))
        );
    }

    #[test]
    fn test_cookie_bound_to_role() {
        let codec = codec();
        let (check, nonce_cookie) = codec.issue(CheckKind::Nonce).unwrap();
        assert_eq!(
            codec.validate(CheckKind::State, Some(&check.value), Some(nonce_cookie.value())),
            Err(CheckError::Invalid("state"))
        );
    }

    #[test]
    fn test_other_secret_is_invalid() {
        let (_, cookie) = codec().issue(CheckKind::Pkce).unwrap();
        let other = CheckCodec::new(
            "another-secret",
            Duration::minutes(15),
            CookieFactory::new("authgate", false),
        );
        assert_eq!(
            other.open(CheckKind::Pkce, Some(cookie.value())),
            Err(CheckError::Invalid("pkce"))
        );
    }

    #[test]
    fn test_state_origin() {
        let codec = codec();
        let (check, cookie) = codec.issue_state(Some("https://preview.example.com")).unwrap();
        assert_eq!(
            codec.state_origin(&check.value).unwrap().as_deref(),
            Some("https://preview.example.com")
        );

        assert!(codec
            .validate_state(Some(&check.value), Some(cookie.value()), Some("https://preview.example.com"))
            .is_ok());
        assert_eq!(
            codec.validate_state(Some(&check.value), Some(cookie.value()), Some("https://other.example.com")),
            Err(CheckError::OriginMismatch {
                expected: "https://other.example.com".into(),
                actual: "https://preview.example.com".into(),
            })
        );

        let (plain, _) = codec.issue(CheckKind::State).unwrap();
        assert_eq!(codec.state_origin(&plain.value).unwrap(), None);
        assert!(codec.state_origin("garbage").is_err());
    }

    #[test]
    fn test_consume_expires_cookie() {
        let cookie = codec().consume(CheckKind::Pkce);
        assert_eq!(cookie.name(), "authgate.pkce.code_verifier");
        assert!(is_removal(&cookie));
    }
}
