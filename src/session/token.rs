//! Stateless session tokens
//!
//! The claim set is encoded by a pluggable [`SessionTokenCodec`]. Both codecs
//! stamp `iat`, `exp` and `jti` on encode and refuse expired tokens on decode.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SessionError;
use crate::models::{SessionUser, User};
use crate::utils::crypto::{create_hs256_jwt, decrypt_data, derive_key, encrypt_data, verify_hs256_jwt};

const SESSION_TOKEN_CONTEXT: &str = "session-token";

/// Claims carried by a stateless session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SessionClaims {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    /// User id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    /// Claims added by the `jwt` hook
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SessionClaims {
    #[must_use]
    pub fn for_user(user: &User) -> Self {
        Self {
            name: user.name.clone(),
            email: user.email.clone(),
            picture: user.image.clone(),
            sub: Some(user.id.clone()),
            ..Self::default()
        }
    }

    /// Expiry as a timestamp, if the claims have been stamped
    #[must_use]
    pub fn expires(&self) -> Option<DateTime<Utc>> {
        self.exp.and_then(|exp| DateTime::from_timestamp(exp, 0))
    }

    #[must_use]
    pub fn session_user(&self) -> SessionUser {
        SessionUser {
            id: self.sub.clone(),
            name: self.name.clone(),
            email: self.email.clone(),
            image: self.picture.clone(),
        }
    }

    fn stamped(&self, now: DateTime<Utc>, max_age: Duration) -> Self {
        Self {
            iat: Some(now.timestamp()),
            exp: Some((now + max_age).timestamp()),
            jti: Some(uuid::Uuid::new_v4().to_string()),
            ..self.clone()
        }
    }

    fn ensure_live(self) -> Result<Self, SessionError> {
        match self.exp {
            Some(exp) if exp > Utc::now().timestamp() => Ok(self),
            Some(_) => Err(SessionError::Expired),
            None => Err(SessionError::Decode("token has no exp claim".into())),
        }
    }
}

/// Encodes session claims into a cookie-safe string
pub trait SessionTokenCodec: Send + Sync {
    /// Stamp `iat`/`exp`/`jti` and encode; returns the token and its expiry
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Encode`] if the claims cannot be encoded
    fn encode(&self, claims: &SessionClaims, max_age: Duration) -> Result<(String, DateTime<Utc>), SessionError>;

    /// # Errors
    ///
    /// [`SessionError::Decode`] for malformed or forged tokens,
    /// [`SessionError::Expired`] past `exp`
    fn decode(&self, token: &str) -> Result<SessionClaims, SessionError>;
}

/// AES-256-GCM sealed claims; the default codec
pub struct EncryptedTokenCodec {
    key: [u8; 32],
}

impl EncryptedTokenCodec {
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self {
            key: derive_key(secret.as_bytes(), "session"),
        }
    }
}

impl SessionTokenCodec for EncryptedTokenCodec {
    fn encode(&self, claims: &SessionClaims, max_age: Duration) -> Result<(String, DateTime<Utc>), SessionError> {
        let now = Utc::now();
        let stamped = claims.stamped(now, max_age);
        let token = encrypt_data(&stamped, &self.key, SESSION_TOKEN_CONTEXT)
            .map_err(|e| SessionError::Encode(e.to_string()))?;
        Ok((token, now + max_age))
    }

    fn decode(&self, token: &str) -> Result<SessionClaims, SessionError> {
        decrypt_data::<SessionClaims>(token, &self.key, SESSION_TOKEN_CONTEXT)
            .map_err(|e| SessionError::Decode(e.to_string()))?
            .ensure_live()
    }
}

/// Signed, readable HS256 JWT claims
pub struct HmacJwtCodec {
    key: [u8; 32],
}

impl HmacJwtCodec {
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self {
            key: derive_key(secret.as_bytes(), "session-jwt"),
        }
    }
}

impl SessionTokenCodec for HmacJwtCodec {
    fn encode(&self, claims: &SessionClaims, max_age: Duration) -> Result<(String, DateTime<Utc>), SessionError> {
        let now = Utc::now();
        let payload =
            serde_json::to_value(claims.stamped(now, max_age)).map_err(|e| SessionError::Encode(e.to_string()))?;
        let token = create_hs256_jwt(&payload, &self.key).map_err(|e| SessionError::Encode(e.to_string()))?;
        Ok((token, now + max_age))
    }

    fn decode(&self, token: &str) -> Result<SessionClaims, SessionError> {
        let payload = verify_hs256_jwt(token, &self.key).map_err(|e| SessionError::Decode(format!("{e:#}")))?;
        serde_json::from_value::<SessionClaims>(payload)
            .map_err(|e| SessionError::Decode(e.to_string()))?
            .ensure_live()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Profile;
    use serde_json::json;

    fn user() -> User {
        User::candidate(&Profile {
            id: "p".into(),
            email: Some("a@example.com".into()),
            name: Some("Ada".into()),
            image: Some("https://img/ada.png".into()),
        })
    }

    fn codecs() -> Vec<Box<dyn SessionTokenCodec>> {
        vec![
            Box::new(EncryptedTokenCodec::new("token-secret")),
            Box::new(HmacJwtCodec::new("token-secret")),
        ]
    }

    #[test]
    fn test_encode_decode_preserves_claims() {
        let user = user();
        let mut claims = SessionClaims::for_user(&user);
        claims.extra.insert("role".into(), json!("admin"));

        for codec in codecs() {
            let (token, expires) = codec.encode(&claims, Duration::hours(1)).unwrap();
            let decoded = codec.decode(&token).unwrap();
            assert_eq!(decoded.sub.as_deref(), Some(user.id.as_str()));
            assert_eq!(decoded.picture.as_deref(), Some("https://img/ada.png"));
            assert_eq!(decoded.extra["role"], "admin");
            assert_eq!(decoded.exp, Some(expires.timestamp()));
            assert!(decoded.jti.is_some());
        }
    }

    #[test]
    fn test_expired_token_rejected() {
        let claims = SessionClaims::for_user(&user());
        for codec in codecs() {
            let (token, _) = codec.encode(&claims, Duration::seconds(-10)).unwrap();
            assert!(matches!(codec.decode(&token), Err(SessionError::Expired)));
        }
    }

    #[test]
    fn test_foreign_secret_rejected() {
        let claims = SessionClaims::for_user(&user());
        let (token, _) = EncryptedTokenCodec::new("a").encode(&claims, Duration::hours(1)).unwrap();
        assert!(matches!(
            EncryptedTokenCodec::new("b").decode(&token),
            Err(SessionError::Decode(_))
        ));

        let (token, _) = HmacJwtCodec::new("a").encode(&claims, Duration::hours(1)).unwrap();
        assert!(matches!(HmacJwtCodec::new("b").decode(&token), Err(SessionError::Decode(_))));
    }

    #[test]
    fn test_jti_rotates() {
        let codec = EncryptedTokenCodec::new("s");
        let claims = SessionClaims::for_user(&user());
        let first = codec.decode(&codec.encode(&claims, Duration::hours(1)).unwrap().0).unwrap();
        let second = codec.decode(&codec.encode(&first, Duration::hours(1)).unwrap().0).unwrap();
        assert_ne!(first.jti, second.jti);
    }
}
