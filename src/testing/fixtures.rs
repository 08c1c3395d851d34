//! Test fixtures providing pre-built test objects

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use p256::ecdsa::{signature::Signer, Signature, SigningKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use serde_json::{json, Value};

use super::constants::{
    TEST_BASE_URL, TEST_CLIENT_ID, TEST_COOKIE_PREFIX, TEST_EC_KID, TEST_EMAIL, TEST_ISSUER, TEST_SECRET,
    TEST_USER_NAME,
};
use crate::checks::CheckKind;
use crate::models::User;
use crate::oauth::JsonWebKey;
use crate::providers::{default_profile, OAuthProvider, Provider, ProviderKind};
use crate::settings::{AuthSettings, SessionStrategy};

/// Fixed P-256 private scalar behind [`TestFixtures::ec_jwk`]
const EC_PRIVATE_KEY: [u8; 32] = [
    0x1f, 0x6a, 0x3c, 0x52, 0x91, 0x0e, 0x44, 0x7b, 0x2d, 0x85, 0xc3, 0x19, 0x6e, 0xa0, 0x37, 0x58,
    0x0b, 0xd4, 0x72, 0x9e, 0x13, 0x61, 0xfa, 0x2c, 0x88, 0x4f, 0x05, 0xb7, 0x3a, 0xe9, 0x26, 0x40,
];

/// Central fixture provider for all test data
pub struct TestFixtures;

impl TestFixtures {
    /// Settings of a test deployment at [`TEST_BASE_URL`] with no providers
    #[must_use]
    pub fn settings() -> AuthSettings {
        let mut settings = AuthSettings::default();
        settings.application.base_url = TEST_BASE_URL.to_string();
        settings.session.secret = TEST_SECRET.to_string();
        settings.session.strategy = SessionStrategy::Jwt;
        settings.cookies.secure = false;
        settings.cookies.prefix = TEST_COOKIE_PREFIX.to_string();
        settings
    }

    /// An `oauth` provider with a userinfo endpoint and the default checks
    #[must_use]
    pub fn oauth_provider() -> OAuthProvider {
        OAuthProvider {
            client_id: TEST_CLIENT_ID.to_string(),
            client_secret: Some("client-secret".to_string()),
            authorization_endpoint: format!("{TEST_ISSUER}/authorize"),
            token_endpoint: format!("{TEST_ISSUER}/token"),
            userinfo_endpoint: Some(format!("{TEST_ISSUER}/userinfo")),
            issuer: None,
            jwks_uri: None,
            scopes: vec!["read:user".to_string(), "user:email".to_string()],
            checks: BTreeSet::from([CheckKind::State, CheckKind::Pkce]),
            extra_auth_params: BTreeMap::new(),
            allow_dangerous_email_account_linking: false,
            profile: Arc::new(default_profile),
        }
    }

    /// An `oidc` provider whose ID tokens are signed by [`Self::ec_jwk`]
    #[must_use]
    pub fn oidc_provider() -> OAuthProvider {
        OAuthProvider {
            userinfo_endpoint: None,
            issuer: Some(TEST_ISSUER.to_string()),
            jwks_uri: Some(format!("{TEST_ISSUER}/jwks")),
            scopes: vec!["openid".to_string(), "email".to_string(), "profile".to_string()],
            checks: BTreeSet::from([CheckKind::State, CheckKind::Pkce, CheckKind::Nonce]),
            ..Self::oauth_provider()
        }
    }

    #[must_use]
    pub fn provider(id: &str, kind: ProviderKind) -> Provider {
        Provider {
            id: id.to_string(),
            name: id.to_string(),
            kind,
        }
    }

    /// A persisted-looking user
    #[must_use]
    pub fn user(id: &str, email: &str) -> User {
        User {
            id: id.to_string(),
            email: Some(email.to_string()),
            name: Some(TEST_USER_NAME.to_string()),
            image: None,
            email_verified: None,
        }
    }

    #[must_use]
    pub fn default_user() -> User {
        Self::user("user-1", TEST_EMAIL)
    }

    fn signing_key() -> SigningKey {
        SigningKey::from_slice(&EC_PRIVATE_KEY).expect("fixture key is a valid P-256 scalar")
    }

    /// Public half of the fixture signing key as a JWK
    #[must_use]
    pub fn ec_jwk() -> JsonWebKey {
        let public = p256::PublicKey::from(Self::signing_key().verifying_key());
        let point = public.to_encoded_point(false);
        let encode = |bytes: Option<&p256::FieldBytes>| {
            general_purpose::URL_SAFE_NO_PAD.encode(bytes.expect("uncompressed point has coordinates"))
        };

        JsonWebKey {
            kty: "EC".to_string(),
            kid: Some(TEST_EC_KID.to_string()),
            alg: Some("ES256".to_string()),
            key_use: Some("sig".to_string()),
            n: None,
            e: None,
            crv: Some("P-256".to_string()),
            x: Some(encode(point.x())),
            y: Some(encode(point.y())),
        }
    }

    /// Sign `claims` as an ES256 JWT with the fixture key
    #[must_use]
    pub fn sign_es256(claims: &Value, kid: Option<&str>) -> String {
        let mut header = json!({"alg": "ES256", "typ": "JWT"});
        if let Some(kid) = kid {
            header["kid"] = json!(kid);
        }
        let signing_input = format!(
            "{}.{}",
            general_purpose::URL_SAFE_NO_PAD.encode(header.to_string()),
            general_purpose::URL_SAFE_NO_PAD.encode(claims.to_string())
        );
        let signature: Signature = Self::signing_key().sign(signing_input.as_bytes());
        format!(
            "{signing_input}.{}",
            general_purpose::URL_SAFE_NO_PAD.encode(signature.to_bytes())
        )
    }

    /// ID token claims from the fixture issuer for the fixture client
    #[must_use]
    pub fn id_token_claims(sub: &str, nonce: Option<&str>) -> Value {
        let now = Utc::now().timestamp();
        let mut claims = json!({
            "iss": TEST_ISSUER,
            "aud": TEST_CLIENT_ID,
            "sub": sub,
            "iat": now,
            "exp": now + 300,
            "email": format!("{sub}@example.com"),
            "name": TEST_USER_NAME,
        });
        if let Some(nonce) = nonce {
            claims["nonce"] = json!(nonce);
        }
        claims
    }

    /// A userinfo response in the GitHub shape
    #[must_use]
    pub fn userinfo(id: u64, login: &str, email: &str) -> Value {
        json!({"id": id, "login": login, "email": email, "avatar_url": format!("https://avatars.example.com/{id}")})
    }
}
