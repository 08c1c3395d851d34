// ID token validation with JWKS caching
// Supports RS256 and ES256 signature verification and OIDC claim checks

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use p256::{
    ecdsa::{signature::Verifier as _, Signature as EcdsaSignature, VerifyingKey as EcdsaVerifyingKey},
    EncodedPoint,
};
use rsa::{pkcs1v15::VerifyingKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use tokio::sync::RwLock;

use crate::error::JwtValidationError;
use crate::oauth::client::OAuthClient;
use crate::utils::crypto::constant_time_eq;

#[derive(Debug, Deserialize)]
pub struct JwtHeader {
    pub alg: String,
    pub typ: Option<String>,
    pub kid: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct JsonWebKeySet {
    pub keys: Vec<JsonWebKey>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct JsonWebKey {
    pub kty: String,
    pub kid: Option<String>,
    pub alg: Option<String>,
    #[serde(rename = "use")]
    pub key_use: Option<String>,

    // RSA keys
    pub n: Option<String>,
    pub e: Option<String>,

    // EC keys
    pub crv: Option<String>,
    pub x: Option<String>,
    pub y: Option<String>,
}

/// What an ID token must satisfy besides its signature
#[derive(Debug, Clone)]
pub struct IdTokenExpectations {
    pub issuer: Option<String>,
    pub audience: String,
    /// Value from the nonce check; required to match the `nonce` claim
    pub nonce: Option<String>,
    pub clock_skew_seconds: i64,
}

pub struct JwksCache {
    // Provider id -> keys
    keys: HashMap<String, Vec<JsonWebKey>>,
    last_updated: HashMap<String, DateTime<Utc>>,
    // Failed fetch tracking for backoff
    failed_fetches: HashMap<String, DateTime<Utc>>,
    cache_duration: Duration,
    retry_backoff: Duration,
}

impl Default for JwksCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600))
    }
}

impl JwksCache {
    #[must_use]
    pub fn new(cache_duration: Duration) -> Self {
        Self {
            keys: HashMap::new(),
            last_updated: HashMap::new(),
            failed_fetches: HashMap::new(),
            cache_duration,
            retry_backoff: Duration::from_secs(60),
        }
    }

    #[must_use]
    pub fn is_cache_valid(&self, provider: &str) -> bool {
        self.last_updated.get(provider).is_some_and(|last_updated| {
            let elapsed = Utc::now().signed_duration_since(*last_updated);
            elapsed.to_std().unwrap_or(Duration::MAX) < self.cache_duration
        })
    }

    #[must_use]
    pub fn should_retry_fetch(&self, provider: &str) -> bool {
        self.failed_fetches.get(provider).is_none_or(|last_failed| {
            let elapsed = Utc::now().signed_duration_since(*last_failed);
            elapsed.to_std().unwrap_or(Duration::MAX) >= self.retry_backoff
        })
    }

    /// Key by id; without an id, the only key of the wanted type
    #[must_use]
    pub fn get_key(&self, provider: &str, kid: Option<&str>, kty: &str) -> Option<&JsonWebKey> {
        let keys = self.keys.get(provider)?;
        match kid {
            Some(kid) => keys.iter().find(|key| key.kid.as_deref() == Some(kid)),
            None => {
                let mut candidates = keys.iter().filter(|key| key.kty == kty);
                let first = candidates.next()?;
                candidates.next().is_none().then_some(first)
            }
        }
    }

    pub fn store_keys(&mut self, provider: &str, keys: Vec<JsonWebKey>) {
        debug!("Cached {} keys for provider '{provider}'", keys.len());
        self.keys.insert(provider.to_string(), keys);
        self.last_updated.insert(provider.to_string(), Utc::now());
        self.failed_fetches.remove(provider);
    }

    pub fn record_fetch_failure(&mut self, provider: &str) {
        self.failed_fetches.insert(provider.to_string(), Utc::now());
    }
}

/// Verifies provider ID tokens; clones share one key cache
#[derive(Clone)]
pub struct JwtValidator {
    cache: Arc<RwLock<JwksCache>>,
    client: Arc<dyn OAuthClient>,
}

impl JwtValidator {
    #[must_use]
    pub fn new(client: Arc<dyn OAuthClient>, cache_duration: Duration) -> Self {
        Self {
            cache: Arc::new(RwLock::new(JwksCache::new(cache_duration))),
            client,
        }
    }

    /// Install keys without fetching them
    pub async fn seed_keys(&self, provider: &str, keys: Vec<JsonWebKey>) {
        self.cache.write().await.store_keys(provider, keys);
    }

    /// Fetch JWKS from `jwks_uri` and cache the keys
    ///
    /// # Errors
    ///
    /// Returns an error if the fetch is in backoff or fails
    pub async fn fetch_and_cache_jwks(&self, provider: &str, jwks_uri: &str) -> Result<(), JwtValidationError> {
        if !self.cache.read().await.should_retry_fetch(provider) {
            return Err(JwtValidationError::JwksFetchFailed(
                "skipping fetch during backoff after a recent failure".to_string(),
            ));
        }

        debug!("Fetching JWKS for provider '{provider}'");
        match self.client.fetch_jwks(jwks_uri).await {
            Ok(jwks) => {
                self.cache.write().await.store_keys(provider, jwks.keys);
                Ok(())
            }
            Err(e) => {
                self.cache.write().await.record_fetch_failure(provider);
                Err(JwtValidationError::JwksFetchFailed(e.to_string()))
            }
        }
    }

    /// Cached key, refreshing the cache once on a miss or expiry
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown after a refresh
    pub async fn get_public_key(
        &self,
        provider: &str,
        kid: Option<&str>,
        kty: &str,
        jwks_uri: Option<&str>,
    ) -> Result<JsonWebKey, JwtValidationError> {
        {
            let cache = self.cache.read().await;
            if cache.is_cache_valid(provider) {
                if let Some(key) = cache.get_key(provider, kid, kty) {
                    return Ok(key.clone());
                }
            }
        }

        if let Some(jwks_uri) = jwks_uri {
            self.fetch_and_cache_jwks(provider, jwks_uri).await?;
            if let Some(key) = self.cache.read().await.get_key(provider, kid, kty) {
                return Ok(key.clone());
            }
        }

        Err(JwtValidationError::KeyNotFound(kid.unwrap_or("<none>").to_string()))
    }

    /// Verify signature and claims, returning the token's claims
    ///
    /// # Errors
    ///
    /// Returns an error if the token is malformed, the signature does not
    /// verify, or a claim does not meet `expected`
    pub async fn validate_id_token(
        &self,
        token: &str,
        provider: &str,
        jwks_uri: Option<&str>,
        expected: &IdTokenExpectations,
    ) -> Result<Value, JwtValidationError> {
        let parts: Vec<&str> = token.split('.').collect();
        let [header_b64, claims_b64, signature_b64] = parts.as_slice() else {
            return Err(JwtValidationError::InvalidToken("Invalid JWT format".to_string()));
        };

        let header: JwtHeader = decode_part(header_b64, "header")?;
        let kty = match header.alg.as_str() {
            "RS256" => "RSA",
            "ES256" => "EC",
            alg => return Err(JwtValidationError::UnsupportedAlgorithm(alg.to_string())),
        };

        let public_key = self
            .get_public_key(provider, header.kid.as_deref(), kty, jwks_uri)
            .await?;
        let signature = general_purpose::URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|e| JwtValidationError::InvalidToken(format!("Invalid signature encoding: {e}")))?;
        let signing_input = format!("{header_b64}.{claims_b64}");

        match header.alg.as_str() {
            "RS256" => verify_rsa_signature(&signing_input, &signature, &public_key)?,
            _ => verify_ecdsa_signature(&signing_input, &signature, &public_key)?,
        }

        let claims: Value = decode_part(claims_b64, "claims")?;
        validate_claims(&claims, expected, Utc::now().timestamp())?;
        debug!("ID token for provider '{provider}' validated");
        Ok(claims)
    }
}

fn decode_part<T: serde::de::DeserializeOwned>(part: &str, what: &str) -> Result<T, JwtValidationError> {
    let bytes = general_purpose::URL_SAFE_NO_PAD
        .decode(part)
        .map_err(|e| JwtValidationError::InvalidToken(format!("Invalid {what} encoding: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| JwtValidationError::InvalidToken(format!("Invalid {what} JSON: {e}")))
}

fn decode_key_part(value: Option<&String>, what: &str) -> Result<Vec<u8>, JwtValidationError> {
    let value = value.ok_or_else(|| JwtValidationError::KeyDecodingFailed(format!("Missing {what}")))?;
    general_purpose::URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|e| JwtValidationError::KeyDecodingFailed(format!("Invalid {what} encoding: {e}")))
}

fn verify_rsa_signature(
    signing_input: &str,
    signature: &[u8],
    public_key: &JsonWebKey,
) -> Result<(), JwtValidationError> {
    use rsa::signature::Verifier;

    let n_bytes = decode_key_part(public_key.n.as_ref(), "RSA modulus (n)")?;
    let e_bytes = decode_key_part(public_key.e.as_ref(), "RSA exponent (e)")?;

    let rsa_key = RsaPublicKey::new(
        rsa::BigUint::from_bytes_be(&n_bytes),
        rsa::BigUint::from_bytes_be(&e_bytes),
    )
    .map_err(|e| JwtValidationError::KeyDecodingFailed(format!("Invalid RSA key: {e}")))?;

    let signature = rsa::pkcs1v15::Signature::try_from(signature)
        .map_err(|_| JwtValidationError::SignatureInvalid)?;
    VerifyingKey::<Sha256>::new(rsa_key)
        .verify(signing_input.as_bytes(), &signature)
        .map_err(|_| JwtValidationError::SignatureInvalid)
}

/// ES256 signatures in a JWS are the raw 64-byte `r || s` concatenation
fn verify_ecdsa_signature(
    signing_input: &str,
    signature: &[u8],
    public_key: &JsonWebKey,
) -> Result<(), JwtValidationError> {
    if public_key.crv.as_deref().is_some_and(|crv| crv != "P-256") {
        return Err(JwtValidationError::UnsupportedAlgorithm(format!(
            "ES256 with curve {}",
            public_key.crv.as_deref().unwrap_or_default()
        )));
    }
    let x_bytes = decode_key_part(public_key.x.as_ref(), "EC x coordinate")?;
    let y_bytes = decode_key_part(public_key.y.as_ref(), "EC y coordinate")?;

    let mut point_bytes = Vec::with_capacity(1 + x_bytes.len() + y_bytes.len());
    point_bytes.push(0x04);
    point_bytes.extend_from_slice(&x_bytes);
    point_bytes.extend_from_slice(&y_bytes);

    let encoded_point = EncodedPoint::from_bytes(&point_bytes)
        .map_err(|e| JwtValidationError::KeyDecodingFailed(format!("Invalid EC point: {e}")))?;
    let verifying_key = EcdsaVerifyingKey::from_encoded_point(&encoded_point)
        .map_err(|e| JwtValidationError::KeyDecodingFailed(format!("Invalid ECDSA key: {e}")))?;

    let signature = EcdsaSignature::from_slice(signature).map_err(|_| JwtValidationError::SignatureInvalid)?;
    verifying_key
        .verify(signing_input.as_bytes(), &signature)
        .map_err(|_| JwtValidationError::SignatureInvalid)
}

fn validate_claims(claims: &Value, expected: &IdTokenExpectations, now: i64) -> Result<(), JwtValidationError> {
    let skew = expected.clock_skew_seconds;

    let exp = claims
        .get("exp")
        .and_then(Value::as_i64)
        .ok_or_else(|| JwtValidationError::InvalidToken("ID token has no exp claim".to_string()))?;
    if now > exp + skew {
        return Err(JwtValidationError::TokenExpired);
    }
    if let Some(nbf) = claims.get("nbf").and_then(Value::as_i64) {
        if now < nbf - skew {
            return Err(JwtValidationError::TokenNotYetValid);
        }
    }

    if let Some(issuer) = &expected.issuer {
        let actual = claims.get("iss").and_then(Value::as_str).unwrap_or_default();
        if actual != issuer {
            return Err(JwtValidationError::ClaimValidationFailed {
                claim: "iss".to_string(),
                expected: issuer.clone(),
                actual: actual.to_string(),
            });
        }
    }

    let audiences = extract_audiences(claims.get("aud"));
    if !audiences.iter().any(|aud| aud == &expected.audience) {
        return Err(JwtValidationError::ClaimValidationFailed {
            claim: "aud".to_string(),
            expected: expected.audience.clone(),
            actual: format!("{audiences:?}"),
        });
    }

    if let Some(nonce) = &expected.nonce {
        let actual = claims.get("nonce").and_then(Value::as_str).unwrap_or_default();
        if !constant_time_eq(actual.as_bytes(), nonce.as_bytes()) {
            warn!("ID token nonce did not match the nonce check");
            return Err(JwtValidationError::ClaimValidationFailed {
                claim: "nonce".to_string(),
                expected: "<nonce check>".to_string(),
                actual: if actual.is_empty() { "<missing>" } else { "<other>" }.to_string(),
            });
        }
    }

    Ok(())
}

/// `aud` may be a string or an array of strings
fn extract_audiences(aud: Option<&Value>) -> Vec<String> {
    match aud {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(values)) => values
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}
