// Cryptographic utilities for check cookies, session tokens and verification tokens

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Key, Nonce,
};
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose, Engine as _};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Nonce size for AES-256-GCM encryption (96 bits)
pub const NONCE_SIZE: usize = 12;

/// Encryption key size for AES-256 (256 bits)
pub const ENCRYPTION_KEY_SIZE: usize = 32;

/// Generate a cryptographically secure random token of `length` bytes,
/// base64url encoded without padding
#[must_use]
pub fn generate_token(length: usize) -> String {
    let mut bytes = vec![0u8; length];
    rand::rng().fill_bytes(&mut bytes);
    general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Generate a CSRF token with 192 bits of entropy
#[must_use]
pub fn generate_csrf_token() -> String {
    generate_token(24)
}

/// Derive a purpose-bound 32-byte key from the configured secret
///
/// Each consumer (check cookies, session tokens, CSRF tokens) passes its own
/// `purpose` so a value produced for one role never decrypts or verifies in
/// another.
#[must_use]
pub fn derive_key(secret: &[u8], purpose: &str) -> [u8; ENCRYPTION_KEY_SIZE] {
    let mut mac = new_mac(secret);
    mac.update(b"authgate:");
    mac.update(purpose.as_bytes());
    let mut key = [0u8; ENCRYPTION_KEY_SIZE];
    key.copy_from_slice(&mac.finalize().into_bytes());
    key
}

fn new_mac(key: &[u8]) -> HmacSha256 {
    match <HmacSha256 as Mac>::new_from_slice(key) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC-SHA256 accepts keys of any length"),
    }
}

/// Encrypt any serializable value with AES-256-GCM, binding `context` as
/// associated data
///
/// # Returns
///
/// A Base64URL-encoded string containing the nonce + ciphertext
///
/// # Errors
///
/// Returns an error if serialization or encryption fails
pub fn encrypt_data<T: Serialize>(data: &T, key: &[u8; ENCRYPTION_KEY_SIZE], context: &str) -> Result<String> {
    let json_data = serde_json::to_vec(data).context("Failed to serialize data")?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: &json_data,
                aad: context.as_bytes(),
            },
        )
        .map_err(|e| anyhow!("AES encryption failed: {e}"))?;

    let mut combined = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    combined.extend_from_slice(&nonce_bytes);
    combined.extend_from_slice(&ciphertext);

    Ok(general_purpose::URL_SAFE_NO_PAD.encode(&combined))
}

/// Decrypt a value produced by [`encrypt_data`] with the same key and context
///
/// # Errors
///
/// Returns an error if:
/// - Base64 decoding fails
/// - Data length is invalid
/// - Authentication fails (wrong key, wrong context or tampered data)
/// - Deserialization fails
pub fn decrypt_data<T: DeserializeOwned>(
    encrypted_data: &str,
    key: &[u8; ENCRYPTION_KEY_SIZE],
    context: &str,
) -> Result<T> {
    let combined = general_purpose::URL_SAFE_NO_PAD
        .decode(encrypted_data)
        .context("Failed to decode base64 data")?;

    if combined.len() < NONCE_SIZE {
        return Err(anyhow!("Invalid data length"));
    }

    let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
    let nonce = Nonce::from_slice(nonce_bytes);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let plaintext = cipher
        .decrypt(
            nonce,
            Payload {
                msg: ciphertext,
                aad: context.as_bytes(),
            },
        )
        .map_err(|e| anyhow!("AES decryption failed: {e}"))?;

    serde_json::from_slice(&plaintext).context("Failed to deserialize data from decrypted JSON")
}

/// HMAC-SHA256 of `message` under `key`
#[must_use]
pub fn hmac_sha256(key: &[u8], message: &[u8]) -> Vec<u8> {
    let mut mac = new_mac(key);
    mac.update(message);
    mac.finalize().into_bytes().to_vec()
}

/// Verify an HMAC-SHA256 tag in constant time
#[must_use]
pub fn verify_hmac_sha256(key: &[u8], message: &[u8], tag: &[u8]) -> bool {
    let mut mac = new_mac(key);
    mac.update(message);
    mac.verify_slice(tag).is_ok()
}

/// Compare two byte strings without leaking the position of the first difference
///
/// Both inputs are reduced to HMAC tags under a fresh random key, and the tags
/// are compared with the MAC's constant-time verification.
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let mut key = [0u8; ENCRYPTION_KEY_SIZE];
    rand::rng().fill_bytes(&mut key);
    let tag = hmac_sha256(&key, a);
    verify_hmac_sha256(&key, b, &tag)
}

/// Hash a verification token together with the secret, hex encoded
///
/// Only the hash is handed to the adapter, so a leaked token table cannot be
/// replayed as sign-in links.
#[must_use]
pub fn hash_token(token: &str, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.update(secret.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

/// Build an HS256 JWT from header and payload values
///
/// # Errors
///
/// Returns an error if JSON serialization fails
pub fn create_hs256_jwt(payload: &serde_json::Value, secret: &[u8]) -> Result<String> {
    let header = serde_json::json!({ "alg": "HS256", "typ": "JWT" });
    let header_json = serde_json::to_string(&header).context("Failed to serialize JWT header")?;
    let payload_json = serde_json::to_string(payload).context("Failed to serialize JWT payload")?;

    let header_b64 = general_purpose::URL_SAFE_NO_PAD.encode(header_json.as_bytes());
    let payload_b64 = general_purpose::URL_SAFE_NO_PAD.encode(payload_json.as_bytes());
    let message = format!("{header_b64}.{payload_b64}");

    let signature = hmac_sha256(secret, message.as_bytes());
    let signature_b64 = general_purpose::URL_SAFE_NO_PAD.encode(signature);

    Ok(format!("{message}.{signature_b64}"))
}

/// Verify an HS256 JWT signature and return its decoded payload
///
/// # Errors
///
/// Returns an error if:
/// - The JWT format is invalid (not 3 parts separated by dots)
/// - The header does not declare HS256
/// - The signature does not verify
/// - Base64 or JSON decoding fails
pub fn verify_hs256_jwt(token: &str, secret: &[u8]) -> Result<serde_json::Value> {
    let parts: Vec<&str> = token.split('.').collect();
    let [header_b64, payload_b64, signature_b64] = parts.as_slice() else {
        return Err(anyhow!("Invalid JWT format"));
    };

    let header: serde_json::Value = decode_segment(header_b64).context("Invalid JWT header")?;
    if header["alg"] != "HS256" {
        return Err(anyhow!("Unexpected JWT algorithm: {}", header["alg"]));
    }

    let signature = general_purpose::URL_SAFE_NO_PAD
        .decode(signature_b64)
        .context("Invalid JWT signature encoding")?;
    let message = format!("{header_b64}.{payload_b64}");
    if !verify_hmac_sha256(secret, message.as_bytes(), &signature) {
        return Err(anyhow!("JWT signature verification failed"));
    }

    decode_segment(payload_b64).context("Invalid JWT payload")
}

/// Decode a base64url JSON segment of a JWT without verifying anything
///
/// # Errors
///
/// Returns an error if base64 or JSON decoding fails
pub fn decode_segment<T: DeserializeOwned>(segment: &str) -> Result<T> {
    let bytes = general_purpose::URL_SAFE_NO_PAD
        .decode(segment)
        .context("Base64 decode failed")?;
    serde_json::from_slice(&bytes).context("JSON parse failed")
}
