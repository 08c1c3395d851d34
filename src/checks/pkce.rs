//! PKCE (RFC 7636), `S256` only

use base64::{engine::general_purpose, Engine as _};
use sha2::{Digest, Sha256};

use crate::utils::crypto::generate_token;

pub const METHOD: &str = "S256";

/// 32 random bytes, base64url: 43 characters, inside the 43..=128 range
#[must_use]
pub fn generate_verifier() -> String {
    generate_token(32)
}

/// `BASE64URL(SHA256(verifier))`
#[must_use]
pub fn challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    general_purpose::URL_SAFE_NO_PAD.encode(digest)
}
