//! Session management
//!
//! - [`cookie`] - cookie names and attributes
//! - [`chunk`] - splitting oversized values across numbered cookies
//! - [`token`] - stateless session claims and their codecs
//! - [`issuer`] - issuing, reading and ending sessions

pub mod chunk;
pub mod cookie;
pub mod issuer;
pub mod token;

pub use cookie::{CookieFactory, CookieOptions, CookieRole};
pub use issuer::{IssueRequest, IssuedSession, SessionIssuer, SessionRead};
pub use token::{EncryptedTokenCodec, HmacJwtCodec, SessionClaims, SessionTokenCodec};
