//! Error taxonomy for the callback orchestrator and its components
//!
//! Component errors (`CheckError`, `ExchangeError`, `AdapterError`, ...) carry
//! full diagnostic detail for the logs. The orchestrator folds all of them into
//! [`AuthError`], whose [`AuthError::kind`] is the only thing that ever reaches
//! a redirect URL.

use std::fmt;

use thiserror::Error;

/// Stable, client-visible error kind names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    MissingProvider,
    OAuthCallbackError,
    Verification,
    AuthorizedCallbackError,
    AccessDenied,
    CallbackRouteError,
    CredentialsSignin,
    OAuthAccountNotLinked,
    MissingCsrf,
}

impl ErrorKind {
    /// The name placed in the `error` query parameter
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MissingProvider => "MissingProvider",
            Self::OAuthCallbackError => "OAuthCallbackError",
            Self::Verification => "Verification",
            Self::AuthorizedCallbackError => "AuthorizedCallbackError",
            Self::AccessDenied => "AccessDenied",
            Self::CallbackRouteError => "CallbackRouteError",
            Self::CredentialsSignin => "CredentialsSignin",
            Self::OAuthAccountNotLinked => "OAuthAccountNotLinked",
            Self::MissingCsrf => "MissingCSRF",
        }
    }

    /// Logical HTTP status associated with the kind
    #[must_use]
    pub const fn status(self) -> u16 {
        match self {
            Self::CredentialsSignin => 401,
            Self::AccessDenied => 403,
            Self::MissingProvider | Self::AuthorizedCallbackError | Self::CallbackRouteError => {
                500
            }
            Self::OAuthCallbackError
            | Self::Verification
            | Self::OAuthAccountNotLinked
            | Self::MissingCsrf => 302,
        }
    }

    /// Whether the user should land on the sign-in page (retryable) rather
    /// than the error page
    #[must_use]
    pub const fn targets_sign_in(self) -> bool {
        matches!(
            self,
            Self::OAuthCallbackError
                | Self::Verification
                | Self::CredentialsSignin
                | Self::OAuthAccountNotLinked
                | Self::MissingCsrf
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by the callback orchestrator
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("No provider matches '{0}'")]
    MissingProvider(String),

    #[error("OAuth callback failed: {0}")]
    OAuthCallback(String),

    #[error("Verification token invalid (has_invite={has_invite}, expired={expired})")]
    Verification { has_invite: bool, expired: bool },

    #[error("The sign-in callback failed: {0}")]
    AuthorizedCallback(String),

    #[error("Access denied by the sign-in callback")]
    AccessDenied,

    #[error("Callback route failed: {0:#}")]
    CallbackRoute(anyhow::Error),

    #[error("Credentials rejected for provider '{provider}'")]
    CredentialsSignin { provider: String },

    #[error("Account is linked to a different user")]
    OAuthAccountNotLinked,

    #[error("CSRF token missing or invalid")]
    MissingCsrf,
}

impl AuthError {
    /// Map to the stable client-visible kind
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingProvider(_) => ErrorKind::MissingProvider,
            Self::OAuthCallback(_) => ErrorKind::OAuthCallbackError,
            Self::Verification { .. } => ErrorKind::Verification,
            Self::AuthorizedCallback(_) => ErrorKind::AuthorizedCallbackError,
            Self::AccessDenied => ErrorKind::AccessDenied,
            Self::CallbackRoute(_) => ErrorKind::CallbackRouteError,
            Self::CredentialsSignin { .. } => ErrorKind::CredentialsSignin,
            Self::OAuthAccountNotLinked => ErrorKind::OAuthAccountNotLinked,
            Self::MissingCsrf => ErrorKind::MissingCsrf,
        }
    }
}

impl From<anyhow::Error> for AuthError {
    fn from(err: anyhow::Error) -> Self {
        Self::CallbackRoute(err)
    }
}

impl From<CheckError> for AuthError {
    fn from(err: CheckError) -> Self {
        Self::OAuthCallback(err.to_string())
    }
}

impl From<ExchangeError> for AuthError {
    fn from(err: ExchangeError) -> Self {
        Self::OAuthCallback(err.to_string())
    }
}

impl From<AdapterError> for AuthError {
    fn from(err: AdapterError) -> Self {
        Self::CallbackRoute(anyhow::Error::new(err))
    }
}

impl From<SessionError> for AuthError {
    fn from(err: SessionError) -> Self {
        Self::CallbackRoute(anyhow::Error::new(err))
    }
}

/// Failure of a single-use check cookie (state, PKCE, nonce)
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CheckError {
    #[error("{0} cookie was missing")]
    Missing(&'static str),

    #[error("{0} value did not match")]
    Mismatch(&'static str),

    #[error("{0} value has expired")]
    Expired(&'static str),

    #[error("{0} cookie could not be decoded")]
    Invalid(&'static str),

    #[error("state was issued for origin '{actual}', expected '{expected}'")]
    OriginMismatch { expected: String, actual: String },
}

/// Failure of the authorization-code exchange or profile retrieval
#[derive(Debug, Error, Clone)]
pub enum ExchangeError {
    #[error("provider returned error '{error}'")]
    Provider {
        error: String,
        description: Option<String>,
    },

    #[error("authorization code missing from callback")]
    MissingCode,

    #[error("token endpoint rejected the request with status {status}: {body}")]
    TokenEndpoint { status: u16, body: String },

    #[error("network failure: {0}")]
    Network(String),

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("ID token rejected: {0}")]
    IdToken(#[from] JwtValidationError),

    #[error("profile mapping failed: {0}")]
    Profile(String),
}

/// ID token validation failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JwtValidationError {
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("JWT signature verification failed")]
    SignatureInvalid,

    #[error("Claim '{claim}' validation failed: expected '{expected}', got '{actual}'")]
    ClaimValidationFailed {
        claim: String,
        expected: String,
        actual: String,
    },

    #[error("Failed to fetch JWKS: {0}")]
    JwksFetchFailed(String),

    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Token has expired")]
    TokenExpired,

    #[error("Token is not yet valid")]
    TokenNotYetValid,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Failed to decode key: {0}")]
    KeyDecodingFailed(String),
}

/// Storage adapter failures
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("adapter does not implement {0}")]
    Unsupported(&'static str),

    #[error("unique constraint violated: {0}")]
    Conflict(String),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("storage failure: {0}")]
    Storage(String),
}

/// Session issuance and decoding failures
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session token encoding failed: {0}")]
    Encode(String),

    #[error("session token decoding failed: {0}")]
    Decode(String),

    #[error("session has expired")]
    Expired,

    #[error("session cookie chunk {0} is missing")]
    MissingChunk(usize),

    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

/// Failure raised by a caller-supplied hook
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HookError(pub String);

impl HookError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}
