use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A stored user
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub image: Option<String>,
    pub email_verified: Option<DateTime<Utc>>,
}

impl User {
    /// Build a user that has not been persisted yet, with a fresh id
    #[must_use]
    pub fn candidate(profile: &Profile) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            email: profile.email.clone(),
            name: profile.name.clone(),
            image: profile.image.clone(),
            email_verified: None,
        }
    }
}

/// How an account authenticates
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    OAuth,
    Oidc,
    Email,
    Credentials,
}

/// Link between a user and a provider identity
///
/// Unique by `(provider, provider_account_id)`; belongs to exactly one user.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Account {
    pub user_id: String,
    pub provider: String,
    pub provider_account_id: String,
    #[serde(rename = "type")]
    pub account_type: AccountType,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    pub expires_at: Option<i64>,
    pub scope: Option<String>,
    pub token_type: Option<String>,
}

impl Account {
    /// Account row for a provider identity, carrying the persisted subset of
    /// the token set
    #[must_use]
    pub fn from_tokens(
        user_id: &str,
        provider: &str,
        provider_account_id: &str,
        account_type: AccountType,
        tokens: Option<&TokenSet>,
    ) -> Self {
        Self {
            user_id: user_id.to_string(),
            provider: provider.to_string(),
            provider_account_id: provider_account_id.to_string(),
            account_type,
            access_token: tokens.map(|t| t.access_token.clone()),
            refresh_token: tokens.and_then(|t| t.refresh_token.clone()),
            id_token: tokens.and_then(|t| t.id_token.clone()),
            expires_at: tokens.and_then(|t| t.expires_at.map(|at| at.timestamp())),
            scope: tokens.and_then(|t| t.scope.clone()),
            token_type: tokens.and_then(|t| t.token_type.clone()),
        }
    }
}

/// Tokens returned by a provider's token endpoint
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub scope: Option<String>,
    pub token_type: Option<String>,
}

/// Provider profile after normalization by the provider's profile mapper
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Profile {
    pub id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub image: Option<String>,
}

/// Outcome of a successful authorization-code exchange
///
/// Request-scoped; never persisted as-is.
#[derive(Clone, Debug)]
pub struct ExchangeResult {
    pub provider_account_id: String,
    pub raw_profile: Value,
    pub profile: Profile,
    pub token_set: TokenSet,
}

/// A resolved sign-in
#[derive(Clone, Debug)]
pub struct Identity {
    pub user: User,
    pub account: Account,
    pub is_new_user: bool,
}

/// One-time email sign-in token as stored by the adapter (`token` is a hash)
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct VerificationToken {
    pub identifier: String,
    pub token: String,
    pub expires: DateTime<Utc>,
}

/// Server-side session row
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ServerSession {
    pub id: String,
    pub session_token: String,
    pub user_id: String,
    pub expires: DateTime<Utc>,
}

/// What the session issuer produced for a sign-in
#[derive(Clone, Debug)]
pub enum SessionArtifact {
    /// Self-contained token; lives only in the cookie
    SignedToken {
        token: String,
        expires: DateTime<Utc>,
    },
    /// Opaque reference to a server-side row
    Server(ServerSession),
    /// The `jwt` hook asked for the session to be dropped
    Cleared,
}

/// Session view returned by the session endpoint
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SessionView {
    pub user: SessionUser,
    pub expires: DateTime<Utc>,
}

/// User fields exposed to clients through the session endpoint
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct SessionUser {
    pub id: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub image: Option<String>,
}

impl From<&User> for SessionUser {
    fn from(user: &User) -> Self {
        Self {
            id: Some(user.id.clone()),
            name: user.name.clone(),
            email: user.email.clone(),
            image: user.image.clone(),
        }
    }
}

#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
}
