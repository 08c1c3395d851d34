//! Provider descriptors
//!
//! A provider is immutable for the lifetime of the process. The flow it
//! drives is fixed by its [`ProviderKind`] variant, and every dispatch on it
//! is an exhaustive `match`.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::checks::CheckKind;
use crate::error::{ExchangeError, HookError};
use crate::models::{Profile, User};
use crate::orchestrator::AuthRequest;
use crate::settings::ProviderSettings;

/// Field-less tag of [`ProviderKind`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FlowType {
    #[default]
    OAuth,
    Oidc,
    Email,
    Credentials,
}

impl FlowType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OAuth => "oauth",
            Self::Oidc => "oidc",
            Self::Email => "email",
            Self::Credentials => "credentials",
        }
    }
}

/// Normalizes a raw provider profile (userinfo response or ID token claims)
pub type ProfileMapper = Arc<dyn Fn(&Value) -> Result<Profile, ExchangeError> + Send + Sync>;

/// Maps the common OAuth/OIDC profile shapes: `sub` or `id` for the subject,
/// `name`/`login`/`preferred_username`, `picture`/`avatar_url`
///
/// # Errors
///
/// Returns [`ExchangeError::Profile`] when no subject can be found
pub fn default_profile(raw: &Value) -> Result<Profile, ExchangeError> {
    let id = match raw.get("sub").or_else(|| raw.get("id")) {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return Err(ExchangeError::Profile("profile has no subject".into())),
    };
    let text = |keys: &[&str]| {
        keys.iter()
            .find_map(|key| raw.get(*key).and_then(Value::as_str))
            .map(str::to_string)
    };

    Ok(Profile {
        id,
        email: text(&["email"]),
        name: text(&["name", "login", "preferred_username"]),
        image: text(&["picture", "avatar_url"]),
    })
}

/// OAuth2 / OIDC provider configuration
#[derive(Clone)]
pub struct OAuthProvider {
    pub client_id: String,
    pub client_secret: Option<String>,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub userinfo_endpoint: Option<String>,
    pub issuer: Option<String>,
    pub jwks_uri: Option<String>,
    pub scopes: Vec<String>,
    pub checks: BTreeSet<CheckKind>,
    pub extra_auth_params: BTreeMap<String, String>,
    pub allow_dangerous_email_account_linking: bool,
    pub profile: ProfileMapper,
}

impl OAuthProvider {
    #[must_use]
    pub fn requires(&self, kind: CheckKind) -> bool {
        self.checks.contains(&kind)
    }
}

impl fmt::Debug for OAuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthProvider")
            .field("client_id", &self.client_id)
            .field("authorization_endpoint", &self.authorization_endpoint)
            .field("token_endpoint", &self.token_endpoint)
            .field("userinfo_endpoint", &self.userinfo_endpoint)
            .field("issuer", &self.issuer)
            .field("checks", &self.checks)
            .finish_non_exhaustive()
    }
}

/// Parameters handed to an [`EmailSender`]
#[derive(Debug, Clone)]
pub struct VerificationRequest {
    pub identifier: String,
    pub url: String,
    pub expires: DateTime<Utc>,
    pub provider_id: String,
}

/// Delivers email sign-in links
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_verification_request(&self, request: &VerificationRequest) -> Result<(), HookError>;
}

/// Sender that only logs the link; for local development
#[derive(Debug, Default)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send_verification_request(&self, request: &VerificationRequest) -> Result<(), HookError> {
        log::warn!(
            "Development email sender: sign-in link for {} is {}",
            request.identifier,
            request.url
        );
        Ok(())
    }
}

#[derive(Clone)]
pub struct EmailProvider {
    pub sender: Arc<dyn EmailSender>,
    pub max_age: Duration,
}

impl fmt::Debug for EmailProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmailProvider")
            .field("max_age", &self.max_age)
            .finish_non_exhaustive()
    }
}

/// Verifies submitted credentials
///
/// `Ok(None)` means the credentials were rejected; `Err` is an unexpected
/// failure of the authorizer itself.
#[async_trait]
pub trait CredentialsAuthorizer: Send + Sync {
    async fn authorize(
        &self,
        credentials: &HashMap<String, String>,
        request: &AuthRequest,
    ) -> Result<Option<User>, HookError>;
}

#[derive(Clone)]
pub struct CredentialsProvider {
    pub authorizer: Arc<dyn CredentialsAuthorizer>,
}

impl fmt::Debug for CredentialsProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialsProvider").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub enum ProviderKind {
    OAuth(OAuthProvider),
    Oidc(OAuthProvider),
    Email(EmailProvider),
    Credentials(CredentialsProvider),
}

#[derive(Debug, Clone)]
pub struct Provider {
    pub id: String,
    pub name: String,
    pub kind: ProviderKind,
}

impl Provider {
    #[must_use]
    pub const fn flow_type(&self) -> FlowType {
        match self.kind {
            ProviderKind::OAuth(_) => FlowType::OAuth,
            ProviderKind::Oidc(_) => FlowType::Oidc,
            ProviderKind::Email(_) => FlowType::Email,
            ProviderKind::Credentials(_) => FlowType::Credentials,
        }
    }

    /// The OAuth configuration for `oauth` and `oidc` providers
    #[must_use]
    pub const fn oauth(&self) -> Option<&OAuthProvider> {
        match &self.kind {
            ProviderKind::OAuth(p) | ProviderKind::Oidc(p) => Some(p),
            ProviderKind::Email(_) | ProviderKind::Credentials(_) => None,
        }
    }

    #[must_use]
    pub fn email(id: &str, sender: Arc<dyn EmailSender>, max_age: Duration) -> Self {
        Self {
            id: id.to_string(),
            name: "Email".to_string(),
            kind: ProviderKind::Email(EmailProvider { sender, max_age }),
        }
    }

    #[must_use]
    pub fn credentials(id: &str, authorizer: Arc<dyn CredentialsAuthorizer>) -> Self {
        Self {
            id: id.to_string(),
            name: "Credentials".to_string(),
            kind: ProviderKind::Credentials(CredentialsProvider { authorizer }),
        }
    }

    /// Build an `oauth` or `oidc` provider from settings, using the default
    /// profile mapper
    ///
    /// # Errors
    ///
    /// Returns an error when the settings describe another flow type or lack
    /// an endpoint the flow needs
    pub fn from_settings(settings: &ProviderSettings) -> Result<Self> {
        let oauth = Self::oauth_from_settings(settings)?;
        let kind = match settings.kind {
            FlowType::OAuth => ProviderKind::OAuth(oauth),
            FlowType::Oidc => ProviderKind::Oidc(oauth),
            other => bail!(
                "Provider '{}' has type '{}', which cannot be built from settings alone",
                settings.id,
                other.as_str()
            ),
        };

        let provider = Self {
            id: settings.id.clone(),
            name: settings.display_name().to_string(),
            kind,
        };
        provider.validate()?;
        Ok(provider)
    }

    /// Check that an OAuth provider can fetch a profile and that an OIDC
    /// provider can verify who issued its ID tokens
    ///
    /// # Errors
    ///
    /// Returns an error naming the missing endpoint
    pub fn validate(&self) -> Result<()> {
        match &self.kind {
            ProviderKind::OAuth(oauth) if oauth.userinfo_endpoint.is_none() => {
                bail!("Provider '{}' needs userinfo_endpoint", self.id)
            }
            ProviderKind::Oidc(oauth) if oauth.issuer.is_none() || oauth.jwks_uri.is_none() => {
                bail!("OIDC provider '{}' needs issuer and jwks_uri", self.id)
            }
            _ => Ok(()),
        }
    }

    fn oauth_from_settings(settings: &ProviderSettings) -> Result<OAuthProvider> {
        let required = |value: &Option<String>, field: &str| {
            value
                .clone()
                .ok_or_else(|| anyhow!("Provider '{}' needs {field}", settings.id))
        };

        let client_id = settings
            .get_client_id()
            .context(format!("Provider '{}' has no client_id", settings.id))?;

        Ok(OAuthProvider {
            client_id,
            client_secret: settings.get_client_secret(),
            authorization_endpoint: required(&settings.authorization_endpoint, "authorization_endpoint")?,
            token_endpoint: required(&settings.token_endpoint, "token_endpoint")?,
            userinfo_endpoint: settings.userinfo_endpoint.clone(),
            issuer: settings.issuer.clone(),
            jwks_uri: settings.jwks_uri.clone(),
            scopes: settings.effective_scopes(),
            checks: settings.effective_checks().into_iter().collect(),
            extra_auth_params: settings
                .extra_auth_params
                .clone()
                .unwrap_or_default()
                .into_iter()
                .collect(),
            allow_dangerous_email_account_linking: settings.allow_dangerous_email_account_linking,
            profile: Arc::new(default_profile),
        })
    }
}

/// Providers by id
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Provider>,
}

impl ProviderRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    ///
    /// Returns an error if the id is already registered or the provider
    /// fails [`Provider::validate`]
    pub fn register(&mut self, provider: Provider) -> Result<()> {
        provider.validate()?;
        if self.providers.contains_key(&provider.id) {
            bail!("Duplicate provider id '{}'", provider.id);
        }
        self.providers.insert(provider.id.clone(), provider);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Provider> {
        self.providers.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Provider> {
        self.providers.values()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
