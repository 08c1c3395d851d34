use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::{bail, Context, Result};
use chrono::Duration;

use super::{origin_from, CallbackOrchestrator, Routes};
use crate::adapter::Adapter;
use crate::callbacks::{AuthCallbacks, DefaultCallbacks};
use crate::checks::{CheckCodec, CsrfGuard};
use crate::events::{EventDispatcher, EventHandler};
use crate::identity::IdentityResolver;
use crate::oauth::{AuthorizationExchange, HttpOAuthClient, JwtValidator, OAuthClient};
use crate::providers::{CredentialsAuthorizer, EmailSender, FlowType, Provider, ProviderRegistry};
use crate::session::{CookieFactory, EncryptedTokenCodec, SessionIssuer, SessionTokenCodec};
use crate::settings::{AuthSettings, SessionStrategy};
use crate::utils::logging::LoggingHelper;

/// Assembles a [`CallbackOrchestrator`] from settings plus the pieces only
/// code can supply
pub struct OrchestratorBuilder {
    settings: AuthSettings,
    providers: Vec<Provider>,
    adapter: Option<Arc<dyn Adapter>>,
    callbacks: Arc<dyn AuthCallbacks>,
    events: Option<Arc<dyn EventHandler>>,
    oauth_client: Option<Arc<dyn OAuthClient>>,
    token_codec: Option<Arc<dyn SessionTokenCodec>>,
    email_sender: Option<Arc<dyn EmailSender>>,
    credentials_authorizer: Option<Arc<dyn CredentialsAuthorizer>>,
}

impl OrchestratorBuilder {
    #[must_use]
    pub fn new(settings: &AuthSettings) -> Self {
        Self {
            settings: settings.clone(),
            providers: Vec::new(),
            adapter: None,
            callbacks: Arc::new(DefaultCallbacks),
            events: None,
            oauth_client: None,
            token_codec: None,
            email_sender: None,
            credentials_authorizer: None,
        }
    }

    /// Register a provider built in code, in addition to those in settings
    #[must_use]
    pub fn provider(mut self, provider: Provider) -> Self {
        self.providers.push(provider);
        self
    }

    #[must_use]
    pub fn adapter(mut self, adapter: Arc<dyn Adapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    #[must_use]
    pub fn callbacks(mut self, callbacks: Arc<dyn AuthCallbacks>) -> Self {
        self.callbacks = callbacks;
        self
    }

    #[must_use]
    pub fn events(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.events = Some(handler);
        self
    }

    /// Replace the HTTP client used to talk to providers
    #[must_use]
    pub fn oauth_client(mut self, client: Arc<dyn OAuthClient>) -> Self {
        self.oauth_client = Some(client);
        self
    }

    /// Replace the codec for stateless session tokens
    #[must_use]
    pub fn token_codec(mut self, codec: Arc<dyn SessionTokenCodec>) -> Self {
        self.token_codec = Some(codec);
        self
    }

    /// Sender for `email` providers declared in settings
    #[must_use]
    pub fn email_sender(mut self, sender: Arc<dyn EmailSender>) -> Self {
        self.email_sender = Some(sender);
        self
    }

    /// Authorizer for `credentials` providers declared in settings
    #[must_use]
    pub fn credentials_authorizer(mut self, authorizer: Arc<dyn CredentialsAuthorizer>) -> Self {
        self.credentials_authorizer = Some(authorizer);
        self
    }

    /// # Errors
    ///
    /// Returns an error when the settings are invalid, a provider cannot be
    /// built, or the configuration combines features that cannot work
    /// together (credentials with database sessions, or database sessions
    /// and email sign-in without an adapter)
    pub fn build(self) -> Result<CallbackOrchestrator> {
        self.settings.validate()?;
        let settings = &self.settings;
        let secret = settings.session.secret.clone();

        let mut registry = ProviderRegistry::new();
        for provider_settings in &settings.providers {
            if !provider_settings.enabled {
                LoggingHelper::log_provider_disabled(&provider_settings.id);
                continue;
            }
            let provider = match provider_settings.kind {
                FlowType::OAuth | FlowType::Oidc => Provider::from_settings(provider_settings)?,
                FlowType::Email => {
                    let sender = self.email_sender.clone().with_context(|| {
                        format!("Email provider '{}' needs an email sender", provider_settings.id)
                    })?;
                    let max_age = Duration::seconds(seconds(provider_settings.verification_max_age_seconds));
                    Provider::email(&provider_settings.id, sender, max_age)
                }
                FlowType::Credentials => {
                    let authorizer = self.credentials_authorizer.clone().with_context(|| {
                        format!("Credentials provider '{}' needs an authorizer", provider_settings.id)
                    })?;
                    Provider::credentials(&provider_settings.id, authorizer)
                }
            };
            registry.register(provider)?;
        }
        for provider in self.providers {
            registry.register(provider)?;
        }

        let strategy = settings.session.strategy;
        let flows: Vec<FlowType> = registry.iter().map(Provider::flow_type).collect();
        if strategy == SessionStrategy::Database && flows.contains(&FlowType::Credentials) {
            bail!("UnsupportedStrategy: credentials sign-in is only supported with the jwt session strategy");
        }
        if self.adapter.is_none() {
            if strategy == SessionStrategy::Database {
                bail!("The database session strategy needs an adapter");
            }
            if flows.contains(&FlowType::Email) {
                bail!("Email sign-in needs an adapter to store verification tokens");
            }
            if flows.iter().any(|f| matches!(f, FlowType::OAuth | FlowType::Oidc)) {
                log::warn!("No adapter configured: OAuth sign-ins will fail when resolving users");
            }
        }

        for provider in registry.iter() {
            LoggingHelper::log_provider_configured(&provider.id, provider.flow_type());
        }
        let ids: Vec<&str> = registry.iter().map(|p| p.id.as_str()).collect();
        LoggingHelper::log_providers_summary(&ids);

        let security = &settings.security;
        let client: Arc<dyn OAuthClient> = match self.oauth_client {
            Some(client) => client,
            None => Arc::new(HttpOAuthClient::new(StdDuration::from_secs(security.http_timeout_seconds))?),
        };
        let validator = JwtValidator::new(client.clone(), StdDuration::from_secs(security.jwks_cache_seconds));
        let exchange = AuthorizationExchange::new(client, validator, seconds(security.clock_skew_seconds));

        let cookies = CookieFactory::new(&settings.cookies.prefix, settings.cookies.secure);
        let checks = CheckCodec::new(
            &secret,
            Duration::seconds(seconds(security.check_max_age_seconds)),
            cookies.clone(),
        );
        let csrf = CsrfGuard::new(&secret, cookies.clone());

        let dispatcher = EventDispatcher::new(self.events);
        let identity = IdentityResolver::new(self.adapter.clone(), self.callbacks.clone(), dispatcher.clone());
        let codec: Arc<dyn SessionTokenCodec> = match self.token_codec {
            Some(codec) => codec,
            None => Arc::new(EncryptedTokenCodec::new(&secret)),
        };
        let sessions = SessionIssuer::new(
            strategy,
            Duration::seconds(seconds(settings.session.max_age_seconds)),
            Duration::seconds(seconds(settings.session.update_age_seconds)),
            cookies.clone(),
            codec,
            self.adapter.clone(),
            self.callbacks.clone(),
            dispatcher.clone(),
        );

        let base_url = settings.application.base_url.trim_end_matches('/').to_string();
        let origin = origin_from(&base_url).with_context(|| format!("Cannot derive an origin from '{base_url}'"))?;
        let routes = Routes {
            base_url,
            base_path: settings.application.base_path.clone(),
            origin,
            redirect_proxy_url: settings.application.redirect_proxy_url.clone(),
            pages: settings.pages.clone(),
            csrf_check: security.csrf_check,
        };

        log::info!(
            "Auth engine ready: {} providers, {} sessions",
            ids.len(),
            strategy.as_str()
        );
        Ok(CallbackOrchestrator {
            routes,
            secret,
            providers: registry,
            cookies,
            checks,
            csrf,
            exchange,
            identity,
            sessions,
            adapter: self.adapter,
            callbacks: self.callbacks,
            events: dispatcher,
        })
    }
}

fn seconds(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX).min(i64::MAX / 1000)
}
