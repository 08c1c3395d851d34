//! Callback orchestration
//!
//! [`CallbackOrchestrator`] is the framework-neutral entry point. It takes an
//! [`AuthRequest`] and always answers with an [`AuthResponse`]: every failure
//! is logged in full and surfaces to the client only as an error kind name in
//! a redirect.

mod builder;
mod credentials;
mod email;
mod oauth;

use std::collections::HashMap;
use std::sync::Arc;

use actix_web::cookie::Cookie;
use anyhow::anyhow;
use url::Url;

use crate::adapter::Adapter;
use crate::callbacks::AuthCallbacks;
use crate::checks::{csrf, CheckCodec, CsrfGuard};
use crate::error::{AuthError, ErrorKind};
use crate::events::{AuthEvent, EventDispatcher, SignInEvent};
use crate::identity::{IdentityResolver, Resolution};
use crate::models::{AccountType, Identity, SessionView};
use crate::oauth::AuthorizationExchange;
use crate::providers::{ProviderKind, ProviderRegistry};
use crate::session::{CookieFactory, CookieRole, IssueRequest, SessionIssuer};
use crate::settings::PageSettings;
use crate::utils::logging::LoggingHelper;
use crate::utils::redirect_validator::{absolute_page_url, origin_of, validate_redirect};

pub use builder::OrchestratorBuilder;

/// Query parameter and form field carrying the post-sign-in destination
pub const CALLBACK_URL_PARAM: &str = "callbackUrl";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMethod {
    #[default]
    Get,
    Post,
}

/// An inbound request, reduced to what the engine reads
#[derive(Debug, Clone, Default)]
pub struct AuthRequest {
    pub method: RequestMethod,
    pub query: HashMap<String, String>,
    /// Decoded `application/x-www-form-urlencoded` body of a POST
    pub form: HashMap<String, String>,
    pub cookies: HashMap<String, String>,
}

impl AuthRequest {
    /// Parameters of the request: the form for POST, the query for GET
    #[must_use]
    pub const fn params(&self) -> &HashMap<String, String> {
        match self.method {
            RequestMethod::Get => &self.query,
            RequestMethod::Post => &self.form,
        }
    }

    /// A parameter from the request's params, falling back to the query
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params()
            .get(name)
            .or_else(|| self.query.get(name))
            .map(String::as_str)
    }

    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }
}

/// What to send back: a redirect with cookies, and the logical status of
/// the outcome (302 on success, 401/403/500 for the error kinds that carry
/// one)
#[derive(Debug)]
pub struct AuthResponse {
    pub status: u16,
    pub redirect: String,
    pub cookies: Vec<Cookie<'static>>,
    /// Set when the response reports a failure
    pub error: Option<ErrorKind>,
}

impl AuthResponse {
    #[must_use]
    pub fn redirect(url: impl Into<String>, cookies: Vec<Cookie<'static>>) -> Self {
        Self {
            status: 302,
            redirect: url.into(),
            cookies,
            error: None,
        }
    }

    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<&Cookie<'static>> {
        self.cookies.iter().rev().find(|c| c.name() == name)
    }
}

/// Session endpoint answer
#[derive(Debug)]
pub struct SessionResponse {
    pub session: Option<SessionView>,
    pub cookies: Vec<Cookie<'static>>,
}

/// CSRF endpoint answer
#[derive(Debug)]
pub struct CsrfResponse {
    pub csrf_token: String,
    pub cookie: Option<Cookie<'static>>,
}

/// URLs and switches the orchestrator needs from the settings
#[derive(Debug, Clone)]
pub(crate) struct Routes {
    pub base_url: String,
    pub base_path: String,
    pub origin: String,
    pub redirect_proxy_url: Option<String>,
    pub pages: PageSettings,
    pub csrf_check: bool,
}

impl Routes {
    /// Where a provider sends the browser back to for `provider_id`
    pub fn redirect_uri(&self, provider_id: &str) -> String {
        match &self.redirect_proxy_url {
            Some(proxy) => format!("{}/callback/{provider_id}", proxy.trim_end_matches('/')),
            None => self.callback_url(&self.origin, provider_id),
        }
    }

    pub fn callback_url(&self, origin: &str, provider_id: &str) -> String {
        format!("{origin}{}/callback/{provider_id}", self.base_path.trim_end_matches('/'))
    }

    pub fn page(&self, page: &str) -> String {
        absolute_page_url(page, &self.base_url)
    }
}

pub struct CallbackOrchestrator {
    pub(crate) routes: Routes,
    pub(crate) secret: String,
    pub(crate) providers: ProviderRegistry,
    pub(crate) cookies: CookieFactory,
    pub(crate) checks: CheckCodec,
    pub(crate) csrf: CsrfGuard,
    pub(crate) exchange: AuthorizationExchange,
    pub(crate) identity: IdentityResolver,
    pub(crate) sessions: SessionIssuer,
    pub(crate) adapter: Option<Arc<dyn Adapter>>,
    pub(crate) callbacks: Arc<dyn AuthCallbacks>,
    pub(crate) events: EventDispatcher,
}

impl CallbackOrchestrator {
    #[must_use]
    pub fn builder(settings: &crate::settings::AuthSettings) -> OrchestratorBuilder {
        OrchestratorBuilder::new(settings)
    }

    #[must_use]
    pub const fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    #[must_use]
    pub const fn sessions(&self) -> &SessionIssuer {
        &self.sessions
    }

    /// Handle a provider callback for `provider_id`
    pub async fn handle_callback(&self, provider_id: &str, request: &AuthRequest) -> AuthResponse {
        let mut cookies = Vec::new();
        let result = self.dispatch_callback(provider_id, request, &mut cookies).await;
        self.finish(result, Some(provider_id), cookies)
    }

    async fn dispatch_callback(
        &self,
        provider_id: &str,
        request: &AuthRequest,
        cookies: &mut Vec<Cookie<'static>>,
    ) -> Result<AuthResponse, AuthError> {
        let provider = self
            .providers
            .get(provider_id)
            .ok_or_else(|| AuthError::MissingProvider(provider_id.to_string()))?;
        LoggingHelper::log_callback_received(
            provider_id,
            provider.flow_type(),
            request.param("code").is_some() || request.param("token").is_some(),
            request.param("state").is_some(),
        );

        match &provider.kind {
            ProviderKind::OAuth(oauth) => self.oauth_callback(provider, oauth, false, request, cookies).await,
            ProviderKind::Oidc(oauth) => self.oauth_callback(provider, oauth, true, request, cookies).await,
            ProviderKind::Email(_) => self.email_callback(provider, request, cookies).await,
            ProviderKind::Credentials(creds) => self.credentials_callback(provider, creds, request, cookies).await,
        }
    }

    /// Start a sign-in with `provider_id`
    ///
    /// OAuth, OIDC and email sign-ins are form posts and need the CSRF token
    /// when CSRF checking is on.
    pub async fn handle_sign_in(&self, provider_id: &str, request: &AuthRequest) -> AuthResponse {
        let mut cookies = Vec::new();
        let result = self.dispatch_sign_in(provider_id, request, &mut cookies).await;
        self.finish(result, Some(provider_id), cookies)
    }

    async fn dispatch_sign_in(
        &self,
        provider_id: &str,
        request: &AuthRequest,
        cookies: &mut Vec<Cookie<'static>>,
    ) -> Result<AuthResponse, AuthError> {
        let provider = self
            .providers
            .get(provider_id)
            .ok_or_else(|| AuthError::MissingProvider(provider_id.to_string()))?;
        // Credentials are posted straight to the callback, which checks the token itself
        if !matches!(provider.kind, ProviderKind::Credentials(_)) {
            self.verify_csrf(request)?;
        }

        if let Some(target) = request
            .param(CALLBACK_URL_PARAM)
            .and_then(|url| validate_redirect(url, &self.routes.base_url))
        {
            cookies.push(self.cookies.create_cookie(
                &self.cookies.name(CookieRole::CallbackUrl),
                target,
                crate::session::CookieOptions::default(),
            ));
        }

        match &provider.kind {
            ProviderKind::OAuth(oauth) | ProviderKind::Oidc(oauth) => self.oauth_sign_in(provider, oauth, cookies),
            ProviderKind::Email(email) => self.email_sign_in(provider, email, request, cookies).await,
            ProviderKind::Credentials(_) => Ok(AuthResponse::redirect(
                self.routes.page(&self.routes.pages.sign_in),
                std::mem::take(cookies),
            )),
        }
    }

    /// Read the current session
    ///
    /// # Errors
    ///
    /// Adapter and hook failures
    pub async fn session(&self, request: &AuthRequest) -> Result<SessionResponse, AuthError> {
        let read = self.sessions.read_session(&request.cookies).await.map_err(|err| {
            LoggingHelper::log_auth_failure(None, &err);
            err
        })?;
        Ok(SessionResponse {
            session: read.session,
            cookies: read.cookies,
        })
    }

    /// Sign out; requires the CSRF token when CSRF checking is on
    pub async fn handle_sign_out(&self, request: &AuthRequest) -> AuthResponse {
        let result = async {
            self.verify_csrf(request)?;
            let cookies = self.sessions.sign_out(&request.cookies).await?;
            let target = self.callback_url(request).await?;
            Ok::<_, AuthError>(AuthResponse::redirect(target, cookies))
        }
        .await;
        self.finish(result, None, Vec::new())
    }

    /// Issue or reuse the double-submit CSRF token
    #[must_use]
    pub fn csrf_token(&self, request: &AuthRequest) -> CsrfResponse {
        let (csrf_token, cookie) = self.csrf.token(request.cookie(&self.csrf.cookie_name()));
        CsrfResponse { csrf_token, cookie }
    }

    pub(crate) fn verify_csrf(&self, request: &AuthRequest) -> Result<(), AuthError> {
        if !self.routes.csrf_check {
            return Ok(());
        }
        self.csrf.verify(
            request.cookie(&self.csrf.cookie_name()),
            request.param(csrf::FORM_FIELD),
        )
    }

    /// Where to send the user after a completed request: the `callbackUrl`
    /// parameter, then the cookie set at sign-in, then the base URL, passed
    /// through the `redirect` hook
    pub(crate) async fn callback_url(&self, request: &AuthRequest) -> Result<String, AuthError> {
        let requested = request
            .param(CALLBACK_URL_PARAM)
            .or_else(|| request.cookie(&self.cookies.name(CookieRole::CallbackUrl)))
            .unwrap_or(self.routes.base_url.as_str());
        self.callbacks
            .redirect(requested, &self.routes.base_url)
            .await
            .map_err(|err| AuthError::CallbackRoute(anyhow!("redirect callback failed: {err}")))
    }

    /// Issue the session for a resolution and build the success redirect
    pub(crate) async fn complete(
        &self,
        resolution: Resolution,
        request: &AuthRequest,
        profile: Option<&crate::models::Profile>,
        cookies: &mut Vec<Cookie<'static>>,
    ) -> Result<AuthResponse, AuthError> {
        let identity: Identity = match resolution {
            Resolution::SignedIn(identity) => identity,
            Resolution::Redirect(url) => {
                let target = self
                    .callbacks
                    .redirect(&url, &self.routes.base_url)
                    .await
                    .map_err(|err| AuthError::CallbackRoute(anyhow!("redirect callback failed: {err}")))?;
                LoggingHelper::log_redirect(&target);
                return Ok(AuthResponse::redirect(target, std::mem::take(cookies)));
            }
        };

        // The redirect hook runs before any session exists
        let callback_url = self.callback_url(request).await?;
        let target = match (&self.routes.pages.new_user, identity.is_new_user) {
            (Some(page), true) => with_query(&self.routes.page(page), &[(CALLBACK_URL_PARAM, &callback_url)]),
            _ => callback_url,
        };

        let issued = self
            .sessions
            .issue(
                IssueRequest {
                    user: &identity.user,
                    account: Some(&identity.account),
                    profile,
                    is_new_user: identity.is_new_user,
                },
                &request.cookies,
            )
            .await?;
        cookies.extend(issued.cookies);
        self.events.emit(AuthEvent::SignIn(SignInEvent {
            account: (identity.account.account_type != AccountType::Credentials).then(|| identity.account.clone()),
            provider: identity.account.provider.clone(),
            is_new_user: identity.is_new_user,
            user: identity.user,
        }));

        let callback_cookie = self.cookies.name(CookieRole::CallbackUrl);
        if request.cookies.contains_key(&callback_cookie) {
            cookies.push(self.cookies.create_expired_cookie(&callback_cookie));
        }

        LoggingHelper::log_redirect(&target);
        Ok(AuthResponse::redirect(target, std::mem::take(cookies)))
    }

    /// Turn a result into the response, mapping errors to a redirect that
    /// carries only the error kind
    fn finish(
        &self,
        result: Result<AuthResponse, AuthError>,
        provider_id: Option<&str>,
        mut cookies: Vec<Cookie<'static>>,
    ) -> AuthResponse {
        match result {
            Ok(mut response) => {
                cookies.append(&mut response.cookies);
                response.cookies = cookies;
                response
            }
            Err(err) => {
                LoggingHelper::log_auth_failure(provider_id, &err);
                self.error_response(&err, provider_id, cookies)
            }
        }
    }

    fn error_response(&self, err: &AuthError, provider_id: Option<&str>, cookies: Vec<Cookie<'static>>) -> AuthResponse {
        let kind = err.kind();
        let page = if kind.targets_sign_in() {
            &self.routes.pages.sign_in
        } else {
            &self.routes.pages.error
        };
        let mut params = vec![("error", kind.as_str())];
        if let AuthError::CredentialsSignin { provider } = err {
            params.push(("provider", provider));
        }

        AuthResponse {
            status: kind.status(),
            redirect: with_query(&self.routes.page(page), &params),
            cookies,
            error: Some(kind),
        }
    }

    pub(crate) fn own_origin(&self) -> &str {
        &self.routes.origin
    }
}

/// Append query parameters to `url`, keeping any it already has
fn with_query(url: &str, params: &[(&str, &str)]) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            parsed.query_pairs_mut().extend_pairs(params.iter().copied());
            parsed.to_string()
        }
        Err(_) => {
            let query: Vec<String> = params
                .iter()
                .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
                .collect();
            let separator = if url.contains('?') { '&' } else { '?' };
            format!("{url}{separator}{}", query.join("&"))
        }
    }
}

/// Origin of an absolute URL, used to compare deployments
pub(crate) fn origin_from(url: &str) -> Option<String> {
    Url::parse(url).ok().map(|u| origin_of(&u))
}
