// OAuth and OIDC flows
use actix_web::cookie::Cookie;
use log::{debug, info};

use super::{origin_from, AuthRequest, AuthResponse, CallbackOrchestrator};
use crate::checks::CheckKind;
use crate::error::AuthError;
use crate::identity::ProviderSignIn;
use crate::oauth::{build_authorization_redirect, CallbackInput};
use crate::providers::{OAuthProvider, Provider};

impl CallbackOrchestrator {
    pub(super) fn oauth_sign_in(
        &self,
        provider: &Provider,
        oauth: &OAuthProvider,
        cookies: &mut Vec<Cookie<'static>>,
    ) -> Result<AuthResponse, AuthError> {
        // The origin only needs to travel in `state` when a proxy has to
        // route the callback back here
        let origin = self
            .routes
            .redirect_proxy_url
            .as_ref()
            .map(|_| self.own_origin());
        let redirect = build_authorization_redirect(
            &provider.id,
            oauth,
            &self.checks,
            &self.routes.redirect_uri(&provider.id),
            origin,
        )?;
        cookies.extend(redirect.cookies);
        info!("Starting {} sign-in with provider '{}'", provider.flow_type().as_str(), provider.id);
        Ok(AuthResponse::redirect(redirect.url, std::mem::take(cookies)))
    }

    pub(super) async fn oauth_callback(
        &self,
        provider: &Provider,
        oauth: &OAuthProvider,
        oidc: bool,
        request: &AuthRequest,
        cookies: &mut Vec<Cookie<'static>>,
    ) -> Result<AuthResponse, AuthError> {
        if let Some(target) = self.proxy_bounce(&provider.id, request) {
            info!("Forwarding callback for provider '{}' to its originating deployment", provider.id);
            return Ok(AuthResponse::redirect(target, Vec::new()));
        }

        // Check cookies are single-use whatever the outcome
        for kind in [CheckKind::State, CheckKind::Pkce, CheckKind::Nonce] {
            if oauth.requires(kind) {
                cookies.push(self.checks.consume(kind));
            }
        }

        let redirect_uri = self.routes.redirect_uri(&provider.id);
        let expected_origin = self
            .routes
            .redirect_proxy_url
            .as_ref()
            .map(|_| self.own_origin());
        let exchange = self
            .exchange
            .run(
                &provider.id,
                oauth,
                oidc,
                &self.checks,
                CallbackInput {
                    params: request.params(),
                    cookies: &request.cookies,
                    redirect_uri: &redirect_uri,
                    expected_origin,
                },
            )
            .await?;

        let session_user = self.sessions.current_user_id(&request.cookies).await;
        let resolution = self
            .identity
            .resolve_oauth(
                ProviderSignIn {
                    provider_id: &provider.id,
                    flow: provider.flow_type(),
                    allow_dangerous_email_account_linking: oauth.allow_dangerous_email_account_linking,
                },
                &exchange,
                session_user.as_deref(),
            )
            .await?;

        self.complete(resolution, request, Some(&exchange.profile), cookies).await
    }

    /// When a callback arrives for a flow another deployment started, the
    /// URL to forward it to
    fn proxy_bounce(&self, provider_id: &str, request: &AuthRequest) -> Option<String> {
        // Deployments behind a proxy validate the origin instead
        if self.routes.redirect_proxy_url.is_some() {
            return None;
        }
        let state = request.param("state")?;
        let origin = self.checks.state_origin(state).ok().flatten()?;
        let origin = origin_from(&origin)?;
        if origin == self.own_origin() {
            return None;
        }

        let mut target = url::Url::parse(&self.routes.callback_url(&origin, provider_id)).ok()?;
        {
            let mut pairs = target.query_pairs_mut();
            let mut params: Vec<_> = request.params().iter().collect();
            params.sort();
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
        }
        debug!("Callback state targets origin {origin}");
        Some(target.to_string())
    }
}
