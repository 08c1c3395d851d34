// Email magic-link flow
use actix_web::cookie::Cookie;
use chrono::Utc;
use log::info;
use url::Url;

use super::{AuthRequest, AuthResponse, CallbackOrchestrator, CALLBACK_URL_PARAM};
use crate::error::AuthError;
use crate::models::VerificationToken;
use crate::providers::{EmailProvider, Provider, VerificationRequest};
use crate::utils::crypto::{generate_token, hash_token};

/// Trim, lowercase and check the shape of an address
pub(crate) fn normalize_email(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let (local, domain) = trimmed.rsplit_once('@')?;
    if local.is_empty() || domain.is_empty() || domain.contains(',') || local.contains(',') {
        return None;
    }
    if !domain.contains('.') || domain.starts_with('.') || domain.ends_with('.') {
        return None;
    }
    if trimmed.chars().any(char::is_whitespace) {
        return None;
    }
    Some(format!("{}@{}", local.to_lowercase(), domain.to_lowercase()))
}

impl CallbackOrchestrator {
    pub(super) async fn email_sign_in(
        &self,
        provider: &Provider,
        email: &EmailProvider,
        request: &AuthRequest,
        cookies: &mut Vec<Cookie<'static>>,
    ) -> Result<AuthResponse, AuthError> {
        let identifier = request
            .param("email")
            .and_then(normalize_email)
            .ok_or(AuthError::Verification {
                has_invite: false,
                expired: false,
            })?;

        let adapter = self
            .adapter
            .as_ref()
            .ok_or_else(|| AuthError::CallbackRoute(anyhow::anyhow!("email sign-in needs an adapter")))?;

        let token = generate_token(32);
        let expires = Utc::now() + email.max_age;
        adapter
            .create_verification_token(VerificationToken {
                identifier: identifier.clone(),
                token: hash_token(&token, &self.secret),
                expires,
            })
            .await?;

        let callback_url = self.callback_url(request).await?;
        let mut link = Url::parse(&self.routes.callback_url(self.own_origin(), &provider.id))
            .map_err(|e| AuthError::CallbackRoute(anyhow::anyhow!("invalid callback URL: {e}")))?;
        link.query_pairs_mut()
            .append_pair("token", &token)
            .append_pair("email", &identifier)
            .append_pair(CALLBACK_URL_PARAM, &callback_url);

        email
            .sender
            .send_verification_request(&VerificationRequest {
                identifier: identifier.clone(),
                url: link.to_string(),
                expires,
                provider_id: provider.id.clone(),
            })
            .await
            .map_err(|e| AuthError::CallbackRoute(anyhow::anyhow!("sending the sign-in email failed: {e}")))?;

        info!("Sent sign-in link for provider '{}'", provider.id);
        Ok(AuthResponse::redirect(
            self.routes.page(&self.routes.pages.verify_request),
            std::mem::take(cookies),
        ))
    }

    pub(super) async fn email_callback(
        &self,
        provider: &Provider,
        request: &AuthRequest,
        cookies: &mut Vec<Cookie<'static>>,
    ) -> Result<AuthResponse, AuthError> {
        let (Some(token), Some(identifier)) = (
            request.param("token"),
            request.param("email").and_then(normalize_email),
        ) else {
            return Err(AuthError::Verification {
                has_invite: false,
                expired: false,
            });
        };

        let adapter = self
            .adapter
            .as_ref()
            .ok_or_else(|| AuthError::CallbackRoute(anyhow::anyhow!("email sign-in needs an adapter")))?;
        let stored = adapter
            .use_verification_token(&identifier, &hash_token(token, &self.secret))
            .await?
            .ok_or(AuthError::Verification {
                has_invite: false,
                expired: false,
            })?;
        if stored.expires <= Utc::now() {
            return Err(AuthError::Verification {
                has_invite: true,
                expired: true,
            });
        }

        let resolution = self.identity.resolve_email(&provider.id, &identifier).await?;
        self.complete(resolution, request, None, cookies).await
    }
}
