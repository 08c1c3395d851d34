//! Caller-supplied hooks invoked at fixed points of a sign-in
//!
//! Hooks never steer the state machine through panics or ambient errors: a
//! hook returning `Err` maps to a specific error kind at the call site.

use async_trait::async_trait;

use crate::error::HookError;
use crate::models::{Account, Profile, SessionView, User};
use crate::providers::FlowType;
use crate::session::token::SessionClaims;
use crate::utils::redirect_validator::resolve_callback_url;

/// Answer of the `sign_in` policy hook
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignInDecision {
    Allow,
    /// Rejected; surfaces as `AccessDenied`
    Deny,
    /// Rejected, sending the user to this URL instead of the error page
    Redirect(String),
}

/// Input to the `sign_in` policy hook
#[derive(Debug)]
pub struct SignInParams<'a> {
    pub provider: &'a str,
    pub flow: FlowType,
    pub user: &'a User,
    /// `None` for credentials sign-ins
    pub account: Option<&'a Account>,
    /// Normalized provider profile for OAuth/OIDC sign-ins
    pub profile: Option<&'a Profile>,
    /// Whether the user is unknown so far and would be created
    pub is_new_user: bool,
}

/// Why the `jwt` hook is being called
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JwtTrigger {
    SignIn,
    SignUp,
    /// Session read of an existing token
    Update,
}

#[derive(Debug)]
pub struct JwtParams<'a> {
    pub token: SessionClaims,
    pub trigger: JwtTrigger,
    pub user: Option<&'a User>,
    pub account: Option<&'a Account>,
    pub profile: Option<&'a Profile>,
}

#[async_trait]
pub trait AuthCallbacks: Send + Sync {
    /// Authorization policy; runs after the read-only identity lookup and
    /// before any write
    async fn sign_in(&self, _params: &SignInParams<'_>) -> Result<SignInDecision, HookError> {
        Ok(SignInDecision::Allow)
    }

    /// Enrich the stateless session claims; `None` signs the user out
    async fn jwt(&self, params: JwtParams<'_>) -> Result<Option<SessionClaims>, HookError> {
        Ok(Some(params.token))
    }

    /// Shape the view returned by the session endpoint
    async fn session(&self, view: SessionView, _user: Option<&User>) -> Result<SessionView, HookError> {
        Ok(view)
    }

    /// Final redirect target after sign-in or sign-out; the default keeps
    /// relative and same-origin URLs and falls back to `base_url`
    async fn redirect(&self, url: &str, base_url: &str) -> Result<String, HookError> {
        Ok(resolve_callback_url(Some(url), base_url))
    }
}

/// Hooks with every default in place
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultCallbacks;

impl AuthCallbacks for DefaultCallbacks {}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_defaults() {
        let hooks = DefaultCallbacks;
        let user = User::candidate(&Profile::default());
        let decision = hooks
            .sign_in(&SignInParams {
                provider: "github",
                flow: FlowType::OAuth,
                user: &user,
                account: None,
                profile: None,
                is_new_user: true,
            })
            .await
            .unwrap();
        assert_eq!(decision, SignInDecision::Allow);

        let claims = SessionClaims::for_user(&user);
        let out = hooks
            .jwt(JwtParams {
                token: claims.clone(),
                trigger: JwtTrigger::SignIn,
                user: Some(&user),
                account: None,
                profile: None,
            })
            .await
            .unwrap();
        assert_eq!(out, Some(claims));
    }

    #[tokio::test]
    async fn test_default_redirect_rejects_foreign_origin() {
        let hooks = DefaultCallbacks;
        assert_eq!(
            hooks
                .redirect("https://evil.example.net/x", "https://app.example.com")
                .await
                .unwrap(),
            "https://app.example.com"
        );
        assert_eq!(
            hooks
                .redirect("/dashboard", "https://app.example.com")
                .await
                .unwrap(),
            "https://app.example.com/dashboard"
        );
    }
}
