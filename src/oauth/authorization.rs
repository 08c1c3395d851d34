// Authorization request construction for OAuth/OIDC sign-in
use actix_web::cookie::Cookie;
use anyhow::{Context, Result};
use url::Url;

use crate::checks::{pkce, CheckCodec, CheckKind};
use crate::providers::OAuthProvider;

/// Where to send the browser, plus the check cookies the callback will need
#[derive(Debug)]
pub struct AuthorizationRedirect {
    pub url: String,
    pub cookies: Vec<Cookie<'static>>,
}

/// Build the provider authorization URL and issue the required checks
///
/// `origin` is embedded in the `state` parameter so that a redirect proxy
/// can route the callback back to this deployment.
///
/// # Errors
///
/// Returns an error if the authorization endpoint is not a valid URL or a
/// check cannot be sealed
pub fn build_authorization_redirect(
    provider_id: &str,
    provider: &OAuthProvider,
    codec: &CheckCodec,
    redirect_uri: &str,
    origin: Option<&str>,
) -> Result<AuthorizationRedirect> {
    let mut url = Url::parse(&provider.authorization_endpoint)
        .with_context(|| format!("Invalid authorization endpoint for provider '{provider_id}'"))?;
    let scopes = provider.scopes.join(" ");
    url.query_pairs_mut()
        .append_pair("client_id", &provider.client_id)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("response_type", "code")
        .append_pair("scope", &scopes);

    let mut cookies = Vec::with_capacity(3);
    if provider.requires(CheckKind::State) {
        let (check, cookie) = codec.issue_state(origin)?;
        url.query_pairs_mut().append_pair("state", &check.value);
        cookies.push(cookie);
    }
    if provider.requires(CheckKind::Pkce) {
        let (check, cookie) = codec.issue(CheckKind::Pkce)?;
        url.query_pairs_mut()
            .append_pair("code_challenge", &pkce::challenge(&check.value))
            .append_pair("code_challenge_method", pkce::METHOD);
        cookies.push(cookie);
    }
    if provider.requires(CheckKind::Nonce) {
        let (check, cookie) = codec.issue(CheckKind::Nonce)?;
        url.query_pairs_mut().append_pair("nonce", &check.value);
        cookies.push(cookie);
    }

    for (key, value) in &provider.extra_auth_params {
        url.query_pairs_mut().append_pair(key, value);
    }

    log::debug!(
        "Built authorization URL for provider '{provider_id}' with scopes '{scopes}' and {} checks",
        cookies.len()
    );
    Ok(AuthorizationRedirect {
        url: url.to_string(),
        cookies,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::cookie::CookieFactory;
    use crate::testing::fixtures::TestFixtures;
    use chrono::Duration;
    use std::collections::HashMap;

    fn codec() -> CheckCodec {
        CheckCodec::new("authz-secret", Duration::minutes(15), CookieFactory::new("authgate", false))
    }

    fn query(url: &str) -> HashMap<String, String> {
        Url::parse(url).unwrap().query_pairs().into_owned().collect()
    }

    #[test]
    fn test_oidc_request_carries_all_checks() {
        let codec = codec();
        let provider = TestFixtures::oidc_provider();
        let redirect = build_authorization_redirect(
            "idp",
            &provider,
            &codec,
            "https://app.example.com/auth/callback/idp",
            Some("https://app.example.com"),
        )
        .unwrap();

        let params = query(&redirect.url);
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["client_id"], "client-1");
        assert_eq!(params["scope"], "openid email profile");
        assert_eq!(params["code_challenge_method"], "S256");
        assert_eq!(redirect.cookies.len(), 3);

        let cookie_value = |kind: CheckKind| {
            redirect
                .cookies
                .iter()
                .find(|c| c.name() == codec.cookie_name(kind))
                .map(|c| c.value().to_string())
        };

        let state = codec
            .validate_state(
                Some(&params["state"]),
                cookie_value(CheckKind::State).as_deref(),
                Some("https://app.example.com"),
            )
            .unwrap();
        assert_eq!(state.value, params["state"]);

        let verifier = codec.open(CheckKind::Pkce, cookie_value(CheckKind::Pkce).as_deref()).unwrap();
        assert_eq!(params["code_challenge"], pkce::challenge(&verifier.value));

        let nonce = codec.open(CheckKind::Nonce, cookie_value(CheckKind::Nonce).as_deref()).unwrap();
        assert_eq!(params["nonce"], nonce.value);
    }

    #[test]
    fn test_checks_not_required_are_not_issued() {
        let mut provider = TestFixtures::oauth_provider();
        provider.checks.clear();
        provider.extra_auth_params.insert("prompt".into(), "consent".into());

        let redirect = build_authorization_redirect("idp", &provider, &codec(), "https://app/cb", None).unwrap();
        let params = query(&redirect.url);
        assert!(redirect.cookies.is_empty());
        assert!(!params.contains_key("state"));
        assert!(!params.contains_key("code_challenge"));
        assert_eq!(params["prompt"], "consent");
    }

    #[test]
    fn test_invalid_endpoint() {
        let mut provider = TestFixtures::oauth_provider();
        provider.authorization_endpoint = "not a url".into();
        assert!(build_authorization_redirect("idp", &provider, &codec(), "https://app/cb", None).is_err());
    }
}
