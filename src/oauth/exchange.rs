//! Authorization-code exchange
//!
//! Turns a provider callback into an [`ExchangeResult`]. Any failing step
//! aborts the whole exchange; nothing partial is returned.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use log::debug;
use serde_json::Value;

use crate::checks::{CheckCodec, CheckKind};
use crate::error::{AuthError, CheckError, ExchangeError};
use crate::models::{ExchangeResult, TokenSet};
use crate::oauth::client::{OAuthClient, TokenRequest, TokenResponse};
use crate::oauth::jwt_validation::{IdTokenExpectations, JwtValidator};
use crate::providers::OAuthProvider;
use crate::utils::logging::LoggingHelper;

/// What the callback request carried
#[derive(Debug, Clone, Copy)]
pub struct CallbackInput<'a> {
    /// Query string (GET) or form body (POST) parameters
    pub params: &'a HashMap<String, String>,
    pub cookies: &'a HashMap<String, String>,
    /// Must equal the `redirect_uri` sent in the authorization request
    pub redirect_uri: &'a str,
    /// Deployment origin the `state` must have been issued for, when a
    /// redirect proxy is in use
    pub expected_origin: Option<&'a str>,
}

/// Check values recovered from the request's cookies
#[derive(Debug, Default)]
struct VerifiedChecks {
    code_verifier: Option<String>,
    nonce: Option<String>,
}

pub struct AuthorizationExchange {
    client: Arc<dyn OAuthClient>,
    validator: JwtValidator,
    clock_skew_seconds: i64,
}

impl AuthorizationExchange {
    #[must_use]
    pub fn new(client: Arc<dyn OAuthClient>, validator: JwtValidator, clock_skew_seconds: i64) -> Self {
        Self {
            client,
            validator,
            clock_skew_seconds,
        }
    }

    /// Run the exchange for `provider`; `oidc` selects ID-token profiles
    ///
    /// The caller is responsible for expiring the check cookies, which it
    /// must do whatever this returns.
    ///
    /// # Errors
    ///
    /// Check failures and exchange failures, both of which surface as
    /// `OAuthCallbackError`
    pub async fn run(
        &self,
        provider_id: &str,
        provider: &OAuthProvider,
        oidc: bool,
        codec: &CheckCodec,
        input: CallbackInput<'_>,
    ) -> Result<ExchangeResult, AuthError> {
        let param = |name: &str| input.params.get(name).map(String::as_str);
        let cookie = |kind: CheckKind| input.cookies.get(&codec.cookie_name(kind)).map(String::as_str);

        let checks = verify_checks(provider, codec, &param, &cookie, input.expected_origin).map_err(|e| {
            LoggingHelper::log_check_failure(provider_id, &e.to_string());
            e
        })?;

        if let Some(error) = param("error") {
            return Err(ExchangeError::Provider {
                error: error.to_string(),
                description: param("error_description").map(str::to_string),
            }
            .into());
        }
        let code = param("code").filter(|c| !c.is_empty()).ok_or(ExchangeError::MissingCode)?;

        let request = TokenRequest {
            token_endpoint: provider.token_endpoint.clone(),
            code: code.to_string(),
            redirect_uri: input.redirect_uri.to_string(),
            client_id: provider.client_id.clone(),
            client_secret: provider.client_secret.clone(),
            code_verifier: checks.code_verifier,
        };
        let response = self.client.exchange_code(&request).await?;
        let token_set = token_set_from(response);
        LoggingHelper::log_token_exchange(provider_id, &token_set);

        let raw_profile = if oidc {
            self.id_token_claims(provider_id, provider, &token_set, checks.nonce).await?
        } else {
            let endpoint = provider
                .userinfo_endpoint
                .as_deref()
                .ok_or_else(|| ExchangeError::Profile("provider has no userinfo endpoint".into()))?;
            self.client.fetch_userinfo(endpoint, &token_set.access_token).await?
        };

        let profile = (provider.profile)(&raw_profile)?;
        debug!("Profile for provider '{provider_id}' mapped to subject {}", profile.id);

        Ok(ExchangeResult {
            provider_account_id: profile.id.clone(),
            raw_profile,
            profile,
            token_set,
        })
    }

    async fn id_token_claims(
        &self,
        provider_id: &str,
        provider: &OAuthProvider,
        token_set: &TokenSet,
        nonce: Option<String>,
    ) -> Result<Value, ExchangeError> {
        let id_token = token_set
            .id_token
            .as_deref()
            .ok_or_else(|| ExchangeError::InvalidResponse("token response has no id_token".into()))?;
        let expected = IdTokenExpectations {
            issuer: provider.issuer.clone(),
            audience: provider.client_id.clone(),
            nonce,
            clock_skew_seconds: self.clock_skew_seconds,
        };
        let claims = self
            .validator
            .validate_id_token(id_token, provider_id, provider.jwks_uri.as_deref(), &expected)
            .await?;
        Ok(claims)
    }
}

/// Validate `state` and open the PKCE and nonce cookies, in that order
fn verify_checks<'p, 'c>(
    provider: &OAuthProvider,
    codec: &CheckCodec,
    param: &impl Fn(&str) -> Option<&'p str>,
    cookie: &impl Fn(CheckKind) -> Option<&'c str>,
    expected_origin: Option<&str>,
) -> Result<VerifiedChecks, CheckError> {
    if provider.requires(CheckKind::State) {
        codec.validate_state(param("state"), cookie(CheckKind::State), expected_origin)?;
    }
    let mut checks = VerifiedChecks::default();
    if provider.requires(CheckKind::Pkce) {
        checks.code_verifier = Some(codec.open(CheckKind::Pkce, cookie(CheckKind::Pkce))?.value);
    }
    if provider.requires(CheckKind::Nonce) {
        checks.nonce = Some(codec.open(CheckKind::Nonce, cookie(CheckKind::Nonce))?.value);
    }
    Ok(checks)
}

fn token_set_from(response: TokenResponse) -> TokenSet {
    TokenSet {
        expires_at: response.expires_in.map(|secs| Utc::now() + Duration::seconds(secs)),
        access_token: response.access_token,
        refresh_token: response.refresh_token,
        id_token: response.id_token,
        scope: response.scope,
        token_type: response.token_type,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::cookie::CookieFactory;
    use crate::testing::{constants::TEST_EC_KID, fixtures::TestFixtures, mock::MockOAuthClient};
    use serde_json::json;

    struct Harness {
        client: Arc<MockOAuthClient>,
        exchange: AuthorizationExchange,
        codec: CheckCodec,
    }

    async fn harness() -> Harness {
        let client = Arc::new(MockOAuthClient::default());
        let validator = JwtValidator::new(client.clone(), std::time::Duration::from_secs(3600));
        validator.seed_keys("idp", vec![TestFixtures::ec_jwk()]).await;
        Harness {
            exchange: AuthorizationExchange::new(client.clone(), validator, 60),
            client,
            codec: CheckCodec::new("exchange-secret", Duration::minutes(15), CookieFactory::new("authgate", false)),
        }
    }

    /// Query and cookies for a callback whose checks were issued by `codec`
    fn callback(codec: &CheckCodec, kinds: &[CheckKind]) -> (HashMap<String, String>, HashMap<String, String>) {
        let mut params = HashMap::from([("code".to_string(), "auth-code".to_string())]);
        let mut cookies = HashMap::new();
        for kind in kinds {
            let (check, cookie) = codec.issue(*kind).unwrap();
            if *kind == CheckKind::State {
                params.insert("state".into(), check.value.clone());
            }
            if *kind == CheckKind::Nonce {
                params.insert("test_nonce".into(), check.value.clone());
            }
            cookies.insert(cookie.name().to_string(), cookie.value().to_string());
        }
        (params, cookies)
    }

    fn input<'a>(params: &'a HashMap<String, String>, cookies: &'a HashMap<String, String>) -> CallbackInput<'a> {
        CallbackInput {
            params,
            cookies,
            redirect_uri: "https://app.example.com/auth/callback/idp",
            expected_origin: None,
        }
    }

    #[tokio::test]
    async fn test_oauth_exchange_forwards_pkce_verifier() {
        let h = harness().await;
        h.client.set_userinfo(json!({"id": 42, "login": "octo", "email": "octo@example.com"}));
        let provider = TestFixtures::oauth_provider();
        let (params, cookies) = callback(&h.codec, &[CheckKind::State, CheckKind::Pkce]);

        let result = h
            .exchange
            .run("idp", &provider, false, &h.codec, input(&params, &cookies))
            .await
            .unwrap();

        assert_eq!(result.provider_account_id, "42");
        assert_eq!(result.profile.name.as_deref(), Some("octo"));
        assert!(result.token_set.expires_at.is_some());

        let request = h.client.last_token_request().unwrap();
        let verifier = h.codec.open(CheckKind::Pkce, cookies.get(&h.codec.cookie_name(CheckKind::Pkce)).map(String::as_str)).unwrap();
        assert_eq!(request.code_verifier, Some(verifier.value));
        assert_eq!(request.code, "auth-code");
    }

    #[tokio::test]
    async fn test_missing_state_cookie_never_exchanges() {
        let h = harness().await;
        let provider = TestFixtures::oauth_provider();
        let (params, mut cookies) = callback(&h.codec, &[CheckKind::State, CheckKind::Pkce]);
        cookies.remove(&h.codec.cookie_name(CheckKind::State));

        let err = h
            .exchange
            .run("idp", &provider, false, &h.codec, input(&params, &cookies))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::OAuthCallback(_)));
        assert_eq!(h.client.exchange_calls(), 0);
    }

    #[tokio::test]
    async fn test_provider_error_short_circuits() {
        let h = harness().await;
        let provider = TestFixtures::oauth_provider();
        let (mut params, cookies) = callback(&h.codec, &[CheckKind::State, CheckKind::Pkce]);
        params.insert("error".into(), "access_denied".into());

        let err = h
            .exchange
            .run("idp", &provider, false, &h.codec, input(&params, &cookies))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("access_denied"));
        assert_eq!(h.client.exchange_calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_code() {
        let h = harness().await;
        let provider = TestFixtures::oauth_provider();
        let (mut params, cookies) = callback(&h.codec, &[CheckKind::State, CheckKind::Pkce]);
        params.remove("code");

        let err = h
            .exchange
            .run("idp", &provider, false, &h.codec, input(&params, &cookies))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::OAuthCallback(_)));
        assert_eq!(h.client.exchange_calls(), 0);
    }

    #[tokio::test]
    async fn test_oidc_profile_from_id_token() {
        let h = harness().await;
        let provider = TestFixtures::oidc_provider();
        let (params, cookies) = callback(&h.codec, &[CheckKind::State, CheckKind::Pkce, CheckKind::Nonce]);
        let nonce = params["test_nonce"].clone();
        h.client.set_id_token(TestFixtures::sign_es256(
            &TestFixtures::id_token_claims("oidc-sub", Some(&nonce)),
            Some(TEST_EC_KID),
        ));

        let result = h
            .exchange
            .run("idp", &provider, true, &h.codec, input(&params, &cookies))
            .await
            .unwrap();
        assert_eq!(result.provider_account_id, "oidc-sub");
        assert_eq!(result.raw_profile["nonce"], nonce.as_str());
        assert_eq!(h.client.userinfo_calls(), 0);
    }

    #[tokio::test]
    async fn test_oidc_nonce_mismatch_rejected() {
        let h = harness().await;
        let provider = TestFixtures::oidc_provider();
        let (params, cookies) = callback(&h.codec, &[CheckKind::State, CheckKind::Pkce, CheckKind::Nonce]);
        h.client.set_id_token(TestFixtures::sign_es256(
            &TestFixtures::id_token_claims("oidc-sub", Some("replayed-nonce")),
            Some(TEST_EC_KID),
        ));

        let err = h
            .exchange
            .run("idp", &provider, true, &h.codec, input(&params, &cookies))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::OAuthCallback(ref msg) if msg.contains("nonce")));
    }

    #[tokio::test]
    async fn test_token_endpoint_failure() {
        let h = harness().await;
        h.client.fail_exchange(ExchangeError::TokenEndpoint {
            status: 400,
            body: "invalid_grant".into(),
        });
        let provider = TestFixtures::oauth_provider();
        let (params, cookies) = callback(&h.codec, &[CheckKind::State, CheckKind::Pkce]);

        let err = h
            .exchange
            .run("idp", &provider, false, &h.codec, input(&params, &cookies))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::OAuthCallback(_)));
        assert_eq!(h.client.userinfo_calls(), 0);
    }
}
