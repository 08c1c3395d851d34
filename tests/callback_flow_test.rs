// Integration tests for the callback orchestrator across every sign-in flow
use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde_json::json;
use sha2::{Digest, Sha256};

use authgate::callbacks::{AuthCallbacks, SignInDecision, SignInParams};
use authgate::error::{ErrorKind, ExchangeError, HookError};
use authgate::models::VerificationToken;
use authgate::providers::ProviderKind;
use authgate::settings::SessionStrategy;
use authgate::testing::constants::{TEST_BASE_URL, TEST_EC_KID, TEST_SECRET};
use authgate::testing::mock::MockAuthorizer;
use authgate::testing::{
    assert_auth_error, assert_cookie_cleared, assert_cookie_set, assert_redirects_to, redirect_params, CookieJar,
    RequestBuilder, TestAuth, TestFixtures,
};
use authgate::utils::crypto::hash_token;
use authgate::Adapter;

const SESSION: &str = "authgate.session-token";
const SIGN_IN_PAGE: &str = "https://app.example.com/auth/signin";
const ERROR_PAGE: &str = "https://app.example.com/auth/error";

struct Policy(Result<SignInDecision, &'static str>);

#[async_trait]
impl AuthCallbacks for Policy {
    async fn sign_in(&self, _params: &SignInParams<'_>) -> Result<SignInDecision, HookError> {
        self.0.clone().map_err(HookError::new)
    }
}

struct FailingRedirect;

#[async_trait]
impl AuthCallbacks for FailingRedirect {
    async fn redirect(&self, _url: &str, _base_url: &str) -> Result<String, HookError> {
        Err(HookError::new("redirect service down"))
    }
}

fn with_policy(decision: Result<SignInDecision, &'static str>) -> TestAuth {
    TestAuth::builder()
        .oauth("github")
        .callbacks(Arc::new(Policy(decision)))
        .build()
}

// OAuth and OIDC round trips

#[actix_web::test]
async fn test_oauth_sign_in_creates_user_and_session() {
    let auth = TestAuth::builder().oauth("github").build();
    let mut jar = CookieJar::new();

    let response = auth.oauth_round_trip("github", "gh-1", &mut jar).await;

    assert_redirects_to(&response, TEST_BASE_URL);
    assert_cookie_set(&response, SESSION);
    assert_cookie_cleared(&response, "authgate.state");
    assert_cookie_cleared(&response, "authgate.pkce.code_verifier");
    assert_eq!(auth.adapter.user_count().await, 1);
    assert_eq!(auth.client.exchange_calls(), 1);
    assert_eq!(auth.client.userinfo_calls(), 1);

    let session = auth
        .orchestrator
        .session(&RequestBuilder::get().jar(&jar).build())
        .await
        .unwrap()
        .session
        .expect("signed in");
    assert_eq!(session.user.email.as_deref(), Some("gh-1@example.com"));
}

#[actix_web::test]
async fn test_oidc_sign_in_validates_id_token() {
    let auth = TestAuth::builder().oidc("idp").build();
    let mut jar = CookieJar::new();

    let response = auth.oauth_round_trip("idp", "sub-42", &mut jar).await;

    assert_redirects_to(&response, TEST_BASE_URL);
    assert_cookie_cleared(&response, "authgate.nonce");
    assert!(jar.contains(SESSION));
    assert_eq!(auth.client.userinfo_calls(), 0);
    assert_eq!(auth.client.jwks_calls(), 1);
}

#[actix_web::test]
async fn test_callback_url_survives_the_round_trip() {
    let auth = TestAuth::builder().oauth("github").build();
    let mut jar = CookieJar::new();

    let request = auth.sign_in_request(&mut jar).form("callbackUrl", "/dashboard").build();
    let started = auth.orchestrator.handle_sign_in("github", &request).await;
    assert_cookie_set(&started, "authgate.callback-url");
    jar.apply(&started.cookies);
    let authorization = redirect_params(&started);

    let response = auth.callback("github", &authorization, &mut jar).await;
    assert_redirects_to(&response, "https://app.example.com/dashboard");
    assert_cookie_cleared(&response, "authgate.callback-url");
}

#[actix_web::test]
async fn test_foreign_callback_url_is_ignored() {
    let auth = TestAuth::builder().oauth("github").build();
    let request = auth
        .sign_in_request(&mut CookieJar::new())
        .form("callbackUrl", "https://evil.example.net/")
        .build();
    let started = auth.orchestrator.handle_sign_in("github", &request).await;
    assert!(started.cookie("authgate.callback-url").is_none());
}

#[actix_web::test]
async fn test_pkce_verifier_is_forwarded() {
    let auth = TestAuth::builder().oauth("github").build();
    let mut jar = CookieJar::new();

    let authorization = auth.start_sign_in("github", &mut jar).await;
    assert_eq!(authorization.get("code_challenge_method").map(String::as_str), Some("S256"));
    auth.callback("github", &authorization, &mut jar).await;

    let request = auth.client.last_token_request().expect("token request");
    let verifier = request.code_verifier.expect("verifier sent");
    let challenge = general_purpose::URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
    assert_eq!(authorization.get("code_challenge"), Some(&challenge));
    assert_eq!(request.redirect_uri, "https://app.example.com/auth/callback/github");
}

// Check failures

#[actix_web::test]
async fn test_replayed_callback_is_rejected() {
    let auth = TestAuth::builder().oauth("github").build();
    let mut jar = CookieJar::new();

    let authorization = auth.start_sign_in("github", &mut jar).await;
    let first = auth.callback("github", &authorization, &mut jar).await;
    assert_eq!(first.error, None);

    jar.remove(SESSION);
    let second = auth.callback("github", &authorization, &mut jar).await;
    assert_auth_error(&second, ErrorKind::OAuthCallbackError, SIGN_IN_PAGE);
    assert_eq!(auth.client.exchange_calls(), 1);
}

#[actix_web::test]
async fn test_missing_check_cookie_prevents_exchange() {
    let auth = TestAuth::builder().oauth("github").build();
    let mut jar = CookieJar::new();

    let authorization = auth.start_sign_in("github", &mut jar).await;
    jar.remove("authgate.pkce.code_verifier");
    let response = auth.callback("github", &authorization, &mut jar).await;

    assert_auth_error(&response, ErrorKind::OAuthCallbackError, SIGN_IN_PAGE);
    assert_eq!(auth.client.exchange_calls(), 0);
    assert!(response.cookie(SESSION).is_none());
    assert_cookie_cleared(&response, "authgate.state");
}

#[actix_web::test]
async fn test_tampered_state_is_rejected() {
    let auth = TestAuth::builder().oauth("github").build();
    let mut jar = CookieJar::new();

    let mut authorization = auth.start_sign_in("github", &mut jar).await;
    authorization.insert("state".into(), "tampered".into());
    let response = auth.callback("github", &authorization, &mut jar).await;

    assert_auth_error(&response, ErrorKind::OAuthCallbackError, SIGN_IN_PAGE);
    assert_eq!(auth.client.exchange_calls(), 0);
}

#[actix_web::test]
async fn test_provider_error_parameter() {
    let auth = TestAuth::builder().oauth("github").build();
    let mut jar = CookieJar::new();

    let authorization = auth.start_sign_in("github", &mut jar).await;
    let request = RequestBuilder::get()
        .query("error", "access_denied")
        .query("state", &authorization["state"])
        .jar(&jar)
        .build();
    let response = auth.orchestrator.handle_callback("github", &request).await;

    assert_auth_error(&response, ErrorKind::OAuthCallbackError, SIGN_IN_PAGE);
    assert_eq!(auth.client.exchange_calls(), 0);
}

#[actix_web::test]
async fn test_token_endpoint_failure() {
    let auth = TestAuth::builder().oauth("github").build();
    auth.client.fail_exchange(ExchangeError::TokenEndpoint {
        status: 400,
        body: "invalid_grant".into(),
    });
    let mut jar = CookieJar::new();

    let authorization = auth.start_sign_in("github", &mut jar).await;
    let response = auth.callback("github", &authorization, &mut jar).await;

    assert_auth_error(&response, ErrorKind::OAuthCallbackError, SIGN_IN_PAGE);
    assert!(!redirect_params(&response).values().any(|v| v.contains("invalid_grant")));
    assert_eq!(auth.adapter.user_count().await, 0);
}

#[actix_web::test]
async fn test_nonce_mismatch_is_rejected() {
    let auth = TestAuth::builder().oidc("idp").build();
    let mut jar = CookieJar::new();

    let authorization = auth.start_sign_in("idp", &mut jar).await;
    auth.client.set_id_token(TestFixtures::sign_es256(
        &TestFixtures::id_token_claims("sub-1", Some("someone-elses-nonce")),
        Some(TEST_EC_KID),
    ));
    let response = auth.callback("idp", &authorization, &mut jar).await;

    assert_auth_error(&response, ErrorKind::OAuthCallbackError, SIGN_IN_PAGE);
    assert_eq!(auth.adapter.user_count().await, 0);
}

#[actix_web::test]
async fn test_unknown_provider() {
    let auth = TestAuth::builder().oauth("github").build();
    let response = auth
        .orchestrator
        .handle_callback("gitlab", &RequestBuilder::get().query("code", "c").build())
        .await;
    assert_auth_error(&response, ErrorKind::MissingProvider, ERROR_PAGE);
    assert_eq!(response.status, 500);
}

// Redirect proxy

#[actix_web::test]
async fn test_redirect_proxy_forwards_to_originating_deployment() {
    let app = TestAuth::builder()
        .oauth("github")
        .configure(|s| s.application.redirect_proxy_url = Some("https://proxy.example.com/auth".into()))
        .build();
    let proxy = TestAuth::builder()
        .oauth("github")
        .configure(|s| s.application.base_url = "https://proxy.example.com".into())
        .build();
    let mut jar = CookieJar::new();

    let authorization = app.start_sign_in("github", &mut jar).await;
    assert_eq!(
        authorization.get("redirect_uri").map(String::as_str),
        Some("https://proxy.example.com/auth/callback/github")
    );

    let bounced = proxy
        .orchestrator
        .handle_callback(
            "github",
            &RequestBuilder::get()
                .query("code", "auth-code")
                .query("state", &authorization["state"])
                .build(),
        )
        .await;
    assert_eq!(bounced.error, None);
    assert!(bounced.redirect.starts_with("https://app.example.com/auth/callback/github?"));
    assert_eq!(proxy.client.exchange_calls(), 0);

    let response = app
        .orchestrator
        .handle_callback("github", &RequestBuilder::get().query_from_url(&bounced.redirect).jar(&jar).build())
        .await;
    assert_redirects_to(&response, TEST_BASE_URL);
    assert_eq!(
        app.client.last_token_request().map(|r| r.redirect_uri).as_deref(),
        Some("https://proxy.example.com/auth/callback/github")
    );
}

#[actix_web::test]
async fn test_state_from_another_origin_is_rejected() {
    let proxy_url = Some("https://proxy.example.com/auth".to_string());
    let app = TestAuth::builder()
        .oauth("github")
        .configure(|s| s.application.redirect_proxy_url.clone_from(&proxy_url))
        .build();
    let other = TestAuth::builder()
        .oauth("github")
        .configure(|s| {
            s.application.base_url = "https://other.example.com".into();
            s.application.redirect_proxy_url.clone_from(&proxy_url);
        })
        .build();
    let mut jar = CookieJar::new();

    let authorization = app.start_sign_in("github", &mut jar).await;
    let response = other.callback("github", &authorization, &mut jar).await;

    assert_eq!(response.error, Some(ErrorKind::OAuthCallbackError));
    assert!(response.redirect.starts_with("https://other.example.com/auth/signin"));
    assert_eq!(other.client.exchange_calls(), 0);
}

// Account linking

#[actix_web::test]
async fn test_same_email_on_two_providers_creates_two_users() {
    let auth = TestAuth::builder().oauth("github").oauth("gitlab").build();

    for (provider, subject) in [("github", "gh-1"), ("gitlab", "gl-1")] {
        let mut jar = CookieJar::new();
        let authorization = auth.start_sign_in(provider, &mut jar).await;
        auth.client
            .set_userinfo(json!({"id": subject, "email": "shared@example.com"}));
        let response = auth.callback(provider, &authorization, &mut jar).await;
        assert_eq!(response.error, None);
    }

    assert_eq!(auth.adapter.user_count().await, 2);
}

#[actix_web::test]
async fn test_dangerous_email_linking_joins_existing_user() {
    let mut linking = TestFixtures::oauth_provider();
    linking.allow_dangerous_email_account_linking = true;
    let auth = TestAuth::builder()
        .oauth("github")
        .provider(TestFixtures::provider("gitlab", ProviderKind::OAuth(linking)))
        .build();

    for (provider, subject) in [("github", "gh-1"), ("gitlab", "gl-1")] {
        let mut jar = CookieJar::new();
        let authorization = auth.start_sign_in(provider, &mut jar).await;
        auth.client
            .set_userinfo(json!({"id": subject, "email": "shared@example.com"}));
        auth.callback(provider, &authorization, &mut jar).await;
    }

    assert_eq!(auth.adapter.user_count().await, 1);
    let user = auth
        .adapter
        .get_user_by_email("shared@example.com")
        .await
        .unwrap()
        .expect("user");
    assert_eq!(auth.adapter.accounts_for(&user.id).await.len(), 2);
}

#[actix_web::test]
async fn test_signed_in_user_links_a_second_provider() {
    let auth = TestAuth::builder().oauth("github").oauth("gitlab").build();
    let mut jar = CookieJar::new();

    auth.oauth_round_trip("github", "gh-1", &mut jar).await;
    let response = auth.oauth_round_trip("gitlab", "gl-1", &mut jar).await;
    assert_eq!(response.error, None);

    assert_eq!(auth.adapter.user_count().await, 1);
    let owner = auth.adapter.get_user_by_account("gitlab", "gl-1").await.unwrap().expect("linked");
    let original = auth.adapter.get_user_by_account("github", "gh-1").await.unwrap().expect("user");
    assert_eq!(owner.id, original.id);
}

#[actix_web::test]
async fn test_account_owned_by_another_user_is_not_linked() {
    let auth = TestAuth::builder().oauth("github").oauth("gitlab").build();

    let mut first = CookieJar::new();
    auth.oauth_round_trip("github", "gh-1", &mut first).await;

    let mut second = CookieJar::new();
    auth.oauth_round_trip("gitlab", "gl-2", &mut second).await;
    let response = auth.oauth_round_trip("github", "gh-1", &mut second).await;

    assert_auth_error(&response, ErrorKind::OAuthAccountNotLinked, SIGN_IN_PAGE);
    assert_eq!(auth.adapter.user_count().await, 2);
}

// Policy hook

#[actix_web::test]
async fn test_policy_denial_writes_nothing() {
    let auth = with_policy(Ok(SignInDecision::Deny));
    let mut jar = CookieJar::new();

    let response = auth.oauth_round_trip("github", "gh-1", &mut jar).await;

    assert_auth_error(&response, ErrorKind::AccessDenied, ERROR_PAGE);
    assert_eq!(response.status, 403);
    assert!(!jar.contains(SESSION));
    assert_eq!(auth.adapter.user_count().await, 0);
}

#[actix_web::test]
async fn test_policy_failure() {
    let auth = with_policy(Err("policy service down"));
    let mut jar = CookieJar::new();

    let response = auth.oauth_round_trip("github", "gh-1", &mut jar).await;

    assert_auth_error(&response, ErrorKind::AuthorizedCallbackError, ERROR_PAGE);
    assert_eq!(response.status, 500);
    assert!(!response.redirect.contains("policy"));
    assert_eq!(auth.adapter.user_count().await, 0);
}

#[actix_web::test]
async fn test_policy_redirect_skips_session() {
    let auth = with_policy(Ok(SignInDecision::Redirect("/request-access".into())));
    let mut jar = CookieJar::new();

    let response = auth.oauth_round_trip("github", "gh-1", &mut jar).await;

    assert_redirects_to(&response, "https://app.example.com/request-access");
    assert!(response.cookie(SESSION).is_none());
    assert_eq!(auth.adapter.user_count().await, 0);
}

#[actix_web::test]
async fn test_new_user_page() {
    let auth = TestAuth::builder()
        .oauth("github")
        .configure(|s| s.pages.new_user = Some("/welcome".into()))
        .build();

    let mut jar = CookieJar::new();
    let first = auth.oauth_round_trip("github", "gh-1", &mut jar).await;
    assert!(first.redirect.starts_with("https://app.example.com/welcome?"));
    assert_eq!(redirect_params(&first).get("callbackUrl").map(String::as_str), Some(TEST_BASE_URL));

    let mut jar = CookieJar::new();
    let again = auth.oauth_round_trip("github", "gh-1", &mut jar).await;
    assert_redirects_to(&again, TEST_BASE_URL);
}

#[actix_web::test]
async fn test_events_are_delivered() {
    let auth = TestAuth::builder().oauth("github").build();
    let mut jar = CookieJar::new();

    auth.oauth_round_trip("github", "gh-1", &mut jar).await;

    assert!(auth.events.wait_for("signIn", 1).await);
    assert!(auth.events.wait_for("linkAccount", 1).await);
    assert!(auth.events.wait_for("createUser", 1).await);
    assert_eq!(auth.events.count("createUser"), 1);
}

#[actix_web::test]
async fn test_failing_redirect_hook_issues_no_session() {
    let auth = TestAuth::builder()
        .oauth("github")
        .strategy(SessionStrategy::Database)
        .callbacks(Arc::new(FailingRedirect))
        .build();
    let mut jar = CookieJar::new();

    let response = auth.oauth_round_trip("github", "gh-1", &mut jar).await;

    assert_auth_error(&response, ErrorKind::CallbackRouteError, ERROR_PAGE);
    assert!(!jar.contains(SESSION));
    assert_eq!(auth.adapter.session_count().await, 0);
    assert!(!auth.events.wait_for("signIn", 1).await);
}

// Credentials

fn credentials() -> TestAuth {
    TestAuth::builder()
        .credentials(
            "password",
            MockAuthorizer::new().with_user("alice", "wonderland", TestFixtures::default_user()),
        )
        .configure(|s| s.security.csrf_check = false)
        .build()
}

#[actix_web::test]
async fn test_credentials_rejected() {
    let auth = credentials();
    let request = RequestBuilder::post()
        .form("username", "alice")
        .form("password", "guess")
        .build();

    let response = auth.orchestrator.handle_callback("password", &request).await;

    assert_auth_error(&response, ErrorKind::CredentialsSignin, SIGN_IN_PAGE);
    assert_eq!(response.status, 401);
    assert_eq!(redirect_params(&response).get("provider").map(String::as_str), Some("password"));
    assert!(response.cookie(SESSION).is_none());
}

#[actix_web::test]
async fn test_credentials_accepted() {
    let auth = credentials();
    let request = RequestBuilder::post()
        .form("username", "alice")
        .form("password", "wonderland")
        .form("callbackUrl", "/home")
        .build();

    let response = auth.orchestrator.handle_callback("password", &request).await;

    assert_redirects_to(&response, "https://app.example.com/home");
    assert_cookie_set(&response, SESSION);
    assert_eq!(auth.adapter.user_count().await, 0);
}

#[actix_web::test]
async fn test_credentials_require_post() {
    let auth = credentials();
    let request = RequestBuilder::get()
        .query("username", "alice")
        .query("password", "wonderland")
        .build();

    let response = auth.orchestrator.handle_callback("password", &request).await;
    assert_auth_error(&response, ErrorKind::CallbackRouteError, ERROR_PAGE);
}

#[actix_web::test]
async fn test_credentials_authorizer_failure() {
    let auth = TestAuth::builder()
        .credentials("password", MockAuthorizer::failing())
        .configure(|s| s.security.csrf_check = false)
        .build();
    let request = RequestBuilder::post().form("username", "alice").form("password", "x").build();

    let response = auth.orchestrator.handle_callback("password", &request).await;
    assert_auth_error(&response, ErrorKind::CallbackRouteError, ERROR_PAGE);
    assert!(!response.redirect.contains("unavailable"));
}

#[actix_web::test]
async fn test_credentials_need_csrf_token() {
    let auth = TestAuth::builder()
        .credentials(
            "password",
            MockAuthorizer::new().with_user("alice", "wonderland", TestFixtures::default_user()),
        )
        .build();

    let missing = auth
        .orchestrator
        .handle_callback(
            "password",
            &RequestBuilder::post()
                .form("username", "alice")
                .form("password", "wonderland")
                .build(),
        )
        .await;
    assert_auth_error(&missing, ErrorKind::MissingCsrf, SIGN_IN_PAGE);

    let csrf = auth.orchestrator.csrf_token(&RequestBuilder::get().build());
    let cookie = csrf.cookie.expect("fresh token sets a cookie");
    let accepted = auth
        .orchestrator
        .handle_callback(
            "password",
            &RequestBuilder::post()
                .cookie(cookie.name(), cookie.value())
                .form("csrfToken", &csrf.csrf_token)
                .form("username", "alice")
                .form("password", "wonderland")
                .build(),
        )
        .await;
    assert_eq!(accepted.error, None);
}

// Email links

fn email() -> TestAuth {
    TestAuth::builder()
        .email("email")
        .configure(|s| s.security.csrf_check = false)
        .build()
}

#[actix_web::test]
async fn test_email_link_signs_in_once() {
    let auth = email();

    let sent = auth
        .orchestrator
        .handle_sign_in("email", &RequestBuilder::post().form("email", " Sam@Example.COM ").build())
        .await;
    assert_redirects_to(&sent, "https://app.example.com/auth/verify-request");
    assert_eq!(auth.email.sent()[0].identifier, "sam@example.com");

    let link = auth.email.last_url().expect("link sent");
    assert!(link.starts_with("https://app.example.com/auth/callback/email?"));
    let request = RequestBuilder::get().query_from_url(&link).build();

    let first = auth.orchestrator.handle_callback("email", &request).await;
    assert_eq!(first.error, None);
    assert_cookie_set(&first, SESSION);
    let user = auth
        .adapter
        .get_user_by_email("sam@example.com")
        .await
        .unwrap()
        .expect("created");
    assert!(user.email_verified.is_some());

    let second = auth.orchestrator.handle_callback("email", &request).await;
    assert_auth_error(&second, ErrorKind::Verification, SIGN_IN_PAGE);
}

#[actix_web::test]
async fn test_expired_email_token() {
    let auth = email();
    auth.adapter
        .create_verification_token(VerificationToken {
            identifier: "sam@example.com".into(),
            token: hash_token("stale", TEST_SECRET),
            expires: chrono::Utc::now() - chrono::Duration::minutes(1),
        })
        .await
        .unwrap();

    let response = auth
        .orchestrator
        .handle_callback(
            "email",
            &RequestBuilder::get()
                .query("token", "stale")
                .query("email", "sam@example.com")
                .build(),
        )
        .await;

    assert_auth_error(&response, ErrorKind::Verification, SIGN_IN_PAGE);
    assert_eq!(auth.adapter.user_count().await, 0);
}

#[actix_web::test]
async fn test_invalid_email_address() {
    let auth = email();
    let response = auth
        .orchestrator
        .handle_sign_in("email", &RequestBuilder::post().form("email", "not-an-address").build())
        .await;

    assert_auth_error(&response, ErrorKind::Verification, SIGN_IN_PAGE);
    assert!(auth.email.sent().is_empty());
}

// Builder validation

#[test]
fn test_database_sessions_need_an_adapter() {
    let result = TestAuth::builder()
        .oauth("github")
        .strategy(SessionStrategy::Database)
        .without_adapter()
        .try_build();
    assert!(result.is_err());
}

#[test]
fn test_credentials_with_database_sessions_are_rejected() {
    let err = TestAuth::builder()
        .credentials("password", MockAuthorizer::new())
        .strategy(SessionStrategy::Database)
        .try_build()
        .err()
        .expect("rejected");
    assert!(err.to_string().contains("UnsupportedStrategy"));
}

#[test]
fn test_email_needs_an_adapter() {
    assert!(TestAuth::builder().email("email").without_adapter().try_build().is_err());
}

#[test]
fn test_oidc_provider_without_issuer_is_rejected() {
    let mut oidc = TestFixtures::oidc_provider();
    oidc.issuer = None;
    let err = TestAuth::builder()
        .provider(TestFixtures::provider("idp", ProviderKind::Oidc(oidc)))
        .try_build()
        .err()
        .expect("rejected");
    assert!(err.to_string().contains("issuer"));
}

#[test]
fn test_oauth_provider_without_userinfo_is_rejected() {
    let mut oauth = TestFixtures::oauth_provider();
    oauth.userinfo_endpoint = None;
    let result = TestAuth::builder()
        .provider(TestFixtures::provider("github", ProviderKind::OAuth(oauth)))
        .try_build();
    assert!(result.is_err());
}
