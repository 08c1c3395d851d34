use actix_web::cookie::Cookie;
use actix_web::{test, web, App};

use super::configure;
use crate::testing::fixtures::TestFixtures;
use crate::testing::mock::MockAuthorizer;
use crate::testing::TestAuth;

fn deployment() -> TestAuth {
    TestAuth::builder()
        .oauth("github")
        .credentials(
            "password",
            MockAuthorizer::new().with_user("alice", "wonderland", TestFixtures::default_user()),
        )
        .configure(|s| s.security.csrf_check = false)
        .build()
}

macro_rules! app {
    ($auth:expr) => {{
        let TestAuth {
            orchestrator, settings, ..
        } = $auth;
        test::init_service(
            App::new()
                .app_data(web::Data::new(orchestrator))
                .app_data(web::Data::new(settings))
                .configure(|cfg| configure(cfg, "/auth")),
        )
        .await
    }};
}

fn location(response: &actix_web::dev::ServiceResponse) -> String {
    response
        .headers()
        .get("Location")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

#[actix_web::test]
async fn test_health() {
    let app = app!(deployment());
    let response = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
    assert!(response.status().is_success());
}

#[actix_web::test]
async fn test_oauth_sign_in_redirects_to_provider() {
    let app = app!(deployment());
    let response = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/auth/signin/github")
            .set_form([("callbackUrl", "/dashboard")])
            .to_request(),
    )
    .await;

    assert_eq!(response.status().as_u16(), 302);
    assert!(location(&response).starts_with("https://idp.example.com/authorize?"));
    let names: Vec<String> = response.response().cookies().map(|c| c.name().to_string()).collect();
    assert!(names.contains(&"authgate.state".to_string()));
    assert!(names.contains(&"authgate.pkce.code_verifier".to_string()));
    assert!(names.contains(&"authgate.callback-url".to_string()));
}

#[actix_web::test]
async fn test_oauth_sign_in_needs_csrf_token() {
    let app = app!(TestAuth::builder().oauth("github").build());

    let link = test::call_service(&app, test::TestRequest::get().uri("/auth/signin/github").to_request()).await;
    assert!(!link.status().is_redirection());

    let forged = test::call_service(&app, test::TestRequest::post().uri("/auth/signin/github").to_request()).await;
    assert_eq!(location(&forged), "https://app.example.com/auth/signin?error=MissingCSRF");
    assert!(forged.response().cookies().all(|c| c.name() != "authgate.state"));

    let issued = test::call_service(&app, test::TestRequest::get().uri("/auth/csrf").to_request()).await;
    let cookie = issued
        .response()
        .cookies()
        .find(|c| c.name() == "authgate.csrf-token")
        .map(|c| c.value().to_string())
        .expect("csrf cookie");
    let body: serde_json::Value = test::read_body_json(issued).await;
    let token = body["csrfToken"].as_str().unwrap().to_string();

    let started = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/auth/signin/github")
            .cookie(Cookie::new("authgate.csrf-token", cookie))
            .set_form([("csrfToken", token.as_str())])
            .to_request(),
    )
    .await;
    assert!(location(&started).starts_with("https://idp.example.com/authorize?"));
}

#[actix_web::test]
async fn test_callback_without_checks_is_rendered_as_redirect() {
    let app = app!(deployment());
    let response = test::call_service(
        &app,
        test::TestRequest::get()
            .uri("/auth/callback/github?code=abc&state=forged")
            .to_request(),
    )
    .await;

    assert_eq!(response.status().as_u16(), 302);
    assert_eq!(
        location(&response),
        "https://app.example.com/auth/signin?error=OAuthCallbackError"
    );
}

#[actix_web::test]
async fn test_unknown_provider() {
    let app = app!(deployment());
    let response = test::call_service(
        &app,
        test::TestRequest::get().uri("/auth/callback/nope").to_request(),
    )
    .await;
    assert_eq!(location(&response), "https://app.example.com/auth/error?error=MissingProvider");
}

#[actix_web::test]
async fn test_credentials_form_post() {
    let app = app!(deployment());

    let rejected = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/auth/callback/password")
            .set_form([("username", "alice"), ("password", "wrong")])
            .to_request(),
    )
    .await;
    assert_eq!(rejected.status().as_u16(), 302);
    assert_eq!(
        location(&rejected),
        "https://app.example.com/auth/signin?error=CredentialsSignin&provider=password"
    );
    assert!(rejected.response().cookies().all(|c| c.name() != "authgate.session-token"));

    let accepted = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/auth/callback/password")
            .set_form([("username", "alice"), ("password", "wonderland")])
            .to_request(),
    )
    .await;
    assert!(location(&accepted).starts_with("https://app.example.com"));
    let session = accepted
        .response()
        .cookies()
        .find(|c| c.name() == "authgate.session-token")
        .map(|c| c.value().to_string())
        .expect("session cookie");

    let read = test::call_service(
        &app,
        test::TestRequest::get()
            .uri("/auth/session")
            .cookie(Cookie::new("authgate.session-token", session))
            .to_request(),
    )
    .await;
    let body: serde_json::Value = test::read_body_json(read).await;
    assert_eq!(body["user"]["email"], "test@example.com");
}

#[actix_web::test]
async fn test_session_is_null_when_signed_out() {
    let app = app!(deployment());
    let response = test::call_service(&app, test::TestRequest::get().uri("/auth/session").to_request()).await;
    let body: serde_json::Value = test::read_body_json(response).await;
    assert!(body.is_null());
}

#[actix_web::test]
async fn test_csrf_endpoint_sets_cookie() {
    let app = app!(deployment());
    let response = test::call_service(&app, test::TestRequest::get().uri("/auth/csrf").to_request()).await;
    let cookie = response
        .response()
        .cookies()
        .find(|c| c.name() == "authgate.csrf-token")
        .map(|c| c.value().to_string())
        .expect("csrf cookie");
    let body: serde_json::Value = test::read_body_json(response).await;
    let token = body["csrfToken"].as_str().unwrap();
    assert!(cookie.starts_with(token));
}

#[actix_web::test]
async fn test_sign_in_page_lists_providers() {
    let app = app!(deployment());
    let response = test::call_service(&app, test::TestRequest::get().uri("/auth/signin").to_request()).await;
    assert!(response.status().is_success());
    let body = String::from_utf8(test::read_body(response).await.to_vec()).unwrap();
    assert!(body.contains("/auth/signin/github"));
    assert!(body.contains("/auth/callback/password"));
}
