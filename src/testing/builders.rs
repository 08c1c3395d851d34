//! Fluent builder for fully wired test deployments
//!
//! Every deployment gets an in-memory adapter, a mock provider client that
//! already serves the fixture JWKS, a recording email sender and a
//! recording event handler.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use url::Url;

use super::constants::TEST_EC_KID;
use super::fixtures::TestFixtures;
use super::mock::{MockAuthorizer, MockEmailSender, MockOAuthClient, RecordingEvents};
use super::requests::{CookieJar, RequestBuilder};
use crate::adapter::{Adapter, MemoryAdapter};
use crate::callbacks::AuthCallbacks;
use crate::events::EventHandler;
use crate::oauth::OAuthClient;
use crate::orchestrator::{AuthResponse, CallbackOrchestrator};
use crate::providers::{EmailSender, Provider, ProviderKind};
use crate::settings::{AuthSettings, SessionStrategy};

/// A test deployment and handles on its fakes
pub struct TestAuth {
    pub orchestrator: CallbackOrchestrator,
    pub settings: AuthSettings,
    pub adapter: Arc<MemoryAdapter>,
    pub client: Arc<MockOAuthClient>,
    pub email: Arc<MockEmailSender>,
    pub events: Arc<RecordingEvents>,
}

impl TestAuth {
    #[must_use]
    pub fn builder() -> TestAuthBuilder {
        TestAuthBuilder::new()
    }

    /// Start an OAuth/OIDC sign-in, storing the check cookies in `jar`
    ///
    /// Returns the authorization URL's query parameters.
    ///
    /// # Panics
    ///
    /// Panics if the response is not a redirect to a parsable URL
    pub async fn start_sign_in(&self, provider_id: &str, jar: &mut CookieJar) -> HashMap<String, String> {
        let request = self.sign_in_request(jar).build();
        let response = self.orchestrator.handle_sign_in(provider_id, &request).await;
        assert_eq!(response.error, None, "sign-in failed: {}", response.redirect);
        jar.apply(&response.cookies);
        Url::parse(&response.redirect)
            .expect("authorization URL")
            .query_pairs()
            .into_owned()
            .collect()
    }

    /// A sign-in form post carrying the CSRF token, as the sign-in page
    /// submits it; the token cookie is added to `jar`
    pub fn sign_in_request(&self, jar: &mut CookieJar) -> RequestBuilder {
        let csrf = self
            .orchestrator
            .csrf_token(&RequestBuilder::get().jar(jar).build());
        if let Some(cookie) = csrf.cookie {
            jar.apply(&[cookie]);
        }
        RequestBuilder::post().jar(jar).form("csrfToken", &csrf.csrf_token)
    }

    /// Deliver the provider callback for a started sign-in
    pub async fn callback(
        &self,
        provider_id: &str,
        authorization: &HashMap<String, String>,
        jar: &mut CookieJar,
    ) -> AuthResponse {
        let mut request = RequestBuilder::get().query("code", "auth-code").jar(jar);
        if let Some(state) = authorization.get("state") {
            request = request.query("state", state);
        }
        let response = self.orchestrator.handle_callback(provider_id, &request.build()).await;
        jar.apply(&response.cookies);
        response
    }

    /// Full OAuth/OIDC round trip for a provider subject
    ///
    /// OIDC providers get a signed ID token for `subject` that echoes the
    /// nonce; OAuth providers get a userinfo response with `subject` as id.
    pub async fn oauth_round_trip(&self, provider_id: &str, subject: &str, jar: &mut CookieJar) -> AuthResponse {
        let authorization = self.start_sign_in(provider_id, jar).await;
        if authorization.contains_key("nonce") || authorization.get("scope").is_some_and(|s| s.contains("openid")) {
            self.client.set_id_token(TestFixtures::sign_es256(
                &TestFixtures::id_token_claims(subject, authorization.get("nonce").map(String::as_str)),
                Some(TEST_EC_KID),
            ));
        } else {
            self.client.set_userinfo(json!({
                "id": subject,
                "email": format!("{subject}@example.com"),
                "name": subject,
            }));
        }
        self.callback(provider_id, &authorization, jar).await
    }
}

/// Builder for [`TestAuth`]
pub struct TestAuthBuilder {
    settings: AuthSettings,
    providers: Vec<Provider>,
    email_providers: Vec<String>,
    callbacks: Option<Arc<dyn AuthCallbacks>>,
    with_adapter: bool,
}

impl Default for TestAuthBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestAuthBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            settings: TestFixtures::settings(),
            providers: Vec::new(),
            email_providers: Vec::new(),
            callbacks: None,
            with_adapter: true,
        }
    }

    #[must_use]
    pub fn oauth(mut self, id: &str) -> Self {
        self.providers
            .push(TestFixtures::provider(id, ProviderKind::OAuth(TestFixtures::oauth_provider())));
        self
    }

    #[must_use]
    pub fn oidc(mut self, id: &str) -> Self {
        self.providers
            .push(TestFixtures::provider(id, ProviderKind::Oidc(TestFixtures::oidc_provider())));
        self
    }

    /// Register an arbitrary provider
    #[must_use]
    pub fn provider(mut self, provider: Provider) -> Self {
        self.providers.push(provider);
        self
    }

    /// An email provider sending through [`TestAuth::email`]
    #[must_use]
    pub fn email(mut self, id: &str) -> Self {
        self.email_providers.push(id.to_string());
        self
    }

    #[must_use]
    pub fn credentials(mut self, id: &str, authorizer: MockAuthorizer) -> Self {
        self.providers.push(Provider::credentials(id, Arc::new(authorizer)));
        self
    }

    #[must_use]
    pub fn strategy(mut self, strategy: SessionStrategy) -> Self {
        self.settings.session.strategy = strategy;
        self
    }

    #[must_use]
    pub fn callbacks(mut self, callbacks: Arc<dyn AuthCallbacks>) -> Self {
        self.callbacks = Some(callbacks);
        self
    }

    #[must_use]
    pub fn without_adapter(mut self) -> Self {
        self.with_adapter = false;
        self
    }

    /// Adjust the settings directly
    #[must_use]
    pub fn configure(mut self, f: impl FnOnce(&mut AuthSettings)) -> Self {
        f(&mut self.settings);
        self
    }

    /// # Errors
    ///
    /// Whatever the orchestrator builder rejects
    pub fn try_build(self) -> anyhow::Result<TestAuth> {
        let adapter = Arc::new(MemoryAdapter::new());
        let client = Arc::new(MockOAuthClient::default());
        client.set_jwks(vec![TestFixtures::ec_jwk()]);
        let email = Arc::new(MockEmailSender::default());
        let events = Arc::new(RecordingEvents::default());

        let mut builder = CallbackOrchestrator::builder(&self.settings)
            .oauth_client(client.clone() as Arc<dyn OAuthClient>)
            .email_sender(email.clone() as Arc<dyn EmailSender>)
            .events(events.clone() as Arc<dyn EventHandler>);
        if self.with_adapter {
            builder = builder.adapter(adapter.clone() as Arc<dyn Adapter>);
        }
        if let Some(callbacks) = self.callbacks {
            builder = builder.callbacks(callbacks);
        }
        for provider in self.providers {
            builder = builder.provider(provider);
        }
        for id in &self.email_providers {
            builder = builder.provider(Provider::email(
                id,
                email.clone() as Arc<dyn EmailSender>,
                chrono::Duration::hours(24),
            ));
        }

        Ok(TestAuth {
            orchestrator: builder.build()?,
            settings: self.settings,
            adapter,
            client,
            email,
            events,
        })
    }

    /// # Panics
    ///
    /// Panics if the configuration is rejected
    #[must_use]
    pub fn build(self) -> TestAuth {
        self.try_build().expect("test deployment builds")
    }
}
