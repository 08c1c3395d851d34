//! Mock objects and fake implementations for testing
//!
//! Stand-ins for the provider HTTP client and the caller-supplied
//! integrations, each recording how it was used.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{ExchangeError, HookError};
use crate::events::{AuthEvent, EventHandler, SignInEvent, SignOutEvent};
use crate::models::{Account, SessionView, User};
use crate::oauth::{JsonWebKey, JsonWebKeySet, OAuthClient, TokenRequest, TokenResponse};
use crate::orchestrator::AuthRequest;
use crate::providers::{CredentialsAuthorizer, EmailSender, VerificationRequest};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

struct ClientState {
    token_response: TokenResponse,
    exchange_error: Option<ExchangeError>,
    userinfo: Value,
    jwks: Vec<JsonWebKey>,
    last_token_request: Option<TokenRequest>,
}

/// Provider endpoints answered from memory
pub struct MockOAuthClient {
    state: Mutex<ClientState>,
    exchange_calls: AtomicUsize,
    userinfo_calls: AtomicUsize,
    jwks_calls: AtomicUsize,
}

impl Default for MockOAuthClient {
    fn default() -> Self {
        Self {
            state: Mutex::new(ClientState {
                token_response: TokenResponse {
                    access_token: "mock-access-token".to_string(),
                    refresh_token: Some("mock-refresh-token".to_string()),
                    id_token: None,
                    token_type: Some("Bearer".to_string()),
                    expires_in: Some(3600),
                    scope: None,
                },
                exchange_error: None,
                userinfo: json!({"id": "mock-user", "email": "mock@example.com", "name": "Mock User"}),
                jwks: Vec::new(),
                last_token_request: None,
            }),
            exchange_calls: AtomicUsize::new(0),
            userinfo_calls: AtomicUsize::new(0),
            jwks_calls: AtomicUsize::new(0),
        }
    }
}

impl MockOAuthClient {
    pub fn set_userinfo(&self, userinfo: Value) {
        lock(&self.state).userinfo = userinfo;
    }

    /// Return `id_token` from the token endpoint
    pub fn set_id_token(&self, id_token: String) {
        lock(&self.state).token_response.id_token = Some(id_token);
    }

    pub fn set_jwks(&self, keys: Vec<JsonWebKey>) {
        lock(&self.state).jwks = keys;
    }

    /// Make every token request fail with `error`
    pub fn fail_exchange(&self, error: ExchangeError) {
        lock(&self.state).exchange_error = Some(error);
    }

    #[must_use]
    pub fn last_token_request(&self) -> Option<TokenRequest> {
        lock(&self.state).last_token_request.clone()
    }

    #[must_use]
    pub fn exchange_calls(&self) -> usize {
        self.exchange_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn userinfo_calls(&self) -> usize {
        self.userinfo_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn jwks_calls(&self) -> usize {
        self.jwks_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OAuthClient for MockOAuthClient {
    async fn exchange_code(&self, request: &TokenRequest) -> Result<TokenResponse, ExchangeError> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = lock(&self.state);
        state.last_token_request = Some(request.clone());
        match &state.exchange_error {
            Some(error) => Err(error.clone()),
            None => Ok(state.token_response.clone()),
        }
    }

    async fn fetch_userinfo(&self, _endpoint: &str, _access_token: &str) -> Result<Value, ExchangeError> {
        self.userinfo_calls.fetch_add(1, Ordering::SeqCst);
        Ok(lock(&self.state).userinfo.clone())
    }

    async fn fetch_jwks(&self, _jwks_uri: &str) -> Result<JsonWebKeySet, ExchangeError> {
        self.jwks_calls.fetch_add(1, Ordering::SeqCst);
        Ok(JsonWebKeySet {
            keys: lock(&self.state).jwks.clone(),
        })
    }
}

/// Email sender that keeps every request instead of sending it
#[derive(Default)]
pub struct MockEmailSender {
    sent: Mutex<Vec<VerificationRequest>>,
}

impl MockEmailSender {
    #[must_use]
    pub fn sent(&self) -> Vec<VerificationRequest> {
        lock(&self.sent).clone()
    }

    /// URL of the most recent sign-in link
    #[must_use]
    pub fn last_url(&self) -> Option<String> {
        lock(&self.sent).last().map(|r| r.url.clone())
    }
}

#[async_trait]
impl EmailSender for MockEmailSender {
    async fn send_verification_request(&self, request: &VerificationRequest) -> Result<(), HookError> {
        lock(&self.sent).push(request.clone());
        Ok(())
    }
}

/// Authorizer with a fixed table of `username`/`password` pairs
#[derive(Default)]
pub struct MockAuthorizer {
    users: HashMap<String, (String, User)>,
    failing: bool,
    calls: AtomicUsize,
}

impl MockAuthorizer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_user(mut self, username: &str, password: &str, user: User) -> Self {
        self.users.insert(username.to_string(), (password.to_string(), user));
        self
    }

    /// An authorizer whose backend is down
    #[must_use]
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialsAuthorizer for MockAuthorizer {
    async fn authorize(
        &self,
        credentials: &HashMap<String, String>,
        _request: &AuthRequest,
    ) -> Result<Option<User>, HookError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(HookError::new("user directory unavailable"));
        }
        let (Some(username), Some(password)) = (credentials.get("username"), credentials.get("password")) else {
            return Ok(None);
        };
        Ok(self
            .users
            .get(username)
            .filter(|(expected, _)| expected == password)
            .map(|(_, user)| user.clone()))
    }
}

/// Event handler that records every delivered event
#[derive(Default)]
pub struct RecordingEvents {
    events: Mutex<Vec<AuthEvent>>,
}

impl RecordingEvents {
    #[must_use]
    pub fn events(&self) -> Vec<AuthEvent> {
        lock(&self.events).clone()
    }

    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        lock(&self.events).iter().map(AuthEvent::name).collect()
    }

    #[must_use]
    pub fn count(&self, name: &str) -> usize {
        lock(&self.events).iter().filter(|e| e.name() == name).count()
    }

    /// Wait until at least `count` events named `name` were delivered
    ///
    /// Delivery happens on spawned tasks, so assertions have to wait for it.
    pub async fn wait_for(&self, name: &str, count: usize) -> bool {
        for _ in 0..100 {
            if self.count(name) >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    fn push(&self, event: AuthEvent) {
        lock(&self.events).push(event);
    }
}

#[async_trait]
impl EventHandler for RecordingEvents {
    async fn sign_in(&self, event: &SignInEvent) -> Result<(), HookError> {
        self.push(AuthEvent::SignIn(event.clone()));
        Ok(())
    }

    async fn create_user(&self, user: &User) -> Result<(), HookError> {
        self.push(AuthEvent::CreateUser(user.clone()));
        Ok(())
    }

    async fn link_account(&self, user: &User, account: &Account) -> Result<(), HookError> {
        self.push(AuthEvent::LinkAccount {
            user: user.clone(),
            account: account.clone(),
        });
        Ok(())
    }

    async fn session(&self, session: &SessionView) -> Result<(), HookError> {
        self.push(AuthEvent::Session(session.clone()));
        Ok(())
    }

    async fn sign_out(&self, event: &SignOutEvent) -> Result<(), HookError> {
        self.push(AuthEvent::SignOut(event.clone()));
        Ok(())
    }
}
