//! Lifecycle notifications
//!
//! Events are emitted after the corresponding write has happened and are
//! delivered on a spawned task; a failing handler is logged and never
//! affects the response.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::HookError;
use crate::models::{Account, SessionView, User};

#[derive(Debug, Clone)]
pub struct SignInEvent {
    pub user: User,
    pub account: Option<Account>,
    pub provider: String,
    pub is_new_user: bool,
}

#[derive(Debug, Clone)]
pub struct SignOutEvent {
    pub user_id: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AuthEvent {
    SignIn(SignInEvent),
    CreateUser(User),
    LinkAccount { user: User, account: Account },
    Session(SessionView),
    SignOut(SignOutEvent),
}

impl AuthEvent {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SignIn(_) => "signIn",
            Self::CreateUser(_) => "createUser",
            Self::LinkAccount { .. } => "linkAccount",
            Self::Session(_) => "session",
            Self::SignOut(_) => "signOut",
        }
    }
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn sign_in(&self, _event: &SignInEvent) -> Result<(), HookError> {
        Ok(())
    }

    async fn create_user(&self, _user: &User) -> Result<(), HookError> {
        Ok(())
    }

    async fn link_account(&self, _user: &User, _account: &Account) -> Result<(), HookError> {
        Ok(())
    }

    async fn session(&self, _session: &SessionView) -> Result<(), HookError> {
        Ok(())
    }

    async fn sign_out(&self, _event: &SignOutEvent) -> Result<(), HookError> {
        Ok(())
    }
}

async fn deliver(handler: &dyn EventHandler, event: &AuthEvent) -> Result<(), HookError> {
    match event {
        AuthEvent::SignIn(e) => handler.sign_in(e).await,
        AuthEvent::CreateUser(user) => handler.create_user(user).await,
        AuthEvent::LinkAccount { user, account } => handler.link_account(user, account).await,
        AuthEvent::Session(view) => handler.session(view).await,
        AuthEvent::SignOut(e) => handler.sign_out(e).await,
    }
}

/// Fire-and-forget delivery to an optional handler
#[derive(Clone, Default)]
pub struct EventDispatcher {
    handler: Option<Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    #[must_use]
    pub fn new(handler: Option<Arc<dyn EventHandler>>) -> Self {
        Self { handler }
    }

    /// Spawn delivery of `event`; must be called from within a Tokio runtime
    pub fn emit(&self, event: AuthEvent) {
        let Some(handler) = self.handler.as_ref().map(Arc::clone) else {
            return;
        };
        tokio::spawn(async move {
            if let Err(err) = deliver(handler.as_ref(), &event).await {
                log::warn!("{} event handler failed: {err}", event.name());
            }
        });
    }
}
