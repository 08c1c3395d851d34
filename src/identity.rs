//! Identity resolution and account linking
//!
//! Every flow follows the same order: read-only lookups, then the `sign_in`
//! policy hook, then writes. A denied sign-in therefore never leaves a user
//! or account behind.
//!
//! Accounts are matched on `(provider, provider_account_id)` only. A profile
//! whose email belongs to an existing user still creates a new user, unless
//! the provider opts into `allow_dangerous_email_account_linking`.

use std::sync::Arc;

use anyhow::anyhow;
use chrono::Utc;
use log::{debug, info};

use crate::adapter::Adapter;
use crate::callbacks::{AuthCallbacks, SignInDecision, SignInParams};
use crate::error::{AdapterError, AuthError};
use crate::events::{AuthEvent, EventDispatcher};
use crate::models::{Account, AccountType, ExchangeResult, Identity, Profile, User};
use crate::providers::FlowType;

/// Outcome of a permitted or redirected sign-in
#[derive(Debug, Clone)]
pub enum Resolution {
    SignedIn(Identity),
    /// The policy hook sent the user elsewhere; no session is issued
    Redirect(String),
}

/// What the lookup phase decided to do with the account
enum Plan {
    /// The account is already linked to this user
    Existing(User),
    /// Link the account to this existing user
    Link(User),
    /// Create this user and link the account to it
    Create(User),
}

impl Plan {
    const fn user(&self) -> &User {
        match self {
            Self::Existing(user) | Self::Link(user) | Self::Create(user) => user,
        }
    }
}

/// A provider sign-in as seen by the resolver
#[derive(Debug, Clone, Copy)]
pub struct ProviderSignIn<'a> {
    pub provider_id: &'a str,
    pub flow: FlowType,
    pub allow_dangerous_email_account_linking: bool,
}

#[derive(Clone)]
pub struct IdentityResolver {
    adapter: Option<Arc<dyn Adapter>>,
    callbacks: Arc<dyn AuthCallbacks>,
    events: EventDispatcher,
}

impl IdentityResolver {
    #[must_use]
    pub fn new(
        adapter: Option<Arc<dyn Adapter>>,
        callbacks: Arc<dyn AuthCallbacks>,
        events: EventDispatcher,
    ) -> Self {
        Self {
            adapter,
            callbacks,
            events,
        }
    }

    fn adapter(&self) -> Result<&dyn Adapter, AuthError> {
        self.adapter
            .as_deref()
            .ok_or_else(|| AuthError::CallbackRoute(anyhow!("this sign-in needs an adapter")))
    }

    /// Resolve an OAuth/OIDC sign-in
    ///
    /// `session_user_id` is the user already signed in on this request, if
    /// any; a new account is then linked to that user.
    ///
    /// # Errors
    ///
    /// `OAuthAccountNotLinked` when the account belongs to another user than
    /// the signed-in one, policy hook outcomes, adapter failures
    pub async fn resolve_oauth(
        &self,
        sign_in: ProviderSignIn<'_>,
        exchange: &ExchangeResult,
        session_user_id: Option<&str>,
    ) -> Result<Resolution, AuthError> {
        let adapter = self.adapter()?;
        let account_type = match sign_in.flow {
            FlowType::Oidc => AccountType::Oidc,
            _ => AccountType::OAuth,
        };

        let owner = adapter
            .get_user_by_account(sign_in.provider_id, &exchange.provider_account_id)
            .await?;
        let session_user = match session_user_id {
            Some(id) => adapter.get_user(id).await?,
            None => None,
        };

        let plan = match (owner, session_user) {
            (Some(owner), Some(current)) if owner.id != current.id => {
                info!(
                    "Account {}/{} belongs to another user than the signed-in one",
                    sign_in.provider_id, exchange.provider_account_id
                );
                return Err(AuthError::OAuthAccountNotLinked);
            }
            (Some(owner), _) => Plan::Existing(owner),
            (None, Some(current)) => Plan::Link(current),
            (None, None) => self.match_new_account(adapter, sign_in, &exchange.profile).await?,
        };

        let account = Account::from_tokens(
            &plan.user().id,
            sign_in.provider_id,
            &exchange.provider_account_id,
            account_type,
            Some(&exchange.token_set),
        );
        if let Some(url) = self
            .authorize(&SignInParams {
                provider: sign_in.provider_id,
                flow: sign_in.flow,
                user: plan.user(),
                account: Some(&account),
                profile: Some(&exchange.profile),
                is_new_user: matches!(plan, Plan::Create(_)),
            })
            .await?
        {
            return Ok(Resolution::Redirect(url));
        }

        let identity = self.commit(adapter, plan, account).await?;
        Ok(Resolution::SignedIn(identity))
    }

    async fn match_new_account(
        &self,
        adapter: &dyn Adapter,
        sign_in: ProviderSignIn<'_>,
        profile: &Profile,
    ) -> Result<Plan, AuthError> {
        if sign_in.allow_dangerous_email_account_linking {
            if let Some(email) = profile.email.as_deref() {
                if let Some(user) = adapter.get_user_by_email(email).await? {
                    debug!("Linking {} account to existing user {} by email", sign_in.provider_id, user.id);
                    return Ok(Plan::Link(user));
                }
            }
        }
        Ok(Plan::Create(User::candidate(profile)))
    }

    /// Perform the writes for `plan`
    async fn commit(&self, adapter: &dyn Adapter, plan: Plan, account: Account) -> Result<Identity, AuthError> {
        match plan {
            Plan::Existing(user) => Ok(Identity {
                user,
                account,
                is_new_user: false,
            }),
            Plan::Link(user) => {
                let account = match adapter.link_account(account).await {
                    Ok(account) => account,
                    // Linked elsewhere between the lookup and this write
                    Err(AdapterError::Conflict(_)) => return Err(AuthError::OAuthAccountNotLinked),
                    Err(err) => return Err(err.into()),
                };
                self.events.emit(AuthEvent::LinkAccount {
                    user: user.clone(),
                    account: account.clone(),
                });
                Ok(Identity {
                    user,
                    account,
                    is_new_user: false,
                })
            }
            Plan::Create(candidate) => {
                let (user, created) = adapter.create_user_and_link(candidate, account.clone()).await?;
                let account = Account {
                    user_id: user.id.clone(),
                    ..account
                };
                if created {
                    self.events.emit(AuthEvent::CreateUser(user.clone()));
                    self.events.emit(AuthEvent::LinkAccount {
                        user: user.clone(),
                        account: account.clone(),
                    });
                }
                Ok(Identity {
                    user,
                    account,
                    is_new_user: created,
                })
            }
        }
    }

    /// Resolve an email-link sign-in for a redeemed token
    ///
    /// # Errors
    ///
    /// Policy hook outcomes and adapter failures
    pub async fn resolve_email(&self, provider_id: &str, email: &str) -> Result<Resolution, AuthError> {
        let adapter = self.adapter()?;
        let existing = adapter.get_user_by_email(email).await?;
        let linked = adapter.get_user_by_account(provider_id, email).await?.is_some();

        let plan = match existing {
            Some(user) if linked => Plan::Existing(user),
            Some(user) => Plan::Link(user),
            None => Plan::Create(User {
                email_verified: Some(Utc::now()),
                ..User::candidate(&Profile {
                    id: email.to_string(),
                    email: Some(email.to_string()),
                    ..Profile::default()
                })
            }),
        };
        let account = Account::from_tokens(&plan.user().id, provider_id, email, AccountType::Email, None);

        if let Some(url) = self
            .authorize(&SignInParams {
                provider: provider_id,
                flow: FlowType::Email,
                user: plan.user(),
                account: Some(&account),
                profile: None,
                is_new_user: matches!(plan, Plan::Create(_)),
            })
            .await?
        {
            return Ok(Resolution::Redirect(url));
        }

        let plan = match plan {
            Plan::Existing(user) => Plan::Existing(mark_verified(adapter, user).await?),
            Plan::Link(user) => Plan::Link(mark_verified(adapter, user).await?),
            create @ Plan::Create(_) => create,
        };
        let identity = self.commit(adapter, plan, account).await?;
        Ok(Resolution::SignedIn(identity))
    }

    /// Resolve a sign-in whose user came from a credentials authorizer
    ///
    /// Nothing is written; credentials users are never linked.
    ///
    /// # Errors
    ///
    /// Policy hook outcomes
    pub async fn resolve_credentials(&self, provider_id: &str, user: User) -> Result<Resolution, AuthError> {
        if let Some(url) = self
            .authorize(&SignInParams {
                provider: provider_id,
                flow: FlowType::Credentials,
                user: &user,
                account: None,
                profile: None,
                is_new_user: false,
            })
            .await?
        {
            return Ok(Resolution::Redirect(url));
        }

        let account = Account::from_tokens(&user.id, provider_id, &user.id, AccountType::Credentials, None);
        Ok(Resolution::SignedIn(Identity {
            user,
            account,
            is_new_user: false,
        }))
    }

    /// Run the policy hook; `Some(url)` means redirect without signing in
    async fn authorize(&self, params: &SignInParams<'_>) -> Result<Option<String>, AuthError> {
        match self.callbacks.sign_in(params).await {
            Ok(SignInDecision::Allow) => Ok(None),
            Ok(SignInDecision::Deny) => {
                info!("Sign-in via '{}' denied for user {}", params.provider, params.user.id);
                Err(AuthError::AccessDenied)
            }
            Ok(SignInDecision::Redirect(url)) => Ok(Some(url)),
            Err(err) => Err(AuthError::AuthorizedCallback(err.to_string())),
        }
    }
}

async fn mark_verified(adapter: &dyn Adapter, user: User) -> Result<User, AuthError> {
    if user.email_verified.is_some() {
        return Ok(user);
    }
    Ok(adapter
        .update_user(User {
            email_verified: Some(Utc::now()),
            ..user
        })
        .await?)
}
