//! Storage boundary
//!
//! Every method has a default body returning [`AdapterError::Unsupported`],
//! so a deployment implements only what its flows use. A stateless,
//! OAuth-only deployment needs nothing beyond the user and account methods.

pub mod memory;

use async_trait::async_trait;

use crate::error::AdapterError;
use crate::models::{Account, ServerSession, User, VerificationToken};

pub use memory::MemoryAdapter;

#[async_trait]
pub trait Adapter: Send + Sync {
    async fn get_user(&self, _id: &str) -> Result<Option<User>, AdapterError> {
        Err(AdapterError::Unsupported("get_user"))
    }

    async fn get_user_by_account(
        &self,
        _provider: &str,
        _provider_account_id: &str,
    ) -> Result<Option<User>, AdapterError> {
        Err(AdapterError::Unsupported("get_user_by_account"))
    }

    async fn get_user_by_email(&self, _email: &str) -> Result<Option<User>, AdapterError> {
        Err(AdapterError::Unsupported("get_user_by_email"))
    }

    async fn create_user(&self, _user: User) -> Result<User, AdapterError> {
        Err(AdapterError::Unsupported("create_user"))
    }

    async fn update_user(&self, _user: User) -> Result<User, AdapterError> {
        Err(AdapterError::Unsupported("update_user"))
    }

    /// Must fail with [`AdapterError::Conflict`] when `(provider,
    /// provider_account_id)` is already linked
    async fn link_account(&self, _account: Account) -> Result<Account, AdapterError> {
        Err(AdapterError::Unsupported("link_account"))
    }

    /// Create `user` and link `account` to it
    ///
    /// Returns the user that owns the account afterwards and whether it is
    /// the one just created. When another request linked the same account
    /// first, that request's user is returned instead. The default runs the
    /// two writes in sequence; stores that can do both in one transaction
    /// should override it.
    async fn create_user_and_link(
        &self,
        user: User,
        account: Account,
    ) -> Result<(User, bool), AdapterError> {
        let user = self.create_user(user).await?;
        let account = Account {
            user_id: user.id.clone(),
            ..account
        };
        match self.link_account(account.clone()).await {
            Ok(_) => Ok((user, true)),
            Err(AdapterError::Conflict(_)) => self
                .get_user_by_account(&account.provider, &account.provider_account_id)
                .await?
                .map(|owner| (owner, false))
                .ok_or_else(|| AdapterError::NotFound(account.provider_account_id.clone())),
            Err(err) => Err(err),
        }
    }

    async fn create_session(&self, _session: ServerSession) -> Result<ServerSession, AdapterError> {
        Err(AdapterError::Unsupported("create_session"))
    }

    async fn get_session_and_user(
        &self,
        _session_token: &str,
    ) -> Result<Option<(ServerSession, User)>, AdapterError> {
        Err(AdapterError::Unsupported("get_session_and_user"))
    }

    async fn update_session(&self, _session: ServerSession) -> Result<ServerSession, AdapterError> {
        Err(AdapterError::Unsupported("update_session"))
    }

    async fn delete_session(&self, _session_token: &str) -> Result<(), AdapterError> {
        Err(AdapterError::Unsupported("delete_session"))
    }

    async fn create_verification_token(
        &self,
        _token: VerificationToken,
    ) -> Result<VerificationToken, AdapterError> {
        Err(AdapterError::Unsupported("create_verification_token"))
    }

    /// Delete and return the token in one atomic step; a second call with
    /// the same pair returns `None`
    async fn use_verification_token(
        &self,
        _identifier: &str,
        _token: &str,
    ) -> Result<Option<VerificationToken>, AdapterError> {
        Err(AdapterError::Unsupported("use_verification_token"))
    }
}
