use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::Adapter;
use crate::error::AdapterError;
use crate::models::{Account, ServerSession, User, VerificationToken};

#[derive(Default)]
struct Store {
    users: HashMap<String, User>,
    accounts: HashMap<(String, String), Account>,
    sessions: HashMap<String, ServerSession>,
    verification_tokens: HashMap<(String, String), VerificationToken>,
}

/// In-process adapter; all state is lost on restart
///
/// One lock guards the whole store, so every method, including
/// `create_user_and_link` and `use_verification_token`, is atomic.
#[derive(Default)]
pub struct MemoryAdapter {
    store: Mutex<Store>,
}

impl MemoryAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn user_count(&self) -> usize {
        self.store.lock().await.users.len()
    }

    pub async fn accounts_for(&self, user_id: &str) -> Vec<Account> {
        self.store
            .lock()
            .await
            .accounts
            .values()
            .filter(|account| account.user_id == user_id)
            .cloned()
            .collect()
    }

    pub async fn session_count(&self) -> usize {
        self.store.lock().await.sessions.len()
    }
}

fn account_key(provider: &str, provider_account_id: &str) -> (String, String) {
    (provider.to_string(), provider_account_id.to_string())
}

impl Store {
    fn insert_account(&mut self, account: Account) -> Result<Account, AdapterError> {
        if !self.users.contains_key(&account.user_id) {
            return Err(AdapterError::NotFound(format!("user {}", account.user_id)));
        }
        let key = account_key(&account.provider, &account.provider_account_id);
        if self.accounts.contains_key(&key) {
            return Err(AdapterError::Conflict(format!(
                "account {}/{}",
                account.provider, account.provider_account_id
            )));
        }
        self.accounts.insert(key, account.clone());
        Ok(account)
    }
}

#[async_trait]
impl Adapter for MemoryAdapter {
    async fn get_user(&self, id: &str) -> Result<Option<User>, AdapterError> {
        Ok(self.store.lock().await.users.get(id).cloned())
    }

    async fn get_user_by_account(
        &self,
        provider: &str,
        provider_account_id: &str,
    ) -> Result<Option<User>, AdapterError> {
        let store = self.store.lock().await;
        Ok(store
            .accounts
            .get(&account_key(provider, provider_account_id))
            .and_then(|account| store.users.get(&account.user_id))
            .cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, AdapterError> {
        Ok(self
            .store
            .lock()
            .await
            .users
            .values()
            .find(|user| user.email.as_deref().is_some_and(|e| e.eq_ignore_ascii_case(email)))
            .cloned())
    }

    async fn create_user(&self, user: User) -> Result<User, AdapterError> {
        let mut store = self.store.lock().await;
        if store.users.contains_key(&user.id) {
            return Err(AdapterError::Conflict(format!("user {}", user.id)));
        }
        store.users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    async fn update_user(&self, user: User) -> Result<User, AdapterError> {
        let mut store = self.store.lock().await;
        match store.users.get_mut(&user.id) {
            Some(existing) => {
                *existing = user.clone();
                Ok(user)
            }
            None => Err(AdapterError::NotFound(format!("user {}", user.id))),
        }
    }

    async fn link_account(&self, account: Account) -> Result<Account, AdapterError> {
        self.store.lock().await.insert_account(account)
    }

    async fn create_user_and_link(
        &self,
        user: User,
        account: Account,
    ) -> Result<(User, bool), AdapterError> {
        let mut store = self.store.lock().await;
        let key = account_key(&account.provider, &account.provider_account_id);
        if let Some(owner) = store
            .accounts
            .get(&key)
            .and_then(|existing| store.users.get(&existing.user_id))
        {
            return Ok((owner.clone(), false));
        }
        store.users.insert(user.id.clone(), user.clone());
        store.insert_account(Account {
            user_id: user.id.clone(),
            ..account
        })?;
        Ok((user, true))
    }

    async fn create_session(&self, session: ServerSession) -> Result<ServerSession, AdapterError> {
        let mut store = self.store.lock().await;
        if store.sessions.contains_key(&session.session_token) {
            return Err(AdapterError::Conflict("session token".to_string()));
        }
        store
            .sessions
            .insert(session.session_token.clone(), session.clone());
        Ok(session)
    }

    async fn get_session_and_user(
        &self,
        session_token: &str,
    ) -> Result<Option<(ServerSession, User)>, AdapterError> {
        let store = self.store.lock().await;
        Ok(store.sessions.get(session_token).and_then(|session| {
            store
                .users
                .get(&session.user_id)
                .map(|user| (session.clone(), user.clone()))
        }))
    }

    async fn update_session(&self, session: ServerSession) -> Result<ServerSession, AdapterError> {
        let mut store = self.store.lock().await;
        match store.sessions.get_mut(&session.session_token) {
            Some(existing) => {
                *existing = session.clone();
                Ok(session)
            }
            None => Err(AdapterError::NotFound("session".to_string())),
        }
    }

    async fn delete_session(&self, session_token: &str) -> Result<(), AdapterError> {
        self.store.lock().await.sessions.remove(session_token);
        Ok(())
    }

    async fn create_verification_token(
        &self,
        token: VerificationToken,
    ) -> Result<VerificationToken, AdapterError> {
        self.store.lock().await.verification_tokens.insert(
            (token.identifier.clone(), token.token.clone()),
            token.clone(),
        );
        Ok(token)
    }

    async fn use_verification_token(
        &self,
        identifier: &str,
        token: &str,
    ) -> Result<Option<VerificationToken>, AdapterError> {
        Ok(self
            .store
            .lock()
            .await
            .verification_tokens
            .remove(&(identifier.to_string(), token.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccountType, Profile};
    use chrono::{Duration, Utc};
    use std::sync::Arc;

    fn user(email: &str) -> User {
        User::candidate(&Profile {
            id: "p".into(),
            email: Some(email.into()),
            ..Profile::default()
        })
    }

    fn account(user_id: &str, provider: &str, id: &str) -> Account {
        Account::from_tokens(user_id, provider, id, AccountType::OAuth, None)
    }

    #[tokio::test]
    async fn test_verification_token_is_single_use() {
        let adapter = MemoryAdapter::new();
        let token = VerificationToken {
            identifier: "a@example.com".into(),
            token: "hash".into(),
            expires: Utc::now() + Duration::hours(1),
        };
        adapter.create_verification_token(token.clone()).await.unwrap();

        let first = adapter
            .use_verification_token("a@example.com", "hash")
            .await
            .unwrap();
        assert_eq!(first, Some(token));
        let second = adapter
            .use_verification_token("a@example.com", "hash")
            .await
            .unwrap();
        assert_eq!(second, None);
    }

    #[tokio::test]
    async fn test_concurrent_redemption_yields_one_winner() {
        let adapter = Arc::new(MemoryAdapter::new());
        adapter
            .create_verification_token(VerificationToken {
                identifier: "a@example.com".into(),
                token: "hash".into(),
                expires: Utc::now() + Duration::hours(1),
            })
            .await
            .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let adapter = Arc::clone(&adapter);
                tokio::spawn(async move {
                    adapter
                        .use_verification_token("a@example.com", "hash")
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_account_uniqueness() {
        let adapter = MemoryAdapter::new();
        let a = adapter.create_user(user("a@example.com")).await.unwrap();
        let b = adapter.create_user(user("b@example.com")).await.unwrap();

        adapter.link_account(account(&a.id, "github", "1")).await.unwrap();
        assert!(matches!(
            adapter.link_account(account(&b.id, "github", "1")).await,
            Err(AdapterError::Conflict(_))
        ));

        let owner = adapter.get_user_by_account("github", "1").await.unwrap().unwrap();
        assert_eq!(owner.id, a.id);
    }

    #[tokio::test]
    async fn test_concurrent_first_login_creates_one_user() {
        let adapter = Arc::new(MemoryAdapter::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let adapter = Arc::clone(&adapter);
                tokio::spawn(async move {
                    adapter
                        .create_user_and_link(user("a@example.com"), account("", "github", "1"))
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut created = 0;
        for handle in handles {
            if handle.await.unwrap().1 {
                created += 1;
            }
        }
        assert_eq!(created, 1);
        assert_eq!(adapter.user_count().await, 1);
    }

    #[tokio::test]
    async fn test_sessions() {
        let adapter = MemoryAdapter::new();
        let u = adapter.create_user(user("a@example.com")).await.unwrap();
        let session = ServerSession {
            id: "s1".into(),
            session_token: "tok".into(),
            user_id: u.id.clone(),
            expires: Utc::now() + Duration::days(1),
        };
        adapter.create_session(session.clone()).await.unwrap();
        assert!(adapter.create_session(session.clone()).await.is_err());

        let (found, found_user) = adapter.get_session_and_user("tok").await.unwrap().unwrap();
        assert_eq!(found, session);
        assert_eq!(found_user.id, u.id);

        adapter.delete_session("tok").await.unwrap();
        assert!(adapter.get_session_and_user("tok").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_email_lookup_ignores_case() {
        let adapter = MemoryAdapter::new();
        adapter.create_user(user("Ada@Example.com")).await.unwrap();
        assert!(adapter
            .get_user_by_email("ada@example.com")
            .await
            .unwrap()
            .is_some());
    }
}
