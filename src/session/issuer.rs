//! Session issuance, reads and sign-out
//!
//! One strategy per deployment. `jwt` keeps the whole session in (possibly
//! chunked) cookies; `database` keeps a row in the adapter and only an
//! opaque token in the cookie.

use std::collections::HashMap;
use std::sync::Arc;

use actix_web::cookie::Cookie;
use anyhow::anyhow;
use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};

use crate::adapter::Adapter;
use crate::callbacks::{AuthCallbacks, JwtParams, JwtTrigger};
use crate::error::{AdapterError, AuthError, HookError, SessionError};
use crate::events::{AuthEvent, EventDispatcher, SignOutEvent};
use crate::models::{Account, Profile, ServerSession, SessionArtifact, SessionView, User};
use crate::session::chunk::{clear_chunked, read_chunked, write_chunked};
use crate::session::cookie::{CookieFactory, CookieOptions, CookieRole};
use crate::session::token::{SessionClaims, SessionTokenCodec};
use crate::settings::SessionStrategy;
use crate::utils::crypto::generate_token;
use crate::utils::logging::LoggingHelper;

/// What a sign-in hands to the issuer
#[derive(Debug, Clone, Copy)]
pub struct IssueRequest<'a> {
    pub user: &'a User,
    pub account: Option<&'a Account>,
    pub profile: Option<&'a Profile>,
    pub is_new_user: bool,
}

#[derive(Debug)]
pub struct IssuedSession {
    pub artifact: SessionArtifact,
    pub cookies: Vec<Cookie<'static>>,
}

/// Result of reading the session cookie
#[derive(Debug, Default)]
pub struct SessionRead {
    pub session: Option<SessionView>,
    /// Refreshed or cleared session cookies
    pub cookies: Vec<Cookie<'static>>,
}

#[derive(Clone)]
pub struct SessionIssuer {
    strategy: SessionStrategy,
    max_age: Duration,
    update_age: Duration,
    cookies: CookieFactory,
    codec: Arc<dyn SessionTokenCodec>,
    adapter: Option<Arc<dyn Adapter>>,
    callbacks: Arc<dyn AuthCallbacks>,
    events: EventDispatcher,
}

impl SessionIssuer {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        strategy: SessionStrategy,
        max_age: Duration,
        update_age: Duration,
        cookies: CookieFactory,
        codec: Arc<dyn SessionTokenCodec>,
        adapter: Option<Arc<dyn Adapter>>,
        callbacks: Arc<dyn AuthCallbacks>,
        events: EventDispatcher,
    ) -> Self {
        Self {
            strategy,
            max_age,
            update_age,
            cookies,
            codec,
            adapter,
            callbacks,
            events,
        }
    }

    #[must_use]
    pub const fn strategy(&self) -> SessionStrategy {
        self.strategy
    }

    #[must_use]
    pub fn cookie_name(&self) -> String {
        self.cookies.name(CookieRole::SessionToken)
    }

    fn adapter(&self) -> Result<&Arc<dyn Adapter>, AuthError> {
        self.adapter
            .as_ref()
            .ok_or_else(|| AuthError::CallbackRoute(anyhow!("database sessions need an adapter")))
    }

    fn write(&self, value: &str, expires: DateTime<Utc>, jar: &HashMap<String, String>) -> Vec<Cookie<'static>> {
        write_chunked(&self.cookies, &self.cookie_name(), value, &CookieOptions::until(expires), jar)
    }

    fn clear(&self, jar: &HashMap<String, String>) -> Vec<Cookie<'static>> {
        clear_chunked(&self.cookies, &self.cookie_name(), jar)
    }

    /// Create the session for a completed sign-in
    ///
    /// # Errors
    ///
    /// `CallbackRouteError` when the `jwt` hook, the codec or the adapter
    /// fails
    pub async fn issue(
        &self,
        request: IssueRequest<'_>,
        jar: &HashMap<String, String>,
    ) -> Result<IssuedSession, AuthError> {
        match self.strategy {
            SessionStrategy::Jwt => self.issue_token(request, jar).await,
            SessionStrategy::Database => self.issue_server_session(request.user, jar).await,
        }
    }

    async fn issue_token(
        &self,
        request: IssueRequest<'_>,
        jar: &HashMap<String, String>,
    ) -> Result<IssuedSession, AuthError> {
        let trigger = if request.is_new_user {
            JwtTrigger::SignUp
        } else {
            JwtTrigger::SignIn
        };
        let claims = self
            .callbacks
            .jwt(JwtParams {
                token: SessionClaims::for_user(request.user),
                trigger,
                user: Some(request.user),
                account: request.account,
                profile: request.profile,
            })
            .await
            .map_err(jwt_hook_failed)?;

        let Some(claims) = claims else {
            debug!("jwt callback returned no token; clearing the session");
            return Ok(IssuedSession {
                artifact: SessionArtifact::Cleared,
                cookies: self.clear(jar),
            });
        };

        let (token, expires) = self.codec.encode(&claims, self.max_age)?;
        let cookies = self.write(&token, expires, jar);
        LoggingHelper::log_session_issued(&request.user.id, self.strategy.as_str(), live_count(&cookies));
        Ok(IssuedSession {
            artifact: SessionArtifact::SignedToken { token, expires },
            cookies,
        })
    }

    async fn issue_server_session(
        &self,
        user: &User,
        jar: &HashMap<String, String>,
    ) -> Result<IssuedSession, AuthError> {
        let session = ServerSession {
            id: uuid::Uuid::new_v4().to_string(),
            session_token: generate_token(32),
            user_id: user.id.clone(),
            expires: Utc::now() + self.max_age,
        };
        let session = self.adapter()?.create_session(session).await?;
        let cookies = self.write(&session.session_token, session.expires, jar);
        LoggingHelper::log_session_issued(&user.id, self.strategy.as_str(), live_count(&cookies));
        Ok(IssuedSession {
            artifact: SessionArtifact::Server(session),
            cookies,
        })
    }

    /// Read the current session, refreshing or clearing its cookies
    ///
    /// An unreadable, expired or missing session yields `session: None`.
    ///
    /// # Errors
    ///
    /// Adapter failures and hook failures
    pub async fn read_session(&self, jar: &HashMap<String, String>) -> Result<SessionRead, AuthError> {
        let value = match read_chunked(&self.cookie_name(), jar) {
            Ok(Some(value)) => value,
            Ok(None) => return Ok(SessionRead::default()),
            Err(err) => {
                debug!("Discarding session cookie: {err}");
                return Ok(self.cleared(jar));
            }
        };

        let read = match self.strategy {
            SessionStrategy::Jwt => self.read_token(&value, jar).await?,
            SessionStrategy::Database => self.read_server_session(&value, jar).await?,
        };
        if let Some(view) = &read.session {
            self.events.emit(AuthEvent::Session(view.clone()));
        }
        Ok(read)
    }

    fn cleared(&self, jar: &HashMap<String, String>) -> SessionRead {
        SessionRead {
            session: None,
            cookies: self.clear(jar),
        }
    }

    async fn read_token(&self, token: &str, jar: &HashMap<String, String>) -> Result<SessionRead, AuthError> {
        let claims = match self.codec.decode(token) {
            Ok(claims) => claims,
            Err(err) => {
                debug!("Discarding session token: {err}");
                return Ok(self.cleared(jar));
            }
        };

        let refreshed = self
            .callbacks
            .jwt(JwtParams {
                token: claims,
                trigger: JwtTrigger::Update,
                user: None,
                account: None,
                profile: None,
            })
            .await
            .map_err(jwt_hook_failed)?;
        let Some(claims) = refreshed else {
            return Ok(self.cleared(jar));
        };

        let (token, expires) = self.codec.encode(&claims, self.max_age)?;
        let view = SessionView {
            user: claims.session_user(),
            expires,
        };
        let view = self.callbacks.session(view, None).await.map_err(session_hook_failed)?;
        Ok(SessionRead {
            session: Some(view),
            cookies: self.write(&token, expires, jar),
        })
    }

    async fn read_server_session(
        &self,
        session_token: &str,
        jar: &HashMap<String, String>,
    ) -> Result<SessionRead, AuthError> {
        let adapter = self.adapter()?;
        let Some((mut session, user)) = adapter.get_session_and_user(session_token).await? else {
            return Ok(self.cleared(jar));
        };

        let now = Utc::now();
        if session.expires <= now {
            debug!("Session for user {} expired at {}", user.id, session.expires);
            delete_ignoring_missing(adapter.as_ref(), session_token).await?;
            return Ok(self.cleared(jar));
        }

        let mut cookies = Vec::new();
        let last_extended = session.expires - self.max_age;
        if now >= last_extended + self.update_age {
            session.expires = now + self.max_age;
            session = adapter.update_session(session).await?;
            cookies = self.write(&session.session_token, session.expires, jar);
            debug!("Extended session for user {} to {}", user.id, session.expires);
        }

        let view = SessionView {
            user: (&user).into(),
            expires: session.expires,
        };
        let view = self
            .callbacks
            .session(view, Some(&user))
            .await
            .map_err(session_hook_failed)?;
        Ok(SessionRead {
            session: Some(view),
            cookies,
        })
    }

    /// Id of the signed-in user, if the request carries a live session
    pub async fn current_user_id(&self, jar: &HashMap<String, String>) -> Option<String> {
        let value = read_chunked(&self.cookie_name(), jar).ok().flatten()?;
        match self.strategy {
            SessionStrategy::Jwt => self.codec.decode(&value).ok()?.sub,
            SessionStrategy::Database => {
                let adapter = self.adapter.as_ref()?;
                match adapter.get_session_and_user(&value).await {
                    Ok(Some((session, user))) if session.expires > Utc::now() => Some(user.id),
                    Ok(_) => None,
                    Err(err) => {
                        warn!("Session lookup failed: {err}");
                        None
                    }
                }
            }
        }
    }

    /// End the session: delete the row (database) and clear every cookie
    ///
    /// # Errors
    ///
    /// Adapter failures other than a missing row
    pub async fn sign_out(&self, jar: &HashMap<String, String>) -> Result<Vec<Cookie<'static>>, AuthError> {
        let user_id = self.current_user_id(jar).await;
        if self.strategy == SessionStrategy::Database {
            if let Some(token) = read_chunked(&self.cookie_name(), jar).ok().flatten() {
                delete_ignoring_missing(self.adapter()?.as_ref(), &token).await?;
            }
        }
        debug!("Signed out user {}", user_id.as_deref().unwrap_or("<anonymous>"));
        self.events.emit(AuthEvent::SignOut(SignOutEvent { user_id }));
        Ok(self.clear(jar))
    }
}

async fn delete_ignoring_missing(adapter: &dyn Adapter, session_token: &str) -> Result<(), SessionError> {
    match adapter.delete_session(session_token).await {
        Ok(()) | Err(AdapterError::NotFound(_)) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn live_count(cookies: &[Cookie<'_>]) -> usize {
    cookies
        .iter()
        .filter(|c| !crate::session::cookie::is_removal(c))
        .count()
}

fn jwt_hook_failed(err: HookError) -> AuthError {
    AuthError::CallbackRoute(anyhow!("jwt callback failed: {err}"))
}

fn session_hook_failed(err: HookError) -> AuthError {
    AuthError::CallbackRoute(anyhow!("session callback failed: {err}"))
}
