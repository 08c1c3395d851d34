// Centralized logging for the recurring sign-in messages
use log::{debug, error, info, warn};

use crate::error::{AuthError, ErrorKind};
use crate::models::TokenSet;
use crate::providers::FlowType;

pub struct LoggingHelper;

impl LoggingHelper {
    /// Log an inbound callback; parameter values are never logged
    pub fn log_callback_received(provider: &str, flow: FlowType, has_code: bool, has_state: bool) {
        info!(
            "Callback received for provider '{provider}' ({}): code present={has_code}, state present={has_state}",
            flow.as_str()
        );
    }

    /// Log a token exchange summary (presence and lengths only)
    pub fn log_token_exchange(provider: &str, tokens: &TokenSet) {
        info!(
            "Token exchange succeeded for '{provider}': access_token_len={}, refresh_token={}, id_token={}, expires_at={:?}",
            tokens.access_token.len(),
            tokens.refresh_token.is_some(),
            tokens.id_token.is_some(),
            tokens.expires_at
        );
    }

    pub fn log_session_issued(user_id: &str, strategy: &str, chunks: usize) {
        info!("Session issued for user {user_id} (strategy={strategy}, cookies={chunks})");
    }

    pub fn log_check_failure(provider: &str, detail: &str) {
        warn!("Security check failed for provider '{provider}': {detail}");
    }

    /// Log a failed sign-in with full detail; only the kind reaches the client
    pub fn log_auth_failure(provider: Option<&str>, err: &AuthError) {
        let provider = provider.unwrap_or("<unknown>");
        match err.kind() {
            ErrorKind::CallbackRouteError
            | ErrorKind::AuthorizedCallbackError
            | ErrorKind::MissingProvider => {
                error!("Sign-in via '{provider}' failed ({}): {err}", err.kind());
            }
            kind => warn!("Sign-in via '{provider}' failed ({kind}): {err}"),
        }
    }

    pub fn log_provider_configured(id: &str, flow: FlowType) {
        info!("Provider '{id}' configured ({})", flow.as_str());
    }

    pub fn log_provider_disabled(id: &str) {
        info!("Provider '{id}' is disabled, skipping");
    }

    pub fn log_providers_summary(ids: &[&str]) {
        info!("Configured providers: {ids:?}");
    }

    pub fn log_redirect(target: &str) {
        debug!("Redirecting to {target}");
    }
}
