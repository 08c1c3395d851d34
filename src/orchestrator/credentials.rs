// Credentials flow
use actix_web::cookie::Cookie;
use anyhow::anyhow;
use std::collections::HashMap;

use super::{AuthRequest, AuthResponse, CallbackOrchestrator, RequestMethod, CALLBACK_URL_PARAM};
use crate::checks::csrf;
use crate::error::AuthError;
use crate::providers::{CredentialsProvider, Provider};

impl CallbackOrchestrator {
    pub(super) async fn credentials_callback(
        &self,
        provider: &Provider,
        credentials: &CredentialsProvider,
        request: &AuthRequest,
        cookies: &mut Vec<Cookie<'static>>,
    ) -> Result<AuthResponse, AuthError> {
        if request.method != RequestMethod::Post {
            return Err(AuthError::CallbackRoute(anyhow!(
                "credentials must be posted to the callback"
            )));
        }
        self.verify_csrf(request)?;

        let submitted: HashMap<String, String> = request
            .form
            .iter()
            .filter(|(key, _)| key.as_str() != csrf::FORM_FIELD && key.as_str() != CALLBACK_URL_PARAM)
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let user = credentials
            .authorizer
            .authorize(&submitted, request)
            .await
            .map_err(|e| AuthError::CallbackRoute(anyhow!("credentials authorizer failed: {e}")))?
            .ok_or_else(|| AuthError::CredentialsSignin {
                provider: provider.id.clone(),
            })?;

        let resolution = self.identity.resolve_credentials(&provider.id, user).await?;
        self.complete(resolution, request, None, cookies).await
    }
}
