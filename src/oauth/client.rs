//! Network collaborator for the authorization exchange
//!
//! Every call is a single attempt. Timeouts are configured on the HTTP
//! client and surface as [`ExchangeError::Network`].

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::error::ExchangeError;
use crate::oauth::jwt_validation::JsonWebKeySet;

/// Parameters of an authorization-code grant
#[derive(Debug, Clone)]
pub struct TokenRequest {
    pub token_endpoint: String,
    pub code: String,
    pub redirect_uri: String,
    pub client_id: String,
    pub client_secret: Option<String>,
    /// PKCE verifier, when the provider requires the `pkce` check
    pub code_verifier: Option<String>,
}

impl TokenRequest {
    /// Form body of the token request
    #[must_use]
    pub fn form(&self) -> Vec<(&'static str, &str)> {
        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("code", self.code.as_str()),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("client_id", self.client_id.as_str()),
        ];
        if let Some(secret) = &self.client_secret {
            params.push(("client_secret", secret.as_str()));
        }
        if let Some(verifier) = &self.code_verifier {
            params.push(("code_verifier", verifier.as_str()));
        }
        params
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    pub token_type: Option<String>,
    pub expires_in: Option<i64>,
    pub scope: Option<String>,
}

#[async_trait]
pub trait OAuthClient: Send + Sync {
    async fn exchange_code(&self, request: &TokenRequest) -> Result<TokenResponse, ExchangeError>;

    async fn fetch_userinfo(&self, endpoint: &str, access_token: &str) -> Result<Value, ExchangeError>;

    async fn fetch_jwks(&self, jwks_uri: &str) -> Result<JsonWebKeySet, ExchangeError>;
}

/// [`OAuthClient`] over `reqwest`
#[derive(Clone)]
pub struct HttpOAuthClient {
    http_client: reqwest::Client,
}

impl HttpOAuthClient {
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialized
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("authgate/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { http_client })
    }
}

fn network_error(err: &reqwest::Error) -> ExchangeError {
    if err.is_timeout() {
        ExchangeError::Network("request timed out".to_string())
    } else {
        ExchangeError::Network(err.to_string())
    }
}

async fn read_json(response: reqwest::Response) -> Result<Value, ExchangeError> {
    let status = response.status();
    let body = response.text().await.map_err(|e| network_error(&e))?;
    if !status.is_success() {
        return Err(ExchangeError::TokenEndpoint {
            status: status.as_u16(),
            body,
        });
    }
    serde_json::from_str(&body).map_err(|e| ExchangeError::InvalidResponse(e.to_string()))
}

#[async_trait]
impl OAuthClient for HttpOAuthClient {
    async fn exchange_code(&self, request: &TokenRequest) -> Result<TokenResponse, ExchangeError> {
        let response = self
            .http_client
            .post(&request.token_endpoint)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&request.form())
            .send()
            .await
            .map_err(|e| network_error(&e))?;

        let value = read_json(response).await?;
        // Some providers report grant errors with a 200 status
        if let Some(error) = value.get("error").and_then(Value::as_str) {
            return Err(ExchangeError::Provider {
                error: error.to_string(),
                description: value
                    .get("error_description")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            });
        }
        serde_json::from_value(value).map_err(|e| ExchangeError::InvalidResponse(format!("token response: {e}")))
    }

    async fn fetch_userinfo(&self, endpoint: &str, access_token: &str) -> Result<Value, ExchangeError> {
        let response = self
            .http_client
            .get(endpoint)
            .bearer_auth(access_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| network_error(&e))?;
        read_json(response).await
    }

    async fn fetch_jwks(&self, jwks_uri: &str) -> Result<JsonWebKeySet, ExchangeError> {
        let response = self
            .http_client
            .get(jwks_uri)
            .send()
            .await
            .map_err(|e| network_error(&e))?;
        let value = read_json(response).await?;
        serde_json::from_value(value).map_err(|e| ExchangeError::InvalidResponse(format!("JWKS: {e}")))
    }
}
