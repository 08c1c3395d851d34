//! OAuth2 / OIDC protocol plumbing
//!
//! Authorization request construction, the code-for-token exchange, ID
//! token verification and the HTTP client behind them.

pub mod authorization;
pub mod client;
pub mod exchange;
pub mod jwt_validation;

pub use authorization::{build_authorization_redirect, AuthorizationRedirect};
pub use client::{HttpOAuthClient, OAuthClient, TokenRequest, TokenResponse};
pub use exchange::{AuthorizationExchange, CallbackInput};
pub use jwt_validation::{IdTokenExpectations, JsonWebKey, JsonWebKeySet, JwtValidator};
