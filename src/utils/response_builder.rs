use actix_web::{cookie::Cookie, HttpResponse};
use log::{debug, warn};
use serde::Serialize;

use crate::orchestrator::AuthResponse;

pub struct ResponseBuilder;

impl ResponseBuilder {
    /// Create a redirect response with optional cookies
    #[must_use]
    pub fn redirect(location: &str, cookies: Option<Vec<Cookie<'static>>>) -> HttpResponse {
        let mut builder = HttpResponse::Found();

        if let Some(cookies_vec) = cookies {
            for cookie in cookies_vec {
                builder.cookie(cookie);
            }
        }

        builder.append_header(("Location", location)).finish()
    }

    /// Render an engine response
    ///
    /// Always a `302 Found`, since browsers do not follow `Location` on error
    /// statuses; the logical status is only logged.
    #[must_use]
    pub fn from_auth_response(response: AuthResponse) -> HttpResponse {
        match response.error {
            Some(kind) => warn!(
                "Auth request ended with {} (status {}), redirecting to error page",
                kind.as_str(),
                response.status
            ),
            None => debug!("Auth request succeeded with {} cookies", response.cookies.len()),
        }
        Self::redirect(&response.redirect, Some(response.cookies))
    }

    /// JSON body plus cookies
    pub fn json_with_cookies<T: Serialize>(body: &T, cookies: Vec<Cookie<'static>>) -> HttpResponse {
        let mut builder = HttpResponse::Ok();
        for cookie in cookies {
            builder.cookie(cookie);
        }
        builder.json(body)
    }

    /// JSON error body carrying only the error kind name
    #[must_use]
    pub fn json_error(status: u16, kind: &str) -> HttpResponse {
        let status = actix_web::http::StatusCode::from_u16(status)
            .unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR);
        HttpResponse::build(status).json(serde_json::json!({ "error": kind }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_error_responses_render_as_redirects() {
        let response = ResponseBuilder::from_auth_response(AuthResponse {
            status: 401,
            redirect: "https://app.example.com/auth/signin?error=CredentialsSignin".into(),
            cookies: vec![Cookie::new("authgate.state", "")],
            error: Some(ErrorKind::CredentialsSignin),
        });
        assert_eq!(response.status().as_u16(), 302);
        assert_eq!(
            response.headers().get("Location").unwrap(),
            "https://app.example.com/auth/signin?error=CredentialsSignin"
        );
        assert_eq!(response.cookies().count(), 1);
    }

    #[test]
    fn test_json_error() {
        assert_eq!(ResponseBuilder::json_error(403, "AccessDenied").status().as_u16(), 403);
        assert_eq!(ResponseBuilder::json_error(42, "Broken").status().as_u16(), 500);
    }
}
