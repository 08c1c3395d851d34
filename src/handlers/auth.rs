// Auth endpoints: sign-in, callback, session, sign-out and CSRF token
use std::collections::HashMap;

use actix_web::{web, HttpRequest, HttpResponse, Result};
use log::{debug, info};
use serde::Serialize;

use crate::orchestrator::{AuthRequest, CallbackOrchestrator, RequestMethod};
use crate::utils::response_builder::ResponseBuilder;

type Params = web::Query<HashMap<String, String>>;
type FormParams = Option<web::Form<HashMap<String, String>>>;

/// Reduce an actix request to what the engine reads
pub fn auth_request(req: &HttpRequest, query: Params, form: FormParams) -> AuthRequest {
    let cookies = req
        .cookies()
        .map(|jar| {
            jar.iter()
                .map(|c| (c.name().to_string(), c.value().to_string()))
                .collect()
        })
        .unwrap_or_default();
    let method = if req.method() == actix_web::http::Method::POST {
        RequestMethod::Post
    } else {
        RequestMethod::Get
    };

    AuthRequest {
        method,
        query: query.into_inner(),
        form: form.map(web::Form::into_inner).unwrap_or_default(),
        cookies,
    }
}

/// Start a sign-in with a provider
///
/// # Errors
///
/// Never fails; engine errors become redirects
pub async fn sign_in(
    req: HttpRequest,
    provider: web::Path<String>,
    query: Params,
    form: FormParams,
    auth: web::Data<CallbackOrchestrator>,
) -> Result<HttpResponse> {
    let provider = provider.into_inner();
    let request = auth_request(&req, query, form);
    debug!("Sign-in requested for provider '{provider}' via {}", req.method());
    let response = auth.handle_sign_in(&provider, &request).await;
    Ok(ResponseBuilder::from_auth_response(response))
}

/// Provider callback (GET for query responses, POST for `form_post`)
///
/// # Errors
///
/// Never fails; engine errors become redirects
pub async fn callback(
    req: HttpRequest,
    provider: web::Path<String>,
    query: Params,
    form: FormParams,
    auth: web::Data<CallbackOrchestrator>,
) -> Result<HttpResponse> {
    let provider = provider.into_inner();
    let request = auth_request(&req, query, form);
    let response = auth.handle_callback(&provider, &request).await;
    Ok(ResponseBuilder::from_auth_response(response))
}

/// Current session as JSON, `null` when signed out
///
/// # Errors
///
/// Never fails; engine errors become a JSON error body
pub async fn session(
    req: HttpRequest,
    query: Params,
    auth: web::Data<CallbackOrchestrator>,
) -> Result<HttpResponse> {
    let request = auth_request(&req, query, None);
    match auth.session(&request).await {
        Ok(read) => Ok(ResponseBuilder::json_with_cookies(&read.session, read.cookies)),
        Err(err) => {
            let kind = err.kind();
            Ok(ResponseBuilder::json_error(kind.status(), kind.as_str()))
        }
    }
}

/// End the session
///
/// # Errors
///
/// Never fails; engine errors become redirects
pub async fn sign_out(
    req: HttpRequest,
    query: Params,
    form: FormParams,
    auth: web::Data<CallbackOrchestrator>,
) -> Result<HttpResponse> {
    let request = auth_request(&req, query, form);
    let response = auth.handle_sign_out(&request).await;
    if response.error.is_none() {
        info!("User signed out");
    }
    Ok(ResponseBuilder::from_auth_response(response))
}

#[derive(Serialize)]
struct CsrfBody {
    #[serde(rename = "csrfToken")]
    csrf_token: String,
}

/// Double-submit CSRF token for form posts
///
/// # Errors
///
/// Never fails
pub async fn csrf(req: HttpRequest, query: Params, auth: web::Data<CallbackOrchestrator>) -> Result<HttpResponse> {
    let request = auth_request(&req, query, None);
    let token = auth.csrf_token(&request);
    Ok(ResponseBuilder::json_with_cookies(
        &CsrfBody {
            csrf_token: token.csrf_token,
        },
        token.cookie.into_iter().collect(),
    ))
}
