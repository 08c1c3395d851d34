// Built-in pages: health, sign-in, error and verify-request
use std::collections::HashMap;

use actix_web::{web, HttpRequest, HttpResponse, Result};

use super::auth::auth_request;
use crate::checks::csrf::FORM_FIELD;
use crate::models::HealthResponse;
use crate::orchestrator::{CallbackOrchestrator, CALLBACK_URL_PARAM};
use crate::providers::{FlowType, Provider};
use crate::settings::AuthSettings;

/// Health check endpoint
///
/// # Errors
/// Never fails
pub async fn health() -> Result<HttpResponse> {
    let response = HealthResponse {
        status: "ok".to_string(),
        message: "authgate is running".to_string(),
    };
    Ok(HttpResponse::Ok().json(response))
}

/// Escape text for HTML bodies and attribute values
fn escape(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '&' => "&amp;".to_string(),
            '<' => "&lt;".to_string(),
            '>' => "&gt;".to_string(),
            '"' => "&quot;".to_string(),
            '\'' => "&#39;".to_string(),
            other => other.to_string(),
        })
        .collect()
}

fn page(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{title}</title>
    <style>
        body {{ font-family: system-ui, sans-serif; background: #f4f5f7; display: flex; justify-content: center; padding-top: 10vh; }}
        .container {{ background: white; padding: 32px; border-radius: 8px; width: 360px; box-shadow: 0 4px 16px rgba(0, 0, 0, 0.08); }}
        .provider {{ margin: 12px 0; }}
        button, input {{ width: 100%; padding: 10px; margin-top: 6px; box-sizing: border-box; }}
        .error {{ color: #b00020; }}
    </style>
</head>
<body>
    <div class="container">
{body}
    </div>
</body>
</html>"#,
        title = escape(title)
    )
}

fn provider_form(provider: &Provider, base_path: &str, csrf_token: &str, callback_url: &str) -> String {
    let name = escape(&provider.name);
    let id = escape(&provider.id);
    let hidden = format!(
        r#"<input type="hidden" name="{FORM_FIELD}" value="{}"><input type="hidden" name="{CALLBACK_URL_PARAM}" value="{}">"#,
        escape(csrf_token),
        escape(callback_url)
    );
    match provider.flow_type() {
        FlowType::OAuth | FlowType::Oidc => format!(
            r#"<form class="provider" method="post" action="{base_path}/signin/{id}">{hidden}<button type="submit">Sign in with {name}</button></form>"#
        ),
        FlowType::Email => format!(
            r#"<form class="provider" method="post" action="{base_path}/signin/{id}">{hidden}<input type="email" name="email" placeholder="email@example.com" required><button type="submit">Sign in with {name}</button></form>"#
        ),
        FlowType::Credentials => format!(
            r#"<form class="provider" method="post" action="{base_path}/callback/{id}">{hidden}<input name="username" placeholder="Username"><input type="password" name="password" placeholder="Password"><button type="submit">Sign in with {name}</button></form>"#
        ),
    }
}

/// Sign-in page listing every configured provider
///
/// # Errors
/// Never fails
pub async fn sign_in_page(
    req: HttpRequest,
    query: web::Query<HashMap<String, String>>,
    auth: web::Data<CallbackOrchestrator>,
    settings: web::Data<AuthSettings>,
) -> Result<HttpResponse> {
    let request = auth_request(&req, query, None);
    let csrf = auth.csrf_token(&request);
    let callback_url = request.param(CALLBACK_URL_PARAM).unwrap_or("");
    let base_path = escape(settings.application.base_path.trim_end_matches('/'));

    let mut body = String::from("        <h1>Sign in</h1>\n");
    if let Some(error) = request.param("error") {
        body.push_str(&format!("        <p class=\"error\">Sign-in failed: {}</p>\n", escape(error)));
    }
    let providers = auth.providers();
    if providers.is_empty() {
        body.push_str("        <p>No providers are configured.</p>\n");
    }
    for provider in providers.iter() {
        body.push_str("        ");
        body.push_str(&provider_form(provider, &base_path, &csrf.csrf_token, callback_url));
        body.push('\n');
    }

    let mut response = HttpResponse::Ok();
    if let Some(cookie) = csrf.cookie {
        response.cookie(cookie);
    }
    Ok(response.content_type("text/html").body(page("Sign in", &body)))
}

/// Error page; shows only the error kind
///
/// # Errors
/// Never fails
pub async fn error_page(query: web::Query<HashMap<String, String>>) -> Result<HttpResponse> {
    let kind = query.get("error").map_or("Unknown", String::as_str);
    let body = format!(
        "        <h1>Authentication error</h1>\n        <p class=\"error\">{}</p>\n",
        escape(kind)
    );
    Ok(HttpResponse::Ok()
        .content_type("text/html")
        .body(page("Authentication error", &body)))
}

/// Shown after an email sign-in link was sent
///
/// # Errors
/// Never fails
pub async fn verify_request_page() -> Result<HttpResponse> {
    let body = "        <h1>Check your email</h1>\n        <p>A sign-in link has been sent to your email address.</p>\n";
    Ok(HttpResponse::Ok()
        .content_type("text/html")
        .body(page("Check your email", body)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape() {
        assert_eq!(escape(r#"<a href="x">'&'</a>"#), "&lt;a href=&quot;x&quot;&gt;&#39;&amp;&#39;&lt;/a&gt;");
    }
}
