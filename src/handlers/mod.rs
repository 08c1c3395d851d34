// HTTP request handlers mounting the engine into actix-web
pub mod auth;
pub mod pages;

#[cfg(test)]
mod tests;

use actix_web::web;

pub use auth::{auth_request, callback, csrf, session, sign_in, sign_out};
pub use pages::{error_page, health, sign_in_page, verify_request_page};

/// Register the auth routes under `base_path`, plus `/health`
///
/// Expects `web::Data<CallbackOrchestrator>` and `web::Data<AuthSettings>`
/// in the app data.
pub fn configure(cfg: &mut web::ServiceConfig, base_path: &str) {
    let base = base_path.trim_end_matches('/');
    cfg.route("/health", web::get().to(health)).service(
        web::scope(base)
            .route("/signin", web::get().to(sign_in_page))
            .route("/signin/{provider}", web::post().to(sign_in))
            .route("/callback/{provider}", web::get().to(callback))
            .route("/callback/{provider}", web::post().to(callback))
            .route("/session", web::get().to(session))
            .route("/signout", web::post().to(sign_out))
            .route("/csrf", web::get().to(csrf))
            .route("/error", web::get().to(error_page))
            .route("/verify-request", web::get().to(verify_request_page)),
    );
}
