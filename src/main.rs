#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use std::sync::Arc;

use actix_web::{middleware::Logger, web, App, HttpServer};
use authgate::{
    adapter::{Adapter, MemoryAdapter},
    handlers::configure,
    providers::{EmailSender, FlowType, LogEmailSender},
    settings::AuthSettings,
    CallbackOrchestrator,
};
use log::{info, warn};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Loads .env and Settings.toml and initializes the logger
    let settings = AuthSettings::load()
        .map_err(|e| std::io::Error::other(format!("Failed to load settings: {e}")))?;

    let uses_email = settings
        .get_enabled_providers()
        .iter()
        .any(|p| p.kind == FlowType::Email);
    if uses_email {
        warn!("Email sign-in links are only logged; embed authgate with a real EmailSender for production");
    }

    let orchestrator = CallbackOrchestrator::builder(&settings)
        .adapter(Arc::new(MemoryAdapter::new()) as Arc<dyn Adapter>)
        .email_sender(Arc::new(LogEmailSender) as Arc<dyn EmailSender>)
        .build()
        .map_err(|e| std::io::Error::other(format!("Failed to initialize auth engine: {e}")))?;

    start_server(orchestrator, settings).await
}

/// Start the HTTP server
///
/// # Errors
///
/// Returns an error if binding or running the server fails
async fn start_server(orchestrator: CallbackOrchestrator, settings: AuthSettings) -> std::io::Result<()> {
    let bind_address = settings.get_bind_address();
    print_startup_info(&bind_address, &settings);

    let orchestrator = web::Data::new(orchestrator);
    let base_path = settings.application.base_path.clone();
    let settings = web::Data::new(settings);

    HttpServer::new(move || {
        let base_path = base_path.clone();
        App::new()
            .app_data(orchestrator.clone())
            .app_data(settings.clone())
            .wrap(Logger::default())
            .configure(move |cfg| configure(cfg, &base_path))
    })
    .bind(&bind_address)?
    .run()
    .await
}

fn print_startup_info(bind_address: &str, settings: &AuthSettings) {
    let base = settings.application.base_path.trim_end_matches('/');
    info!("Starting authgate v{} on http://{bind_address}", authgate::VERSION);
    info!("Session strategy: {}", settings.session.strategy.as_str());
    info!("Endpoints:");
    info!("  GET      {base}/signin               - Sign-in page");
    info!("  POST     {base}/signin/{{provider}}    - Start a sign-in");
    info!("  GET|POST {base}/callback/{{provider}}  - Provider callback");
    info!("  GET      {base}/session              - Current session");
    info!("  POST     {base}/signout              - Sign out");
    info!("  GET      {base}/csrf                 - CSRF token");
    info!("  GET      /health                     - Health check");
    match &settings.application.redirect_proxy_url {
        Some(proxy) => info!("Callback URL for identity providers: {}/callback/{{provider}}", proxy.trim_end_matches('/')),
        None => info!(
            "Callback URL for identity providers: {}{base}/callback/{{provider}}",
            settings.application.base_url.trim_end_matches('/')
        ),
    }
}
