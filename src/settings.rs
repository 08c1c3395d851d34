use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::checks::CheckKind;
use crate::providers::FlowType;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AuthSettings {
    pub application: ApplicationSettings,
    pub session: SessionSettings,
    pub cookies: CookieSettings,
    pub pages: PageSettings,
    pub security: SecuritySettings,
    pub logging: LoggingSettings,
    pub providers: Vec<ProviderSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationSettings {
    pub host: String,
    pub port: u16,
    /// Public origin of this deployment, used for provider redirect URIs and
    /// as the fallback `callbackUrl`
    pub base_url: String,
    /// Path the auth routes are mounted under
    pub base_path: String,
    /// When set, this deployment sits behind a redirect proxy: provider
    /// callbacks land on the proxy, which bounces them to the origin
    /// recorded in the state check
    pub redirect_proxy_url: Option<String>,
}

/// Where sessions live
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionStrategy {
    /// Self-contained signed token in the session cookie
    #[default]
    Jwt,
    /// Opaque cookie referencing a server-side session row
    Database,
}

impl SessionStrategy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Jwt => "jwt",
            Self::Database => "database",
        }
    }
}

impl std::str::FromStr for SessionStrategy {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "jwt" => Ok(Self::Jwt),
            "database" => Ok(Self::Database),
            other => bail!("Unknown session strategy '{other}'"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub strategy: SessionStrategy,
    /// Session lifetime in seconds (default 30 days)
    pub max_age_seconds: u64,
    /// Minimum interval between expiry extensions of a database session
    pub update_age_seconds: u64,
    /// Root secret every cookie and token key is derived from
    pub secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieSettings {
    pub secure: bool,
    pub prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PageSettings {
    pub sign_in: String,
    pub error: String,
    /// Shown after an email sign-in link was sent
    pub verify_request: String,
    pub new_user: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySettings {
    /// Require the double-submit CSRF token on form posts
    pub csrf_check: bool,
    /// Lifetime of state/PKCE/nonce check cookies
    pub check_max_age_seconds: u64,
    /// Tolerance applied to ID token `exp`/`iat`/`nbf`
    pub clock_skew_seconds: u64,
    /// Timeout for every request to a provider
    pub http_timeout_seconds: u64,
    pub jwks_cache_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub id: String,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: FlowType,
    pub issuer: Option<String>,
    pub authorization_endpoint: Option<String>,
    pub token_endpoint: Option<String>,
    pub userinfo_endpoint: Option<String>,
    pub jwks_uri: Option<String>,
    pub scopes: Vec<String>,

    // Direct values (can be overridden by environment variables)
    pub client_id: Option<String>,
    pub client_secret: Option<String>,

    // Environment variable names for overrides
    pub client_id_env: Option<String>,
    pub client_secret_env: Option<String>,

    /// Checks performed on the callback; defaults depend on the flow type
    pub checks: Option<Vec<CheckKind>>,
    pub enabled: bool,
    pub extra_auth_params: Option<HashMap<String, String>>,
    /// Link a new provider account to an existing user with the same email
    pub allow_dangerous_email_account_linking: bool,
    /// Lifetime of email sign-in links
    pub verification_max_age_seconds: u64,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            base_url: "http://localhost:8080".to_string(),
            base_path: "/auth".to_string(),
            redirect_proxy_url: None,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            strategy: SessionStrategy::Jwt,
            max_age_seconds: 30 * 24 * 60 * 60,
            update_age_seconds: 24 * 60 * 60,
            secret: String::new(), // Will be generated if empty
        }
    }
}

impl Default for CookieSettings {
    fn default() -> Self {
        Self {
            secure: true,
            prefix: "authgate".to_string(),
        }
    }
}

impl Default for PageSettings {
    fn default() -> Self {
        Self {
            sign_in: "/auth/signin".to_string(),
            error: "/auth/error".to_string(),
            verify_request: "/auth/verify-request".to_string(),
            new_user: None,
        }
    }
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            csrf_check: true,
            check_max_age_seconds: 15 * 60,
            clock_skew_seconds: 300,
            http_timeout_seconds: 10,
            jwks_cache_seconds: 3600,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: None,
            kind: FlowType::OAuth,
            issuer: None,
            authorization_endpoint: None,
            token_endpoint: None,
            userinfo_endpoint: None,
            jwks_uri: None,
            scopes: Vec::new(),
            client_id: None,
            client_secret: None,
            client_id_env: None,
            client_secret_env: None,
            checks: None,
            enabled: true,
            extra_auth_params: None,
            allow_dangerous_email_account_linking: false,
            verification_max_age_seconds: 24 * 60 * 60,
        }
    }
}

impl AuthSettings {
    /// Load settings from configuration files and environment variables,
    /// then initialize logging
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. Settings.toml in `AUTHGATE_SECRETS_DIR` (if specified and exists)
    /// 3. Settings.toml in the current directory (if exists)
    /// 4. Defaults
    ///
    /// # Errors
    ///
    /// Returns an error if a settings file cannot be read or parsed, if the
    /// resulting configuration is invalid, or if logger initialization fails
    pub fn load() -> Result<Self> {
        Self::load_env_file();

        let secrets_dir = std::env::var("AUTHGATE_SECRETS_DIR").ok().map(PathBuf::from);
        let (mut settings, sources) = Self::load_base_settings(Path::new("."), secrets_dir.as_deref())?;
        let generated_secret = settings.apply_env_overrides();

        Self::initialize_logging(&settings.logging)?;

        for source in &sources {
            log::info!("Loaded settings from {}", source.display());
        }
        if let Some(dir) = secrets_dir.filter(|dir| !dir.join("Settings.toml").exists()) {
            log::info!(
                "AUTHGATE_SECRETS_DIR set but no Settings.toml found at: {}",
                dir.join("Settings.toml").display()
            );
        }
        if generated_secret {
            Self::warn_about_generated_secret();
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Read `Settings.toml` from `root` and then from `secrets_dir`, the
    /// latter replacing the former entirely when present
    ///
    /// # Errors
    ///
    /// Returns an error if a file exists but cannot be read or parsed
    pub fn load_base_settings(
        root: &Path,
        secrets_dir: Option<&Path>,
    ) -> Result<(Self, Vec<PathBuf>)> {
        let mut settings = Self::default();
        let mut sources = Vec::new();

        let default_config_path = root.join("Settings.toml");
        if default_config_path.exists() {
            settings = Self::from_file(&default_config_path)?;
            sources.push(default_config_path);
        }

        if let Some(dir) = secrets_dir {
            let secrets_path = dir.join("Settings.toml");
            if secrets_path.exists() {
                settings = Self::from_file(&secrets_path)?;
                sources.push(secrets_path);
            }
        }

        Ok((settings, sources))
    }

    fn from_file(path: &Path) -> Result<Self> {
        let toml_content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        basic_toml::from_str(&toml_content)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }

    fn initialize_logging(logging: &LoggingSettings) -> Result<()> {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&logging.level))
            .try_init()
            .context("Failed to initialize logger")
    }

    /// Apply environment variable overrides
    ///
    /// Returns `true` when no secret was configured and one was generated.
    pub fn apply_env_overrides(&mut self) -> bool {
        Self::apply_application_env_overrides(&mut self.application);
        Self::apply_cookie_env_overrides(&mut self.cookies);
        Self::apply_logging_env_overrides(&mut self.logging);
        Self::apply_session_env_overrides(&mut self.session)
    }

    fn apply_application_env_overrides(app_settings: &mut ApplicationSettings) {
        if let Ok(host) = std::env::var("HOST") {
            app_settings.host = host;
        }
        if let Ok(port_str) = std::env::var("PORT") {
            if let Ok(port) = port_str.parse::<u16>() {
                app_settings.port = port;
            }
        }
        if let Ok(base_url) = std::env::var("AUTH_URL") {
            app_settings.base_url = base_url;
        }
        if let Ok(proxy) = std::env::var("AUTH_REDIRECT_PROXY_URL") {
            app_settings.redirect_proxy_url = Some(proxy).filter(|p| !p.is_empty());
        }
    }

    /// Apply environment overrides for session settings
    ///
    /// Returns `true` when a random secret had to be generated.
    pub fn apply_session_env_overrides(session_settings: &mut SessionSettings) -> bool {
        Self::apply_numeric_env_override("SESSION_MAX_AGE", &mut session_settings.max_age_seconds);
        Self::apply_numeric_env_override(
            "SESSION_UPDATE_AGE",
            &mut session_settings.update_age_seconds,
        );
        if let Ok(strategy) = std::env::var("SESSION_STRATEGY") {
            match strategy.parse() {
                Ok(parsed) => session_settings.strategy = parsed,
                Err(err) => log::warn!("Ignoring SESSION_STRATEGY: {err}"),
            }
        }

        Self::handle_secret_override(session_settings)
    }

    fn apply_numeric_env_override(env_var: &str, target: &mut u64) {
        if let Ok(value_str) = std::env::var(env_var) {
            if let Ok(value) = value_str.parse::<u64>() {
                *target = value;
            }
        }
    }

    fn handle_secret_override(session_settings: &mut SessionSettings) -> bool {
        let env_secret_set = std::env::var("AUTH_SECRET").is_ok_and(|secret| {
            if secret.is_empty() {
                false
            } else {
                session_settings.secret = secret;
                true
            }
        });

        if !env_secret_set && session_settings.secret.is_empty() {
            session_settings.secret = Self::generate_random_secret();
            return true;
        }
        false
    }

    /// 32 bytes of entropy, base64 encoded
    fn generate_random_secret() -> String {
        use rand::RngCore;
        let mut secret = [0u8; 32];
        rand::rng().fill_bytes(&mut secret);
        general_purpose::STANDARD.encode(secret)
    }

    fn warn_about_generated_secret() {
        log::warn!("Using an auto-generated secret; sessions will not survive a restart");
        log::warn!("Set AUTH_SECRET or session.secret in Settings.toml for production use");
    }

    fn apply_cookie_env_overrides(cookie_settings: &mut CookieSettings) {
        if let Ok(cookie_secure_str) = std::env::var("COOKIE_SECURE") {
            if let Ok(cookie_secure) = cookie_secure_str.parse::<bool>() {
                cookie_settings.secure = cookie_secure;
            }
        }
    }

    fn apply_logging_env_overrides(logging_settings: &mut LoggingSettings) {
        if let Ok(log_level) = std::env::var("RUST_LOG") {
            logging_settings.level = log_level;
        }
    }

    /// Load environment variables from .env file
    fn load_env_file() {
        if let Ok(contents) = std::fs::read_to_string(".env") {
            for line in contents.lines() {
                let line = line.trim();
                if line.starts_with('#') {
                    continue;
                }
                if let Some((key, value)) = line.split_once('=') {
                    std::env::set_var(key.trim(), value.trim());
                }
            }
        }
    }

    /// Check cross-field consistency that serde cannot express
    ///
    /// # Errors
    ///
    /// Returns an error naming the first problem found
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.application.base_url)
            .with_context(|| format!("application.base_url '{}' is not a URL", self.application.base_url))?;
        if let Some(proxy) = &self.application.redirect_proxy_url {
            url::Url::parse(proxy)
                .with_context(|| format!("application.redirect_proxy_url '{proxy}' is not a URL"))?;
        }
        if self.session.secret.is_empty() {
            bail!("session.secret must not be empty");
        }

        let mut seen = std::collections::HashSet::new();
        for provider in &self.providers {
            if provider.id.is_empty() {
                bail!("Every provider needs an id");
            }
            if !seen.insert(provider.id.as_str()) {
                bail!("Duplicate provider id '{}'", provider.id);
            }
        }
        Ok(())
    }

    /// Get the bind address for the server
    #[must_use]
    pub fn get_bind_address(&self) -> String {
        format!("{}:{}", self.application.host, self.application.port)
    }

    /// Get enabled providers
    #[must_use]
    pub fn get_enabled_providers(&self) -> Vec<&ProviderSettings> {
        self.providers.iter().filter(|p| p.enabled).collect()
    }

    /// Get provider by id
    #[must_use]
    pub fn get_provider(&self, id: &str) -> Option<&ProviderSettings> {
        self.providers.iter().find(|p| p.id == id)
    }
}

impl ProviderSettings {
    /// Get the client ID, checking environment variable first, then falling back to direct value
    #[must_use]
    pub fn get_client_id(&self) -> Option<String> {
        Self::env_or(self.client_id_env.as_deref(), self.client_id.as_ref())
    }

    /// Get the client secret, checking environment variable first, then falling back to direct value
    #[must_use]
    pub fn get_client_secret(&self) -> Option<String> {
        Self::env_or(self.client_secret_env.as_deref(), self.client_secret.as_ref())
    }

    fn env_or(env_var: Option<&str>, direct: Option<&String>) -> Option<String> {
        env_var
            .and_then(|name| std::env::var(name).ok())
            .or_else(|| direct.cloned())
    }

    /// Display name, falling back to the id
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Checks configured for the callback, or the flow's defaults
    #[must_use]
    pub fn effective_checks(&self) -> Vec<CheckKind> {
        if let Some(checks) = &self.checks {
            return checks.clone();
        }
        match self.kind {
            FlowType::OAuth => vec![CheckKind::State, CheckKind::Pkce],
            FlowType::Oidc => vec![CheckKind::State, CheckKind::Pkce, CheckKind::Nonce],
            FlowType::Email | FlowType::Credentials => Vec::new(),
        }
    }

    /// Scopes, with the flow's defaults when none are configured
    #[must_use]
    pub fn effective_scopes(&self) -> Vec<String> {
        if !self.scopes.is_empty() {
            return self.scopes.clone();
        }
        match self.kind {
            FlowType::Oidc => vec!["openid".into(), "email".into(), "profile".into()],
            _ => Vec::new(),
        }
    }
}
