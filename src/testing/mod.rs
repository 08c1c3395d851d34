//! Shared test utilities
//!
//! Compiled for unit tests and, behind the `testing` feature, for the
//! integration tests under `tests/`.
//!
//! - [`fixtures`] - providers, users, settings and signed ID tokens
//! - [`builders`] - a fluent builder for fully wired orchestrators
//! - [`requests`] - [`AuthRequest`](crate::orchestrator::AuthRequest) construction and cookie jars
//! - [`assertions`] - checks on orchestrator responses
//! - [`mock`] - fake provider client, email sender, authorizer and event sink
//!
//! ## Usage
//!
//! ```rust,ignore
//! use authgate::testing::{CookieJar, TestAuth};
//!
//! let auth = TestAuth::builder().oidc("idp").build();
//! let mut jar = CookieJar::new();
//! let request = auth.sign_in_request(&mut jar).build();
//! let response = auth.orchestrator.handle_sign_in("idp", &request).await;
//! ```

pub mod assertions;
pub mod builders;
pub mod fixtures;
pub mod mock;
pub mod requests;

pub use assertions::*;
pub use builders::{TestAuth, TestAuthBuilder};
pub use fixtures::TestFixtures;
pub use requests::{CookieJar, RequestBuilder};

/// Common test constants
pub mod constants {
    /// Root secret of test deployments
    pub const TEST_SECRET: &str = "test-secret-with-enough-entropy-0123456789";

    /// Public base URL of test deployments
    pub const TEST_BASE_URL: &str = "https://app.example.com";

    /// Issuer of the fixture OIDC provider
    pub const TEST_ISSUER: &str = "https://idp.example.com";

    /// Client id registered with the fixture providers
    pub const TEST_CLIENT_ID: &str = "client-1";

    /// `kid` of the fixture P-256 signing key
    pub const TEST_EC_KID: &str = "test-ec-key";

    pub const TEST_EMAIL: &str = "test@example.com";

    pub const TEST_USER_NAME: &str = "Test User";

    /// Cookie prefix of test deployments
    pub const TEST_COOKIE_PREFIX: &str = "authgate";
}
