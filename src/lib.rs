#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

/// Version of the authgate library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod adapter;
pub mod callbacks;
pub mod checks;
pub mod error;
pub mod events;
pub mod handlers;
pub mod identity;
pub mod models;
pub mod oauth;
pub mod orchestrator;
pub mod providers;
pub mod session;
pub mod settings;
pub mod utils;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

/// Re-export commonly used items
pub use adapter::{Adapter, MemoryAdapter};
pub use callbacks::{AuthCallbacks, DefaultCallbacks};
pub use error::{AuthError, ErrorKind};
pub use events::EventHandler;
pub use orchestrator::{AuthRequest, AuthResponse, CallbackOrchestrator, OrchestratorBuilder};
pub use providers::{CredentialsAuthorizer, EmailSender, Provider};
pub use settings::{AuthSettings, SessionStrategy};
