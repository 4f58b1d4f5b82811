//! Core library for unipass.
//!
//! Signs in against the student portal API with a registration number and
//! password or a scanned QR code, keeps the resulting bearer token in a
//! durable credential store, and restores it on the next start.
//!
//! ```no_run
//! # async fn run() -> anyhow::Result<()> {
//! use unipass_core::{Config, SessionManager, Settings};
//!
//! let config = Config::from_env(&Settings::load()?)?;
//! let manager = SessionManager::open(&config).await?;
//! if !manager.is_authenticated() {
//!     match manager.sign_in_with_credentials("A000123", "pw", None).await {
//!         Ok(_) => println!("signed in"),
//!         Err(e) => println!("{}", serde_json::to_string(&e.to_failure())?),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod utils;

pub use api::{ApiClient, ApiError};
pub use auth::{
    AuthError, CredentialStore, RestoreOutcome, Session, SessionManager, SessionState,
    SignInFailure, SignOutOutcome, StoreError,
};
pub use config::{Config, ConfigError, CredentialBackend, Settings};
