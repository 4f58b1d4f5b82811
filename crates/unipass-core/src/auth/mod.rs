//! Authentication module for managing the user session.
//!
//! This module provides:
//! - `Session`: In-memory login status and bearer token
//! - `SessionManager`: Sign-in, sign-out and startup restore
//! - `CredentialStore`: Durable token storage (OS keychain, file, memory)
//!
//! The token is persisted under a single fixed key and restored on startup.

mod crypto;
pub mod credentials;
pub mod error;
pub mod manager;
pub mod session;

pub use credentials::{open_store, CredentialStore, FileStore, KeyringStore, MemoryStore};
pub use error::{AuthError, SignInFailure, StoreError};
pub use manager::{RestoreOutcome, SessionManager, SignOutOutcome, TOKEN_KEY};
pub use session::{Session, SessionState};
