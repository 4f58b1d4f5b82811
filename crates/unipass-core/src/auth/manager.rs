//! Session lifecycle: restore, sign-in and sign-out.

use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::header::HeaderValue;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use super::credentials::{open_store, CredentialStore};
use super::{AuthError, Session, SessionState, StoreError};
use crate::api::{ApiClient, CredentialsRequest, QrCodeRequest};
use crate::config::Config;
use crate::utils::redact_token;

/// Credential store key the bearer token is persisted under
pub const TOKEN_KEY: &str = "my-jwt";

/// Result of reading the persisted token at startup.
#[derive(Debug)]
pub enum RestoreOutcome {
    /// A stored token was found; the session is authenticated
    Restored,
    /// Nothing stored; the session keeps its unknown shape
    Empty,
    /// A sign-in or sign-out already settled the session; nothing was read
    AlreadyResolved,
    /// The store could not be read; the session keeps its unknown shape
    StoreUnavailable(StoreError),
}

/// Result of signing out. The in-memory session is cleared either way.
#[derive(Debug)]
pub enum SignOutOutcome {
    Cleared,
    /// The persisted token could not be deleted and may be restored next run
    TokenMayRemain(StoreError),
}

/// Owns the current session and the actions that change it.
///
/// Consumers read the session with [`SessionManager::session`] or follow
/// changes through [`SessionManager::subscribe`]. Outgoing requests take
/// their bearer token from [`SessionManager::client`].
///
/// Sign-in requests are not serialized against each other: two overlapping
/// calls both reach the server and the result applied last wins. Applying a
/// result and signing out run under one lock, so the session and the stored
/// token always agree once an operation has returned.
pub struct SessionManager {
    api: ApiClient,
    store: Arc<dyn CredentialStore>,
    state: watch::Sender<Session>,
    apply_lock: Mutex<()>,
}

impl SessionManager {
    /// Create a manager in the unknown state without touching the store.
    pub fn new(api: ApiClient, store: Arc<dyn CredentialStore>) -> Self {
        let (state, _) = watch::channel(Session::unknown());
        Self {
            api,
            store,
            state,
            apply_lock: Mutex::new(()),
        }
    }

    /// Create a manager and restore any persisted token.
    pub async fn init(api: ApiClient, store: Arc<dyn CredentialStore>) -> Self {
        let manager = Self::new(api, store);
        let outcome = manager.restore_on_startup().await;
        debug!(?outcome, "Startup restore finished");
        manager
    }

    /// Build the HTTP client and credential store from configuration, then
    /// restore any persisted token.
    pub async fn open(config: &Config) -> Result<Self> {
        let api = ApiClient::new(config).context("Failed to build HTTP client")?;
        let store = open_store(config);
        Ok(Self::init(api, store).await)
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    /// Snapshot of the current session
    pub fn session(&self) -> Session {
        self.state.borrow().clone()
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().state()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated()
    }

    pub fn token(&self) -> Option<String> {
        self.state.borrow().token().map(str::to_string)
    }

    /// Receiver that observes every applied session change
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.state.subscribe()
    }

    /// API client carrying the current bearer token, if signed in
    pub fn client(&self) -> ApiClient {
        match self.token() {
            Some(token) => self.api.with_token(token),
            None => self.api.clone(),
        }
    }

    /// `Authorization: Bearer <token>` for the current session
    pub fn authorization_header(&self) -> Option<HeaderValue> {
        self.token().and_then(|token| bearer_header(&token))
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Read the persisted token and mark the session authenticated if found.
    ///
    /// Only applies while the session is still unknown, so a sign-in that
    /// finished first is never overwritten by an older stored token.
    pub async fn restore_on_startup(&self) -> RestoreOutcome {
        let _guard = self.apply_lock.lock().await;

        if !self.state.borrow().is_unknown() {
            return RestoreOutcome::AlreadyResolved;
        }

        let stored = match self.store.get(TOKEN_KEY).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(error = %e, "Failed to read stored token, session stays unknown");
                return RestoreOutcome::StoreUnavailable(e);
            }
        };

        match stored {
            Some(token) if usable_token(&token) => {
                info!(token = %redact_token(&token), "Restored session from credential store");
                self.state.send_replace(Session::authenticated(token));
                RestoreOutcome::Restored
            }
            Some(_) => {
                warn!("Stored token is empty or not usable as a header value, ignoring it");
                RestoreOutcome::Empty
            }
            None => {
                debug!("No stored token");
                RestoreOutcome::Empty
            }
        }
    }

    /// Sign in with registration number and password.
    pub async fn sign_in_with_credentials(
        &self,
        identifier: &str,
        secret: &str,
        push_token: Option<&str>,
    ) -> Result<String, AuthError> {
        debug!(has_push_token = push_token.is_some(), "Signing in with credentials");
        let request = CredentialsRequest {
            reg_no: identifier,
            password: secret,
            push_token,
        };
        let result = self.api.sign_in(&request).await;
        self.finish_sign_in(result).await
    }

    /// Sign in with a scanned QR code.
    pub async fn sign_in_with_scanned_code(
        &self,
        code: &str,
        push_token: Option<&str>,
    ) -> Result<String, AuthError> {
        debug!(has_push_token = push_token.is_some(), "Signing in with scanned code");
        let request = QrCodeRequest {
            qr_code: code,
            push_token,
        };
        let result = self.api.sign_in_qr(&request).await;
        self.finish_sign_in(result).await
    }

    async fn finish_sign_in(&self, result: Result<String, AuthError>) -> Result<String, AuthError> {
        let token = match result {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, code = ?e.code(), "Sign-in failed");
                return Err(e);
            }
        };

        if !usable_token(&token) {
            let e = AuthError::InvalidResponse("access token is not a valid header value".to_string());
            warn!(error = %e, "Sign-in failed");
            return Err(e);
        }

        let _guard = self.apply_lock.lock().await;
        self.state.send_replace(Session::authenticated(token.clone()));

        // The session stays valid for this run even if it cannot be persisted
        if let Err(e) = self.store.set(TOKEN_KEY, &token).await {
            warn!(error = %e, "Failed to persist token, session will not survive a restart");
        }

        info!(token = %redact_token(&token), "Signed in");
        Ok(token)
    }

    /// Forget the session and delete the persisted token.
    pub async fn sign_out(&self) -> SignOutOutcome {
        let _guard = self.apply_lock.lock().await;

        let outcome = match self.store.delete(TOKEN_KEY).await {
            Ok(()) => SignOutOutcome::Cleared,
            Err(e) => {
                warn!(error = %e, "Failed to delete stored token");
                SignOutOutcome::TokenMayRemain(e)
            }
        };

        self.state.send_replace(Session::signed_out());
        info!("Signed out");
        outcome
    }
}

fn usable_token(token: &str) -> bool {
    !token.trim().is_empty() && bearer_header(token).is_some()
}

fn bearer_header(token: &str) -> Option<HeaderValue> {
    let mut value = HeaderValue::from_str(&format!("Bearer {}", token)).ok()?;
    value.set_sensitive(true);
    Some(value)
}
