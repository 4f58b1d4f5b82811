use std::fmt;

use serde::Serialize;

/// In-memory login status and token.
///
/// Both fields unset means the persisted token has not been checked yet
/// (or nothing was found); `authenticated: Some(false)` means the user
/// explicitly signed out. Fields are private so that `authenticated == true`
/// always comes with a token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Session {
    token: Option<String>,
    authenticated: Option<bool>,
}

impl Session {
    /// Initial state before the startup restore has found anything.
    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn authenticated(token: String) -> Self {
        Self {
            token: Some(token),
            authenticated: Some(true),
        }
    }

    pub fn signed_out() -> Self {
        Self {
            token: None,
            authenticated: Some(false),
        }
    }

    /// Get the bearer token if signed in
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Raw authentication flag; `None` while unknown
    pub fn authenticated_flag(&self) -> Option<bool> {
        self.authenticated
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated == Some(true)
    }

    pub fn is_unknown(&self) -> bool {
        self.authenticated.is_none()
    }

    pub fn state(&self) -> SessionState {
        match (&self.token, self.authenticated) {
            (Some(token), Some(true)) => SessionState::Authenticated(token.clone()),
            (_, Some(_)) => SessionState::Unauthenticated,
            (_, None) => SessionState::Unknown,
        }
    }
}

/// State machine view of a [`Session`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unknown,
    Authenticated(String),
    Unauthenticated,
}

impl From<&Session> for SessionState {
    fn from(session: &Session) -> Self {
        session.state()
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Unknown => f.write_str("unknown"),
            SessionState::Authenticated(_) => f.write_str("authenticated"),
            SessionState::Unauthenticated => f.write_str("signed out"),
        }
    }
}
