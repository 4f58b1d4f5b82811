use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::utils::truncate_string;

/// Maximum length for remote error messages kept in `AuthError`
const MAX_ERROR_MESSAGE_LENGTH: usize = 200;

/// Failure of a sign-in attempt against the remote auth service.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Sign-in rejected ({status}): {message}")]
    Remote {
        status: reqwest::StatusCode,
        /// `statusCode` reported in the error body, if any
        code: Option<u16>,
        message: String,
    },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Error body shape returned by the auth service on failure.
#[derive(Debug, Default, Deserialize)]
struct RemoteErrorBody {
    #[serde(rename = "statusCode")]
    status_code: Option<u16>,
    message: Option<serde_json::Value>,
}

impl AuthError {
    /// Build an error from a non-success response status and raw body.
    pub fn from_response(status: reqwest::StatusCode, body: &str) -> Self {
        let parsed: RemoteErrorBody = serde_json::from_str(body).unwrap_or_default();

        let message = match parsed.message {
            Some(serde_json::Value::String(s)) => s,
            // Validation failures arrive as a list of messages
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                .collect::<Vec<_>>()
                .join("; "),
            Some(other) => other.to_string(),
            None if body.trim().is_empty() => status
                .canonical_reason()
                .unwrap_or("no response body")
                .to_string(),
            None => body.trim().to_string(),
        };

        AuthError::Remote {
            status,
            code: parsed.status_code,
            message: truncate_string(&message, MAX_ERROR_MESSAGE_LENGTH),
        }
    }

    /// Status code reported by the remote service in its error body.
    pub fn code(&self) -> Option<u16> {
        match self {
            AuthError::Remote { code, .. } => *code,
            _ => None,
        }
    }

    /// Tagged failure object handed to UI code.
    pub fn to_failure(&self) -> SignInFailure {
        SignInFailure {
            error: true,
            msg: self.code(),
        }
    }
}

/// `{ "error": true, "msg": <code or null> }`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SignInFailure {
    pub error: bool,
    pub msg: Option<u16>,
}

/// Failure of the credential store backing a session.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Keychain error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("Failed to access credential file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt credential file: {0}")]
    Format(#[from] serde_json::Error),

    #[error("Credential entry is sealed and no passphrase is configured")]
    Locked,

    #[error("Encryption error: {0}")]
    Crypto(String),

    #[error("Keychain task did not complete: {0}")]
    Task(#[from] tokio::task::JoinError),
}
