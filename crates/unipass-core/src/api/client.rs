//! API client for the student portal REST API.
//!
//! This module provides the `ApiClient` struct for signing in and for making
//! authenticated requests with the resulting bearer token.

use std::time::Duration;

use reqwest::{header, Client};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use super::ApiError;
use crate::auth::AuthError;
use crate::config::Config;

// ============================================================================
// Constants
// ============================================================================

/// Sign-in with registration number and password
const SIGNIN_PATH: &str = "/auth/signin";

/// Sign-in with a scanned QR code
const SIGNIN_QR_PATH: &str = "/auth/signinQrCode";

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Body of `POST /auth/signin`
#[derive(Debug, Serialize)]
pub struct CredentialsRequest<'a> {
    #[serde(rename = "RegNo")]
    pub reg_no: &'a str,
    #[serde(rename = "Password")]
    pub password: &'a str,
    #[serde(rename = "pushToken", skip_serializing_if = "Option::is_none")]
    pub push_token: Option<&'a str>,
}

/// Body of `POST /auth/signinQrCode`
#[derive(Debug, Serialize)]
pub struct QrCodeRequest<'a> {
    #[serde(rename = "QrCode")]
    pub qr_code: &'a str,
    #[serde(rename = "pushToken", skip_serializing_if = "Option::is_none")]
    pub push_token: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct SignInResponse {
    data: SignInData,
}

#[derive(Debug, Deserialize)]
struct SignInData {
    access_token: String,
}

/// API client for the student portal.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: Option<String>,
    retry_backoff: Duration,
}

impl ApiClient {
    /// Create a new API client for the configured base URL
    pub fn new(config: &Config) -> Result<Self, ApiError> {
        Self::with_base_url(&config.api_url, config.request_timeout)
    }

    pub fn with_base_url(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
            retry_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        })
    }

    /// Create a new ApiClient with the given token, sharing the connection pool.
    pub fn with_token(&self, token: String) -> Self {
        Self {
            client: self.client.clone(), // Cheap clone, shares connection pool
            base_url: self.base_url.clone(),
            token: Some(token),
            retry_backoff: self.retry_backoff,
        }
    }

    /// Override the initial delay used when backing off from 429 responses
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    // ------------------------------------------------------------------------
    // Sign-in
    // ------------------------------------------------------------------------

    /// Sign in with registration number and password, returning the access token
    pub async fn sign_in(&self, request: &CredentialsRequest<'_>) -> Result<String, AuthError> {
        self.post_sign_in(SIGNIN_PATH, request).await
    }

    /// Sign in with a scanned QR code, returning the access token
    pub async fn sign_in_qr(&self, request: &QrCodeRequest<'_>) -> Result<String, AuthError> {
        self.post_sign_in(SIGNIN_QR_PATH, request).await
    }

    /// Sign-in is never retried; a rejected or failed attempt goes straight
    /// back to the caller.
    async fn post_sign_in<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<String, AuthError> {
        let url = self.url(path);
        debug!(url = %url, "Sending sign-in request");

        let response = self.client.post(&url).json(body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::from_response(status, &body));
        }

        let parsed: SignInResponse = response
            .json()
            .await
            .map_err(|e| AuthError::InvalidResponse(format!("unexpected sign-in body: {}", e)))?;

        let token = parsed.data.access_token;
        if token.trim().is_empty() {
            return Err(AuthError::InvalidResponse("empty access token".to_string()));
        }
        Ok(token)
    }

    // ------------------------------------------------------------------------
    // Authenticated requests
    // ------------------------------------------------------------------------

    /// `Authorization` header value for the current token, if any
    pub fn authorization_header(&self) -> Result<Option<header::HeaderValue>, ApiError> {
        match self.token {
            Some(ref token) => {
                let mut value = header::HeaderValue::from_str(&format!("Bearer {}", token))?;
                value.set_sensitive(true);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn auth_headers(&self) -> Result<header::HeaderMap, ApiError> {
        let mut headers = header::HeaderMap::new();
        if let Some(value) = self.authorization_header()? {
            headers.insert(header::AUTHORIZATION, value);
        }
        Ok(headers)
    }

    /// Check if response is successful, returning an error with body if not.
    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(
        response: reqwest::Response,
    ) -> Result<Option<reqwest::Response>, ApiError> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status().as_u16() == 429 {
            // Rate limited - signal to retry
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    /// Authenticated GET of a path relative to the base URL
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.url(path);
        let mut retries = 0;
        let mut backoff = self.retry_backoff;

        loop {
            let response = self
                .client
                .get(&url)
                .headers(self.auth_headers()?)
                .send()
                .await?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => {
                    return response.json().await.map_err(|e| {
                        ApiError::InvalidResponse(format!("Failed to parse JSON from {}: {}", url, e))
                    });
                }
                None => {
                    // Rate limited
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited);
                    }
                    warn!(url = %url, retry = retries, backoff_ms = backoff.as_millis() as u64, "Rate limited, backing off");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2; // Exponential backoff
                }
            }
        }
    }
}
