//! REST API client module for the student portal backend.
//!
//! This module provides the `ApiClient` for signing in against the remote
//! auth service and for issuing authenticated requests afterwards.
//!
//! The API uses JWT bearer token authentication obtained through
//! `/auth/signin` (registration number and password) or
//! `/auth/signinQrCode` (scanned QR code).

pub mod client;
pub mod error;

pub use client::{ApiClient, CredentialsRequest, QrCodeRequest};
pub use error::ApiError;
