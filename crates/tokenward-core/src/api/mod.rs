//! Reauthenticating API client.
//!
//! This module provides the `ApiClient` that attaches the session's bearer
//! token to every request, recovers from a 401 by exchanging the refresh
//! token for a new access token, and retries the original request once.
//!
//! The refresh exchange itself lives in `TokenRefresher`, which the
//! background scheduler shares with the client.

pub mod client;
pub mod error;
pub mod refresh;

pub use client::{ApiClient, ApiRequest, ApiResponse, Credentials};
pub use error::ApiError;
pub use refresh::{RefreshOutcome, TokenRefresher};
