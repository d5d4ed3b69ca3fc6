//! Core library for tokenward.
//!
//! Keeps an authenticated API session alive for a client application:
//! - `auth`: the session store, its durable credential storage, and session termination
//! - `api`: the reauthenticating API client and the refresh-token exchange
//! - `scheduler`: the background task that rotates the access token on a fixed cadence
//! - `config`: application configuration

pub mod api;
pub mod auth;
pub mod config;
pub mod scheduler;

pub use api::{ApiClient, ApiError, ApiRequest, ApiResponse, Credentials, RefreshOutcome, TokenRefresher};
pub use auth::{
    CredentialStorage, ExpiryReason, SessionExpiryHandler, SessionSnapshot, SessionStore,
    SessionTerminator, TokenPair, UserRecord,
};
pub use config::Config;
pub use scheduler::RefreshScheduler;
