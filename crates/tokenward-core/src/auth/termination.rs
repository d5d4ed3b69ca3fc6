//! Session termination and the "go back to login" signal.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use super::session::SessionStore;

/// Path of the login entry point in a web host.
pub const LOGIN_PATH: &str = "/login";

/// Why an authenticated session could not be kept alive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExpiryReason {
    /// A request was rejected and there was no refresh token to recover with
    NoRefreshToken,
    /// The refresh endpoint answered with this status, or with a body we could not use
    RefreshRejected(Option<u16>),
    /// The refresh request never got an answer
    TransportFailure,
}

impl ExpiryReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ExpiryReason::NoRefreshToken => "no_refresh_token",
            ExpiryReason::RefreshRejected(_) => "refresh_rejected",
            ExpiryReason::TransportFailure => "transport_failure",
        }
    }
}

impl fmt::Display for ExpiryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpiryReason::RefreshRejected(Some(status)) => {
                write!(f, "{} (status {})", self.as_str(), status)
            }
            _ => f.write_str(self.as_str()),
        }
    }
}

/// Host-supplied effect run after the session has been cleared, typically
/// navigating the user to `LOGIN_PATH`.
pub trait SessionExpiryHandler: Send + Sync {
    fn on_session_expired(&self, reason: ExpiryReason);
}

impl<F> SessionExpiryHandler for F
where
    F: Fn(ExpiryReason) + Send + Sync,
{
    fn on_session_expired(&self, reason: ExpiryReason) {
        self(reason)
    }
}

impl SessionExpiryHandler for mpsc::UnboundedSender<ExpiryReason> {
    fn on_session_expired(&self, reason: ExpiryReason) {
        if self.send(reason).is_err() {
            warn!(reason = %reason, "Session expiry receiver dropped");
        }
    }
}

/// Clears the session store, then tells the host.
#[derive(Clone)]
pub struct SessionTerminator {
    store: Arc<SessionStore>,
    handler: Arc<dyn SessionExpiryHandler>,
}

impl SessionTerminator {
    pub fn new(store: Arc<SessionStore>, handler: Arc<dyn SessionExpiryHandler>) -> Self {
        Self { store, handler }
    }

    /// The session can no longer be refreshed.
    pub fn expire(&self, reason: ExpiryReason) {
        warn!(reason = %reason, login_path = LOGIN_PATH, "Session expired, redirecting to login");
        self.store.terminate();
        self.handler.on_session_expired(reason);
    }

    /// User-initiated logout; the host already knows, so no signal is sent.
    pub fn logout(&self) {
        info!("Logging out");
        self.store.terminate();
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }
}

// ============================================================================
// Tests
// ============================================================================
