//! Refresh-token exchange shared by the API client and the background scheduler.
//!
//! Every exchange runs under one async lock. A caller that waited on the lock
//! while someone else rotated the access token picks up the new token instead
//! of issuing a second exchange, so N requests rejected at the same time cost
//! one refresh call, not N.

use std::sync::Arc;

use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::auth::{ExpiryReason, SessionStore, SessionTerminator};

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh: &'a str,
}

/// Only `access` is read; anything else the server sends is ignored.
#[derive(Deserialize)]
struct RefreshResponse {
    access: String,
}

/// What a refresh attempt did to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// No refresh token, or the session changed underneath us; nothing was touched
    Skipped,
    /// The access token was replaced
    Rotated,
    /// The refresh failed and the session was terminated
    Terminated(ExpiryReason),
}

#[derive(Clone)]
pub struct TokenRefresher {
    http: Client,
    refresh_url: Url,
    store: Arc<SessionStore>,
    terminator: SessionTerminator,
    lock: Arc<Mutex<()>>,
}

impl TokenRefresher {
    /// `http` must not carry session credentials of its own.
    pub fn new(http: Client, refresh_url: Url, terminator: SessionTerminator) -> Self {
        Self {
            http,
            refresh_url,
            store: terminator.store().clone(),
            terminator,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// POST the refresh token and return the new access token.
    ///
    /// The error is the reason the session has to end.
    pub async fn exchange(&self, refresh_token: &str) -> Result<String, ExpiryReason> {
        let response = self
            .http
            .post(self.refresh_url.clone())
            .json(&RefreshRequest {
                refresh: refresh_token,
            })
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Refresh request failed");
                ExpiryReason::TransportFailure
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = %status, "Refresh token rejected");
            return Err(ExpiryReason::RefreshRejected(Some(status.as_u16())));
        }

        let body: RefreshResponse = response.json().await.map_err(|e| {
            warn!(error = %e, "Malformed refresh response");
            ExpiryReason::RefreshRejected(None)
        })?;
        Ok(body.access)
    }

    /// One proactive refresh cycle. Does nothing without a refresh token.
    pub async fn refresh_now(&self) -> RefreshOutcome {
        let _guard = self.lock.lock().await;

        let Some(refresh_token) = self.store.refresh_token() else {
            debug!("No refresh token, skipping refresh");
            return RefreshOutcome::Skipped;
        };
        self.rotate_or_expire(&refresh_token).await
    }

    /// Recover from a 401 received while using `rejected_access`.
    ///
    /// Returns the access token to retry with, or `None` once the session has
    /// been terminated.
    pub async fn recover(&self, rejected_access: Option<&str>) -> Option<String> {
        let _guard = self.lock.lock().await;

        match self.store.access_token() {
            Some(current) if Some(current.as_str()) != rejected_access => {
                debug!("Access token rotated while waiting, reusing it");
                return Some(current);
            }
            // The token this request used is gone: the session already ended
            None if rejected_access.is_some() => {
                debug!("Session ended while waiting, not terminating again");
                return None;
            }
            _ => {}
        }

        let Some(refresh_token) = self.store.refresh_token() else {
            self.terminator.expire(ExpiryReason::NoRefreshToken);
            return None;
        };

        match self.rotate_or_expire(&refresh_token).await {
            RefreshOutcome::Rotated => self.store.access_token(),
            RefreshOutcome::Skipped | RefreshOutcome::Terminated(_) => None,
        }
    }

    async fn rotate_or_expire(&self, refresh_token: &str) -> RefreshOutcome {
        let result = self.exchange(refresh_token).await;

        // A logout or a new login may have happened during the exchange
        if self.store.refresh_token().as_deref() != Some(refresh_token) {
            debug!("Session changed during refresh, discarding result");
            return RefreshOutcome::Skipped;
        }

        match result {
            Ok(access) => {
                self.store.rotate_access(access);
                info!("Access token refreshed");
                RefreshOutcome::Rotated
            }
            Err(reason) => {
                self.terminator.expire(reason);
                RefreshOutcome::Terminated(reason)
            }
        }
    }
}
