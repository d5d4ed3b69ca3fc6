//! The in-memory session, mirrored to durable credential storage.
//!
//! `SessionStore` is the only owner of session state. It changes through four
//! transitions (`establish`, `rotate_access`, `set_user`, `terminate`), each
//! applied under one write lock together with its persistence side effect, so
//! readers never see a half-applied transition and storage never lags behind
//! memory once a transition returns.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error, info};

use super::storage::{CredentialStorage, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_ROLE_KEY};

/// Profile payload attached to a session at login time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Every other field the server sent, kept as-is
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UserRecord {
    pub fn with_role(role: impl Into<String>) -> Self {
        Self {
            role: Some(role.into()),
            extra: Map::new(),
        }
    }
}

/// Access and refresh token issued together at login.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

impl TokenPair {
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            access: access.into(),
            refresh: refresh.into(),
        }
    }
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access", &"<redacted>")
            .field("refresh", &"<redacted>")
            .finish()
    }
}

/// A consistent copy of the session at one point in time.
#[derive(Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub is_authenticated: bool,
    pub user: Option<UserRecord>,
    /// When the access token was last replaced by a refresh (not persisted)
    pub access_rotated_at: Option<DateTime<Utc>>,
}

impl SessionSnapshot {
    /// Minutes since the last access token rotation, if there was one
    pub fn minutes_since_rotation(&self) -> Option<i64> {
        self.access_rotated_at
            .map(|at| (Utc::now() - at).num_minutes().max(0))
    }

    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token.is_some()
    }
}

impl fmt::Debug for SessionSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionSnapshot")
            .field("has_access_token", &self.access_token.is_some())
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("is_authenticated", &self.is_authenticated)
            .field("user", &self.user)
            .field("access_rotated_at", &self.access_rotated_at)
            .finish()
    }
}

pub struct SessionStore {
    state: RwLock<SessionSnapshot>,
    storage: Arc<dyn CredentialStorage>,
}

impl SessionStore {
    /// Build the session from whatever tokens the storage already holds.
    pub fn load(storage: Arc<dyn CredentialStorage>) -> Self {
        let access_token = read_key(storage.as_ref(), ACCESS_TOKEN_KEY);
        let refresh_token = read_key(storage.as_ref(), REFRESH_TOKEN_KEY);
        let is_authenticated = access_token.is_some();

        debug!(
            is_authenticated,
            has_refresh_token = refresh_token.is_some(),
            "Loaded session from storage"
        );

        Self {
            state: RwLock::new(SessionSnapshot {
                access_token,
                refresh_token,
                is_authenticated,
                user: None,
                access_rotated_at: None,
            }),
            storage,
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.read().clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.read().access_token.clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.read().refresh_token.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.read().is_authenticated
    }

    pub fn user(&self) -> Option<UserRecord> {
        self.read().user.clone()
    }

    /// Role persisted by an earlier login, which survives restarts even though `user` does not
    pub fn stored_role(&self) -> Option<String> {
        read_key(self.storage.as_ref(), USER_ROLE_KEY)
    }

    /// Login succeeded: install both tokens and the user.
    pub fn establish(&self, tokens: TokenPair, user: Option<UserRecord>) {
        let mut state = self.write();

        self.persist(ACCESS_TOKEN_KEY, Some(&tokens.access));
        self.persist(REFRESH_TOKEN_KEY, Some(&tokens.refresh));
        if let Some(role) = user.as_ref().and_then(|u| u.role.as_deref()) {
            self.persist(USER_ROLE_KEY, Some(role));
        }

        *state = SessionSnapshot {
            access_token: Some(tokens.access),
            refresh_token: Some(tokens.refresh),
            is_authenticated: true,
            user,
            access_rotated_at: None,
        };
        info!("Session established");
    }

    /// Refresh succeeded: replace only the access token.
    pub fn rotate_access(&self, access: String) {
        let mut state = self.write();

        self.persist(ACCESS_TOKEN_KEY, Some(&access));

        state.access_token = Some(access);
        state.is_authenticated = true;
        state.access_rotated_at = Some(Utc::now());
        debug!("Access token rotated");
    }

    /// Replace the user record without touching token state.
    pub fn set_user(&self, user: Option<UserRecord>) {
        let mut state = self.write();

        if let Some(role) = user.as_ref().and_then(|u| u.role.as_deref()) {
            self.persist(USER_ROLE_KEY, Some(role));
        }
        state.user = user;
    }

    /// Clear the session and every persisted entry. Idempotent.
    pub fn terminate(&self) {
        let mut state = self.write();

        self.persist(ACCESS_TOKEN_KEY, None);
        self.persist(REFRESH_TOKEN_KEY, None);
        self.persist(USER_ROLE_KEY, None);

        *state = SessionSnapshot::default();
        info!("Session terminated");
    }

    fn persist(&self, key: &str, value: Option<&str>) {
        let result = match value {
            Some(value) => self.storage.set(key, value),
            None => self.storage.remove(key),
        };
        if let Err(e) = result {
            error!(key = key, error = %e, "Failed to persist session credential");
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, SessionSnapshot> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionSnapshot> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn read_key(storage: &dyn CredentialStorage, key: &str) -> Option<String> {
    match storage.get(key) {
        Ok(value) => value,
        Err(e) => {
            error!(key = key, error = %e, "Failed to read session credential");
            None
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
