#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use tokenward_core::auth::{MemoryStorage, ACCESS_TOKEN_KEY};
use tokenward_core::config::StorageBackend;
use tokenward_core::{ApiClient, Config, CredentialStorage, ExpiryReason, SessionStore, TokenPair, UserRecord};
use wiremock::MockServer;

pub const REFRESH_PATH: &str = "/user/login/refresh/";
pub const LOGIN_PATH: &str = "/user/login/";

/// A client wired to a mock API server, with in-memory storage and a
/// recording expiry handler.
pub struct Harness {
    pub server: MockServer,
    pub storage: Arc<MemoryStorage>,
    pub store: Arc<SessionStore>,
    pub client: ApiClient,
    pub expired: Arc<Mutex<Vec<ExpiryReason>>>,
}

impl Harness {
    pub async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    pub async fn start_with(tweak: impl FnOnce(&mut Config)) -> Self {
        let storage = Arc::new(MemoryStorage::new());
        Self::start_with_storage(storage, tweak).await
    }

    pub async fn start_with_storage(
        storage: Arc<MemoryStorage>,
        tweak: impl FnOnce(&mut Config),
    ) -> Self {
        let server = MockServer::start().await;
        let mut config = Config {
            base_url: server.uri(),
            storage: StorageBackend::Memory,
            request_timeout_secs: 5,
            ..Config::default()
        };
        tweak(&mut config);

        let store = Arc::new(SessionStore::load(storage.clone()));
        let expired = Arc::new(Mutex::new(Vec::new()));
        let handler = {
            let expired = expired.clone();
            move |reason: ExpiryReason| expired.lock().unwrap().push(reason)
        };
        let client = ApiClient::new(&config, store.clone(), Arc::new(handler)).unwrap();

        Self {
            server,
            storage,
            store,
            client,
            expired,
        }
    }

    /// Log in as if the login endpoint had answered with these tokens
    pub fn establish(&self, access: &str, refresh: &str) {
        self.store.establish(
            TokenPair::new(access, refresh),
            Some(UserRecord::with_role("admin")),
        );
    }

    pub fn expired(&self) -> Vec<ExpiryReason> {
        self.expired.lock().unwrap().clone()
    }

    pub fn persisted_access(&self) -> Option<String> {
        self.storage.get(ACCESS_TOKEN_KEY).unwrap()
    }

    pub async fn requests_to(&self, path: &str) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|request| request.url.path() == path)
            .count()
    }
}
