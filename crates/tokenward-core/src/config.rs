//! Application configuration management.
//!
//! This module handles loading and saving the application configuration:
//! the API origin, the login and refresh endpoints, the background refresh
//! cadence, and where session credentials are persisted.
//!
//! Configuration is stored at `~/.config/tokenward/config.json`. Selected
//! fields can be overridden with `TOKENWARD_*` environment variables.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::auth::{CredentialStorage, FileStorage, KeyringStorage, MemoryStorage, StorageError};

/// Application name used for config/data directory paths
const APP_NAME: &str = "tokenward";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// API origin all relative request paths are resolved against
pub const DEFAULT_BASE_URL: &str = "https://imaster.kerek.uz/";

/// Refresh-token exchange endpoint, relative to the base URL
pub const DEFAULT_REFRESH_PATH: &str = "user/login/refresh/";

/// Login endpoint, relative to the base URL
pub const DEFAULT_LOGIN_PATH: &str = "user/login/";

/// Background refresh period in seconds.
/// 14 minutes keeps us ahead of the server's ~15 minute access token lifetime.
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 14 * 60;

/// HTTP request timeout in seconds
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

pub const ENV_BASE_URL: &str = "TOKENWARD_BASE_URL";
pub const ENV_REFRESH_INTERVAL_SECS: &str = "TOKENWARD_REFRESH_INTERVAL_SECS";
pub const ENV_STORAGE: &str = "TOKENWARD_STORAGE";

/// Where session credentials are persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// JSON file in the data directory
    #[default]
    File,
    /// OS keychain
    Keyring,
    /// Nothing survives the process
    Memory,
}

impl std::str::FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(StorageBackend::File),
            "keyring" => Ok(StorageBackend::Keyring),
            "memory" => Ok(StorageBackend::Memory),
            other => Err(anyhow::anyhow!("Unknown storage backend: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub refresh_path: String,
    pub login_path: String,
    pub refresh_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub storage: StorageBackend,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            refresh_path: DEFAULT_REFRESH_PATH.to_string(),
            login_path: DEFAULT_LOGIN_PATH.to_string(),
            refresh_interval_secs: DEFAULT_REFRESH_INTERVAL_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            storage: StorageBackend::default(),
        }
    }
}

impl Config {
    /// Load the config file (defaults if absent), then apply environment overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)?.with_overrides(|key| std::env::var(key).ok())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply overrides from a variable lookup (the process environment in `load`).
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(base_url) = lookup(ENV_BASE_URL) {
            self.base_url = base_url;
        }
        if let Some(secs) = lookup(ENV_REFRESH_INTERVAL_SECS) {
            self.refresh_interval_secs = secs
                .trim()
                .parse::<u64>()
                .with_context(|| format!("{} must be a number of seconds", ENV_REFRESH_INTERVAL_SECS))?;
        }
        if let Some(storage) = lookup(ENV_STORAGE) {
            self.storage = storage.parse()?;
        }
        Ok(self)
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn data_dir(&self) -> Result<PathBuf, StorageError> {
        let data_dir = dirs::data_dir().ok_or(StorageError::NoDataDir)?;
        Ok(data_dir.join(APP_NAME))
    }

    /// Base URL with a trailing slash, so relative paths append instead of replacing the last segment
    pub fn base_url(&self) -> Result<Url> {
        let mut base = self.base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        Url::parse(&base).with_context(|| format!("Invalid base URL: {}", self.base_url))
    }

    pub fn endpoint_url(&self, path: &str) -> Result<Url> {
        let base = self.base_url()?;
        base.join(path.trim_start_matches('/'))
            .with_context(|| format!("Invalid endpoint path: {}", path))
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    /// A zero timeout would fail every request, so it means the default
    pub fn request_timeout(&self) -> Duration {
        if self.request_timeout_secs == 0 {
            warn!("Request timeout of zero configured, using the default");
            return Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS);
        }
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Open the configured credential storage backend
    pub fn open_storage(&self) -> Result<Arc<dyn CredentialStorage>, StorageError> {
        let storage: Arc<dyn CredentialStorage> = match self.storage {
            StorageBackend::File => Arc::new(FileStorage::in_dir(&self.data_dir()?)),
            StorageBackend::Keyring => Arc::new(KeyringStorage::new()),
            StorageBackend::Memory => Arc::new(MemoryStorage::new()),
        };
        Ok(storage)
    }
}
