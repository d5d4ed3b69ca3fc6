//! Authentication state for the client session.
//!
//! This module provides:
//! - `SessionStore`: the in-memory session, mirrored write-through to durable storage
//! - `CredentialStorage`: durable key-value storage for tokens (file, OS keychain, memory)
//! - `SessionTerminator`: clears the session and signals the host to send the user to login

pub mod session;
pub mod storage;
pub mod termination;

pub use session::{SessionSnapshot, SessionStore, TokenPair, UserRecord};
pub use storage::{
    CredentialStorage, FileStorage, KeyringStorage, MemoryStorage, StorageError,
    ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_ROLE_KEY,
};
pub use termination::{ExpiryReason, SessionExpiryHandler, SessionTerminator, LOGIN_PATH};
