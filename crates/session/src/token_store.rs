//! Credential holder for one session
//!
//! The access credential lives only in memory and is lost on restart. The
//! refresh credential is kept in memory and mirrored into `Storage` under
//! `REFRESH_TOKEN_KEY` on every write, so a restarted process can read it
//! back and restore the session.
//!
//! One Mutex covers both credentials and the storage call, so memory and
//! storage are always updated together. Storage is read at most once, before
//! the first write or clear; after that memory is authoritative, so a failed
//! storage write can never resurrect a credential the process has dropped.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use common::Secret;
use identity::REFRESH_TOKEN_KEY;
use tracing::debug;

use crate::error::Result;
use crate::storage::Storage;

#[derive(Debug, Default)]
struct Credentials {
    access: Option<Secret<String>>,
    refresh: Option<Secret<String>>,
    /// Set once `refresh` reflects this process's view of the session.
    loaded: bool,
}

/// Holds the current access and refresh credentials.
pub struct TokenStore {
    storage: Arc<dyn Storage>,
    credentials: Mutex<Credentials>,
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore")
            .field("credentials", &*self.credentials())
            .finish_non_exhaustive()
    }
}

impl TokenStore {
    /// Create a store over the given storage. Nothing is read until the
    /// refresh credential is first requested.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            credentials: Mutex::new(Credentials::default()),
        }
    }

    fn credentials(&self) -> MutexGuard<'_, Credentials> {
        self.credentials
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Current access credential.
    pub fn access(&self) -> Option<String> {
        self.credentials()
            .access
            .as_ref()
            .map(|token| token.expose().clone())
    }

    /// Whether `token` is the access credential currently held.
    pub fn is_current_access(&self, token: &str) -> bool {
        self.credentials()
            .access
            .as_ref()
            .is_some_and(|current| current.matches(token))
    }

    /// Replace the access credential (memory only).
    pub fn set_access(&self, token: impl Into<String>) {
        self.credentials().access = Some(Secret::new(token.into()));
    }

    /// Current refresh credential. The first call on a fresh store loads the
    /// persisted value (a restarted process before restore has completed).
    pub fn refresh(&self) -> Option<String> {
        let mut credentials = self.credentials();
        if !credentials.loaded {
            credentials.refresh = self.storage.get(REFRESH_TOKEN_KEY).map(Secret::new);
            credentials.loaded = true;
        }
        credentials
            .refresh
            .as_ref()
            .map(|token| token.expose().clone())
    }

    /// Replace or clear the refresh credential in memory and storage.
    ///
    /// Memory is updated even when storage fails, so the running session keeps
    /// working; the storage error is returned for the caller to report. When
    /// a new credential cannot be written, the stale persisted one is removed
    /// if possible so a restart does not present a rotated-out credential.
    pub fn set_refresh(&self, token: Option<String>) -> Result<()> {
        let mut credentials = self.credentials();
        credentials.loaded = true;
        match token {
            Some(token) => {
                let persisted = self.storage.set(REFRESH_TOKEN_KEY, &token);
                credentials.refresh = Some(Secret::new(token));
                if persisted.is_err() {
                    if let Err(e) = self.storage.remove(REFRESH_TOKEN_KEY) {
                        debug!(error = %e, "stale refresh credential left in storage");
                    }
                }
                persisted
            }
            None => {
                credentials.refresh = None;
                self.storage.remove(REFRESH_TOKEN_KEY)
            }
        }
    }

    /// Install a freshly issued credential pair.
    pub fn seed(&self, access: &str, refresh: &str) -> Result<()> {
        self.set_access(access);
        self.set_refresh(Some(refresh.to_owned()))
    }

    /// Drop both credentials and remove the persisted entry.
    ///
    /// Memory is always cleared; a storage failure is returned.
    pub fn clear(&self) -> Result<()> {
        let mut credentials = self.credentials();
        credentials.access = None;
        credentials.refresh = None;
        credentials.loaded = true;
        debug!("credentials cleared");
        self.storage.remove(REFRESH_TOKEN_KEY)
    }
}
