//! In-process identity provider
//!
//! Holds a fixed user directory and issues opaque random tokens. Both token
//! kinds expire after a configurable TTL and expired entries are pruned on
//! access. Refresh tokens are stored only as SHA-256 digests and rotate on
//! every exchange, so a used refresh token is rejected the next time it is
//! presented.
//!
//! A std Mutex guards the token tables. No lock is held across an await, and
//! the `Identity` impl resolves immediately.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::Identity;
use crate::constants::DEFAULT_REFRESH_TTL_SECS;
use crate::error::{Error, Result};
use crate::token::{LoginGrant, Profile, TokenPair};

/// A user known to the directory. Only a digest of the password is kept.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: u64,
    pub email: String,
    pub name: String,
    pub role: String,
    password_digest: String,
}

impl UserRecord {
    pub fn new(
        id: u64,
        email: impl Into<String>,
        name: impl Into<String>,
        role: impl Into<String>,
        password: &str,
    ) -> Self {
        Self {
            id,
            email: email.into(),
            name: name.into(),
            role: role.into(),
            password_digest: digest(password),
        }
    }

    pub fn profile(&self) -> Profile {
        Profile {
            id: self.id,
            email: self.email.clone(),
            name: self.name.clone(),
            role: self.role.clone(),
        }
    }

    fn verify_password(&self, password: &str) -> bool {
        self.password_digest == digest(password)
    }
}

/// The two accounts the demo frontend ships with.
pub fn demo_users() -> Vec<UserRecord> {
    vec![
        UserRecord::new(1, "user@example.com", "John Doe", "user", "password123"),
        UserRecord::new(2, "admin@example.com", "Admin User", "admin", "admin123"),
    ]
}

struct Grant {
    user_id: u64,
    expires_at: Instant,
}

#[derive(Default)]
struct Tables {
    /// access token -> grant
    access: HashMap<String, Grant>,
    /// SHA-256 digest of refresh token -> grant
    refresh: HashMap<String, Grant>,
}

impl Tables {
    fn prune(&mut self, now: Instant) {
        self.access.retain(|_, grant| grant.expires_at > now);
        self.refresh.retain(|_, grant| grant.expires_at > now);
    }
}

/// In-memory identity provider.
pub struct Directory {
    users: Vec<UserRecord>,
    access_ttl: Duration,
    refresh_ttl: Duration,
    tables: Mutex<Tables>,
}

impl Directory {
    pub fn new(users: Vec<UserRecord>, access_ttl: Duration) -> Self {
        info!(
            users = users.len(),
            access_ttl_secs = access_ttl.as_secs(),
            "identity directory initialized"
        );
        Self {
            users,
            access_ttl,
            refresh_ttl: Duration::from_secs(DEFAULT_REFRESH_TTL_SECS),
            tables: Mutex::new(Tables::default()),
        }
    }

    /// Lifetime of issued refresh tokens. A rotation issues a new token with
    /// a full lifetime.
    pub fn with_refresh_ttl(mut self, refresh_ttl: Duration) -> Self {
        self.refresh_ttl = refresh_ttl;
        self
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Verify an email/password and issue a fresh credential pair.
    pub fn login(&self, email: &str, password: &str) -> Result<LoginGrant> {
        let user = self
            .users
            .iter()
            .find(|u| u.email == email && u.verify_password(password))
            .ok_or_else(|| Error::InvalidCredentials("Invalid email or password".into()))?;

        let pair = self.issue(user.id);
        info!(user_id = user.id, "login succeeded");
        Ok(LoginGrant {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            user: user.profile(),
        })
    }

    /// Exchange a refresh token, invalidating it and issuing a new pair.
    pub fn rotate(&self, refresh_token: &str) -> Result<TokenPair> {
        let user_id = {
            let mut tables = self.tables();
            tables.prune(Instant::now());
            tables.refresh.remove(&digest(refresh_token))
        }
        .map(|grant| grant.user_id)
        .ok_or_else(|| Error::InvalidCredentials("Invalid or expired refresh token".into()))?;

        debug!(user_id, "refresh token rotated");
        Ok(self.issue(user_id))
    }

    /// Forget a refresh token. Returns whether it was known.
    pub fn revoke(&self, refresh_token: &str) -> bool {
        let removed = self.tables().refresh.remove(&digest(refresh_token));
        if let Some(grant) = &removed {
            debug!(user_id = grant.user_id, "refresh token revoked");
        }
        removed.is_some()
    }

    /// Resolve an access token to its user id, if it is known and unexpired.
    pub fn verify_access(&self, access_token: &str) -> Option<u64> {
        let mut tables = self.tables();
        tables.prune(Instant::now());
        tables.access.get(access_token).map(|grant| grant.user_id)
    }

    /// Profile for a user id.
    pub fn profile(&self, user_id: u64) -> Option<Profile> {
        self.users
            .iter()
            .find(|u| u.id == user_id)
            .map(UserRecord::profile)
    }

    /// Expire every outstanding access token immediately.
    ///
    /// Refresh tokens stay valid, so the next request gets a 401 and the
    /// client has to go through a refresh exchange.
    pub fn expire_access_tokens(&self) -> usize {
        let mut tables = self.tables();
        let count = tables.access.len();
        tables.access.clear();
        info!(count, "access tokens expired");
        count
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Number of live refresh tokens (one per signed-in client).
    pub fn active_sessions(&self) -> usize {
        let mut tables = self.tables();
        tables.prune(Instant::now());
        tables.refresh.len()
    }

    fn issue(&self, user_id: u64) -> TokenPair {
        let access_token = generate_token("at");
        let refresh_token = generate_token("rt");
        let now = Instant::now();
        let mut tables = self.tables();
        tables.access.insert(
            access_token.clone(),
            Grant {
                user_id,
                expires_at: now + self.access_ttl,
            },
        );
        tables.refresh.insert(
            digest(&refresh_token),
            Grant {
                user_id,
                expires_at: now + self.refresh_ttl,
            },
        );
        TokenPair {
            access_token,
            refresh_token,
        }
    }
}

/// Generate a random opaque token: a prefix plus 32 random bytes as URL-safe base64.
fn generate_token(prefix: &str) -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    format!("{prefix}_{}", URL_SAFE_NO_PAD.encode(bytes))
}

/// `BASE64URL(SHA256(value))`
fn digest(value: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(value.as_bytes()))
}

impl Identity for Directory {
    fn authenticate<'a>(
        &'a self,
        identifier: &'a str,
        secret: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<LoginGrant>> + Send + 'a>> {
        Box::pin(async move { self.login(identifier, secret) })
    }

    fn exchange<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<TokenPair>> + Send + 'a>> {
        Box::pin(async move { self.rotate(refresh_token) })
    }

    fn invalidate<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            self.revoke(refresh_token);
            Ok(())
        })
    }
}
