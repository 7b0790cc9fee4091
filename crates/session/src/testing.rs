//! In-process backend for session tests
//!
//! Wraps a `Directory` and answers both identity calls and API requests, with
//! knobs for delaying or failing exchanges and for slowing individual paths.
//! `FlakyStorage` keeps serving reads after its writes are switched to fail.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use identity::{
    Directory, Identity, LoginGrant, PROFILE_PATH, PROTECTED_DATA_PATH, TokenPair, demo_users,
};
use serde_json::json;
use transport::{ApiRequest, ApiResponse, StatusCode, Transport};

use crate::error::{Error, Result};
use crate::storage::{MemoryStorage, Storage};

/// Public path answered without a bearer.
pub(crate) const HEALTH_PATH: &str = "/health";

pub(crate) const EMAIL: &str = "user@example.com";
pub(crate) const PASSWORD: &str = "password123";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) struct Backend {
    directory: Directory,
    exchanges: AtomicUsize,
    requests: AtomicUsize,
    exchange_delay: Mutex<Option<Duration>>,
    exchange_failure: Mutex<Option<identity::Error>>,
    exchange_panics: AtomicBool,
    invalidate_fails: AtomicBool,
    reject_all: AtomicBool,
    slow_paths: Mutex<HashMap<String, Duration>>,
    bearers: Mutex<Vec<String>>,
}

impl Backend {
    pub(crate) fn new() -> Self {
        Self {
            directory: Directory::new(demo_users(), Duration::from_secs(900)),
            exchanges: AtomicUsize::new(0),
            requests: AtomicUsize::new(0),
            exchange_delay: Mutex::new(None),
            exchange_failure: Mutex::new(None),
            exchange_panics: AtomicBool::new(false),
            invalidate_fails: AtomicBool::new(false),
            reject_all: AtomicBool::new(false),
            slow_paths: Mutex::new(HashMap::new()),
            bearers: Mutex::new(Vec::new()),
        }
    }

    /// Log the demo user in directly, bypassing the session layer.
    pub(crate) fn grant(&self) -> LoginGrant {
        self.directory.login(EMAIL, PASSWORD).unwrap()
    }

    pub(crate) fn revoke(&self, refresh_token: &str) -> bool {
        self.directory.revoke(refresh_token)
    }

    /// Make every outstanding access credential invalid.
    pub(crate) fn expire_access(&self) {
        self.directory.expire_access_tokens();
    }

    pub(crate) fn active_sessions(&self) -> usize {
        self.directory.active_sessions()
    }

    pub(crate) fn exchanges(&self) -> usize {
        self.exchanges.load(Ordering::SeqCst)
    }

    pub(crate) fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Bearer credentials of every API request received, in arrival order.
    pub(crate) fn bearers(&self) -> Vec<String> {
        lock(&self.bearers).clone()
    }

    pub(crate) fn set_exchange_delay(&self, delay: Duration) {
        *lock(&self.exchange_delay) = Some(delay);
    }

    pub(crate) fn fail_exchanges(&self, err: identity::Error) {
        *lock(&self.exchange_failure) = Some(err);
    }

    pub(crate) fn panic_on_exchange(&self) {
        self.exchange_panics.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_invalidate(&self) {
        self.invalidate_fails.store(true, Ordering::SeqCst);
    }

    /// Answer every API request with 401, valid credential or not.
    pub(crate) fn reject_all(&self) {
        self.reject_all.store(true, Ordering::SeqCst);
    }

    /// Delay responses for `path`.
    pub(crate) fn slow_path(&self, path: &str, delay: Duration) {
        lock(&self.slow_paths).insert(path.to_owned(), delay);
    }

    fn handle(&self, request: &ApiRequest) -> ApiResponse {
        let unauthorized = || {
            ApiResponse::json_body(
                StatusCode::UNAUTHORIZED,
                &json!({"message": "Invalid or expired token"}),
            )
        };

        if request.path == HEALTH_PATH {
            return ApiResponse::json_body(StatusCode::OK, &json!({"status": "ok"}));
        }
        if self.reject_all.load(Ordering::SeqCst) {
            return unauthorized();
        }
        let Some(user_id) = request
            .bearer()
            .and_then(|token| self.directory.verify_access(token))
        else {
            return unauthorized();
        };

        match request.path.as_str() {
            PROFILE_PATH => match self.directory.profile(user_id) {
                Some(profile) => ApiResponse::json_body(StatusCode::OK, &json!(profile)),
                None => ApiResponse::json_body(
                    StatusCode::NOT_FOUND,
                    &json!({"message": "User not found"}),
                ),
            },
            PROTECTED_DATA_PATH => ApiResponse::json_body(
                StatusCode::OK,
                &json!({"message": "This is protected data", "data": []}),
            ),
            _ => ApiResponse::json_body(StatusCode::NOT_FOUND, &json!({"message": "Not found"})),
        }
    }
}

impl Identity for Backend {
    fn authenticate<'a>(
        &'a self,
        identifier: &'a str,
        secret: &'a str,
    ) -> Pin<Box<dyn Future<Output = identity::Result<LoginGrant>> + Send + 'a>> {
        Box::pin(async move { self.directory.login(identifier, secret) })
    }

    fn exchange<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = identity::Result<TokenPair>> + Send + 'a>> {
        Box::pin(async move {
            self.exchanges.fetch_add(1, Ordering::SeqCst);
            let delay = *lock(&self.exchange_delay);
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if self.exchange_panics.load(Ordering::SeqCst) {
                panic!("identity provider crashed");
            }
            let failure = lock(&self.exchange_failure).clone();
            match failure {
                Some(err) => Err(err),
                None => self.directory.rotate(refresh_token),
            }
        })
    }

    fn invalidate<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = identity::Result<()>> + Send + 'a>> {
        Box::pin(async move {
            if self.invalidate_fails.load(Ordering::SeqCst) {
                return Err(identity::Error::Http("connection refused".into()));
            }
            self.directory.revoke(refresh_token);
            Ok(())
        })
    }
}

impl Transport for Backend {
    fn id(&self) -> &str {
        "test-backend"
    }

    fn send<'a>(
        &'a self,
        request: &'a ApiRequest,
    ) -> Pin<Box<dyn Future<Output = transport::Result<ApiResponse>> + Send + 'a>> {
        Box::pin(async move {
            self.requests.fetch_add(1, Ordering::SeqCst);
            if let Some(token) = request.bearer() {
                lock(&self.bearers).push(token.to_owned());
            }
            let delay = lock(&self.slow_paths).get(&request.path).copied();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            Ok(self.handle(request))
        })
    }
}

#[derive(Default)]
pub(crate) struct FlakyStorage {
    inner: MemoryStorage,
    fail_set: AtomicBool,
    fail_remove: AtomicBool,
}

impl FlakyStorage {
    pub(crate) fn fail_set(&self) {
        self.fail_set.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_remove(&self) {
        self.fail_remove.store(true, Ordering::SeqCst);
    }
}

impl Storage for FlakyStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        if self.fail_set.load(Ordering::SeqCst) {
            return Err(Error::Storage("disk full".into()));
        }
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        if self.fail_remove.load(Ordering::SeqCst) {
            return Err(Error::Storage("read-only filesystem".into()));
        }
        self.inner.remove(key)
    }
}
