//! Single-flight refresh coordination
//!
//! Any number of requests may discover a rejected access credential at the
//! same time. The first caller to observe `Idle` becomes the leader and runs
//! the refresh exchange; every caller that observes `Refreshing` is parked in
//! the `RequestQueue` and released with the leader's result. The state check
//! and the enqueue happen under one Mutex, and so do the token write, the
//! drain and the return to `Idle`, so no caller can slip between them.
//!
//! The cycle itself runs on a spawned task. Dropping the leader's request
//! future does not cancel the exchange; followers and the token store still
//! receive the outcome.
//!
//! Outcomes:
//! - Exchange succeeds: store the new pair, release followers, emit `Refreshed`
//! - Refresh credential refused or missing: clear the store, reject followers,
//!   emit `Expired`
//! - Anything else: reject followers with `NetworkFailure`, keep the store

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use identity::{Identity, TokenPair};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::events::{SessionEvent, SessionEvents};
use crate::metrics;
use crate::queue::{QueuedCredential, RequestQueue};
use crate::token_store::TokenStore;

/// Whether a refresh exchange is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshState {
    #[default]
    Idle,
    Refreshing,
}

#[derive(Debug, Default)]
struct Cycle {
    state: RefreshState,
    queue: RequestQueue,
}

struct Shared {
    tokens: Arc<TokenStore>,
    identity: Arc<dyn Identity>,
    events: SessionEvents,
    cycle: Mutex<Cycle>,
}

enum Role {
    Leader,
    Follower(QueuedCredential),
}

/// Collapses concurrent refresh requests into one exchange.
///
/// Cheap to clone; clones share the same state machine.
#[derive(Clone)]
pub struct RefreshCoordinator {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cycle = self.shared.cycle();
        f.debug_struct("RefreshCoordinator")
            .field("state", &cycle.state)
            .field("pending", &cycle.queue.len())
            .finish()
    }
}

impl RefreshCoordinator {
    pub fn new(
        tokens: Arc<TokenStore>,
        identity: Arc<dyn Identity>,
        events: SessionEvents,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                tokens,
                identity,
                events,
                cycle: Mutex::new(Cycle::default()),
            }),
        }
    }

    pub fn state(&self) -> RefreshState {
        self.shared.cycle().state
    }

    /// Followers parked behind the current cycle.
    pub fn pending(&self) -> usize {
        self.shared.cycle().queue.len()
    }

    /// Obtain a fresh access credential, joining the in-flight cycle if there
    /// is one.
    ///
    /// The leader and every follower of one cycle see the same outcome.
    pub async fn refresh(&self) -> Result<String> {
        let role = {
            let mut cycle = self.shared.cycle();
            match cycle.state {
                RefreshState::Refreshing => Role::Follower(cycle.queue.enqueue()),
                RefreshState::Idle => {
                    cycle.state = RefreshState::Refreshing;
                    Role::Leader
                }
            }
        };

        match role {
            Role::Follower(credential) => {
                debug!("refresh in flight, waiting for its result");
                credential.await
            }
            Role::Leader => {
                debug!("starting refresh cycle");
                let shared = Arc::clone(&self.shared);
                tokio::spawn(async move { shared.run_cycle().await })
                    .await
                    .unwrap_or_else(|e| {
                        Err(Error::NetworkFailure(format!("refresh task failed: {e}")))
                    })
            }
        }
    }
}

impl Shared {
    fn cycle(&self) -> MutexGuard<'_, Cycle> {
        self.cycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run_cycle(&self) -> Result<String> {
        let guard = CycleGuard { shared: self };
        let started = Instant::now();

        let outcome = match self.tokens.refresh() {
            Some(refresh_token) => self
                .identity
                .exchange(&refresh_token)
                .await
                .map_err(Error::from_exchange),
            None => Err(Error::Unauthorized("no refresh credential".into())),
        };

        std::mem::forget(guard);
        let result = self.complete(outcome);
        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "refresh cycle finished"
        );
        result
    }

    /// Publish the outcome of a cycle and return to `Idle`.
    fn complete(&self, outcome: Result<TokenPair>) -> Result<String> {
        let mut cycle = self.cycle();
        match outcome {
            Ok(pair) => {
                if let Err(e) = self.tokens.seed(&pair.access_token, &pair.refresh_token) {
                    warn!(error = %e, "failed to persist refreshed credential");
                }
                let released = cycle.queue.drain_success(&pair.access_token);
                cycle.state = RefreshState::Idle;
                drop(cycle);

                metrics::record_refresh(metrics::outcome_label(None), released);
                info!(waiters = released, "refresh succeeded");
                self.events.emit(SessionEvent::Refreshed);
                Ok(pair.access_token)
            }
            Err(err) => {
                let ends_session = err.ends_session();
                if ends_session {
                    if let Err(e) = self.tokens.clear() {
                        warn!(error = %e, "failed to remove persisted credential");
                    }
                }
                let released = cycle.queue.drain_failure(&err);
                cycle.state = RefreshState::Idle;
                drop(cycle);

                metrics::record_refresh(metrics::outcome_label(Some(&err)), released);
                if ends_session {
                    warn!(waiters = released, error = %err, "refresh refused, session ended");
                    self.events.emit(SessionEvent::Expired);
                } else {
                    warn!(waiters = released, error = %err, "refresh failed, credentials kept");
                }
                Err(err)
            }
        }
    }
}

/// Releases followers if a cycle unwinds before reaching `complete`.
///
/// Disarmed with `mem::forget` once the exchange has returned.
struct CycleGuard<'a> {
    shared: &'a Shared,
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        let mut cycle = self.shared.cycle();
        let err = Error::NetworkFailure("refresh did not complete".into());
        let released = cycle.queue.drain_failure(&err);
        cycle.state = RefreshState::Idle;
        drop(cycle);
        metrics::record_refresh(metrics::outcome_label(Some(&err)), released);
        warn!(waiters = released, "refresh cycle aborted, waiters rejected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStorage, Storage};
    use crate::testing::{Backend, FlakyStorage};
    use std::time::Duration;
    use tokio::task::JoinSet;

    struct Setup {
        backend: Arc<Backend>,
        storage: Arc<MemoryStorage>,
        tokens: Arc<TokenStore>,
        events: SessionEvents,
        coordinator: RefreshCoordinator,
    }

    fn setup() -> Setup {
        let backend = Arc::new(Backend::new());
        let storage = Arc::new(MemoryStorage::new());
        let tokens = Arc::new(TokenStore::new(storage.clone()));
        let events = SessionEvents::default();
        let coordinator =
            RefreshCoordinator::new(tokens.clone(), backend.clone(), events.clone());
        Setup {
            backend,
            storage,
            tokens,
            events,
            coordinator,
        }
    }

    fn sign_in(setup: &Setup) -> identity::LoginGrant {
        let grant = setup.backend.grant();
        setup
            .tokens
            .seed(&grant.access_token, &grant.refresh_token)
            .unwrap();
        grant
    }

    #[tokio::test]
    async fn missing_refresh_credential_is_unauthorized() {
        let s = setup();
        let mut events = s.events.subscribe();

        let err = s.coordinator.refresh().await.unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)), "got: {err:?}");
        assert_eq!(s.backend.exchanges(), 0);
        assert_eq!(events.recv().await.unwrap(), SessionEvent::Expired);
        assert_eq!(s.coordinator.state(), RefreshState::Idle);
    }

    #[tokio::test]
    async fn successful_refresh_rotates_stored_pair() {
        let s = setup();
        let grant = sign_in(&s);
        let mut events = s.events.subscribe();

        let access = s.coordinator.refresh().await.unwrap();
        assert_ne!(access, grant.access_token);
        assert_eq!(s.tokens.access().as_deref(), Some(access.as_str()));

        let refresh = s.tokens.refresh().unwrap();
        assert_ne!(refresh, grant.refresh_token);
        assert_eq!(
            s.storage.get(identity::REFRESH_TOKEN_KEY).as_deref(),
            Some(refresh.as_str())
        );
        assert_eq!(events.recv().await.unwrap(), SessionEvent::Refreshed);
        assert_eq!(s.coordinator.state(), RefreshState::Idle);
    }

    #[tokio::test]
    async fn refused_refresh_on_read_only_storage_leaves_no_credential() {
        let backend = Arc::new(Backend::new());
        let storage = Arc::new(FlakyStorage::default());
        let tokens = Arc::new(TokenStore::new(storage.clone()));
        let coordinator =
            RefreshCoordinator::new(tokens.clone(), backend.clone(), SessionEvents::default());
        let grant = backend.grant();
        tokens
            .seed(&grant.access_token, &grant.refresh_token)
            .unwrap();
        assert!(backend.revoke(&grant.refresh_token));
        storage.fail_remove();

        assert_eq!(coordinator.refresh().await.unwrap_err(), Error::SessionExpired);
        assert!(tokens.access().is_none());
        assert!(tokens.refresh().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_exchange() {
        let s = setup();
        sign_in(&s);
        s.backend.set_exchange_delay(Duration::from_millis(50));

        let mut set = JoinSet::new();
        for _ in 0..8 {
            let coordinator = s.coordinator.clone();
            set.spawn(async move { coordinator.refresh().await });
        }

        let mut tokens = Vec::new();
        while let Some(joined) = set.join_next().await {
            tokens.push(joined.unwrap().unwrap());
        }

        assert_eq!(s.backend.exchanges(), 1);
        assert!(tokens.iter().all(|t| *t == tokens[0]));
        assert_eq!(s.coordinator.pending(), 0);
        assert_eq!(s.coordinator.state(), RefreshState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn refused_refresh_rejects_everyone_and_expires_once() {
        let s = setup();
        let grant = sign_in(&s);
        assert!(s.backend.revoke(&grant.refresh_token));
        s.backend.set_exchange_delay(Duration::from_millis(50));
        let mut events = s.events.subscribe();

        let mut set = JoinSet::new();
        for _ in 0..4 {
            let coordinator = s.coordinator.clone();
            set.spawn(async move { coordinator.refresh().await });
        }
        while let Some(joined) = set.join_next().await {
            assert_eq!(joined.unwrap().unwrap_err(), Error::SessionExpired);
        }

        assert_eq!(s.backend.exchanges(), 1);
        assert!(s.tokens.access().is_none());
        assert!(s.tokens.refresh().is_none());
        assert!(s.storage.is_empty());
        assert_eq!(events.recv().await.unwrap(), SessionEvent::Expired);
        assert!(events.try_recv().is_err(), "Expired must fire once per cycle");
    }

    #[tokio::test(start_paused = true)]
    async fn network_failure_keeps_credentials() {
        let s = setup();
        let grant = sign_in(&s);
        s.backend
            .fail_exchanges(identity::Error::Http("connection reset".into()));
        s.backend.set_exchange_delay(Duration::from_millis(50));
        let mut events = s.events.subscribe();

        let mut set = JoinSet::new();
        for _ in 0..3 {
            let coordinator = s.coordinator.clone();
            set.spawn(async move { coordinator.refresh().await });
        }
        while let Some(joined) = set.join_next().await {
            let err = joined.unwrap().unwrap_err();
            assert!(err.is_retryable(), "got: {err:?}");
        }

        assert_eq!(s.backend.exchanges(), 1);
        assert_eq!(
            s.tokens.refresh().as_deref(),
            Some(grant.refresh_token.as_str())
        );
        assert_eq!(
            s.storage.get(identity::REFRESH_TOKEN_KEY).as_deref(),
            Some(grant.refresh_token.as_str())
        );
        assert!(events.try_recv().is_err(), "no event on transient failure");
        assert_eq!(s.coordinator.state(), RefreshState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_leader_does_not_cancel_refresh() {
        let s = setup();
        let grant = sign_in(&s);
        s.backend.set_exchange_delay(Duration::from_millis(50));

        let coordinator = s.coordinator.clone();
        let leader = tokio::spawn(async move { coordinator.refresh().await });
        while s.coordinator.state() != RefreshState::Refreshing {
            tokio::task::yield_now().await;
        }
        leader.abort();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(s.backend.exchanges(), 1);
        assert_eq!(s.coordinator.state(), RefreshState::Idle);
        let refresh = s.tokens.refresh().unwrap();
        assert_ne!(refresh, grant.refresh_token);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_exchange_releases_followers() {
        let s = setup();
        sign_in(&s);
        s.backend.panic_on_exchange();
        s.backend.set_exchange_delay(Duration::from_millis(50));

        let mut set = JoinSet::new();
        for _ in 0..3 {
            let coordinator = s.coordinator.clone();
            set.spawn(async move { coordinator.refresh().await });
        }
        while let Some(joined) = set.join_next().await {
            let err = joined.unwrap().unwrap_err();
            assert!(err.is_retryable(), "got: {err:?}");
        }
        assert_eq!(s.coordinator.state(), RefreshState::Idle);
        assert_eq!(s.coordinator.pending(), 0);
    }

    #[tokio::test]
    async fn sequential_refreshes_each_run_an_exchange() {
        let s = setup();
        sign_in(&s);

        let first = s.coordinator.refresh().await.unwrap();
        let second = s.coordinator.refresh().await.unwrap();
        assert_ne!(first, second);
        assert_eq!(s.backend.exchanges(), 2);
    }
}
