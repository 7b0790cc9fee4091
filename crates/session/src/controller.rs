//! Session lifecycle: login, logout and restore-on-startup
//!
//! `SessionController` owns one session context (token store, coordinator,
//! pipeline, event channel) and is the entry point applications hold on to.

use std::sync::Arc;

use identity::{Identity, PROFILE_PATH, Profile};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};
use transport::Transport;

use crate::coordinator::RefreshCoordinator;
use crate::error::{Error, Result};
use crate::events::{SessionEvent, SessionEvents};
use crate::pipeline::RequestPipeline;
use crate::storage::Storage;
use crate::token_store::TokenStore;

/// Result of trying to resume a persisted session at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    Restored(Profile),
    NoSession,
}

pub struct SessionController {
    identity: Arc<dyn Identity>,
    tokens: Arc<TokenStore>,
    coordinator: RefreshCoordinator,
    pipeline: RequestPipeline,
    events: SessionEvents,
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("authenticated", &self.is_authenticated())
            .field("coordinator", &self.coordinator)
            .finish_non_exhaustive()
    }
}

impl SessionController {
    pub fn new(
        identity: Arc<dyn Identity>,
        transport: Arc<dyn Transport>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        let tokens = Arc::new(TokenStore::new(storage));
        let events = SessionEvents::default();
        let coordinator =
            RefreshCoordinator::new(tokens.clone(), identity.clone(), events.clone());
        let pipeline = RequestPipeline::new(transport, tokens.clone(), coordinator.clone());
        Self {
            identity,
            tokens,
            coordinator,
            pipeline,
            events,
        }
    }

    /// Authenticate interactively and start a session.
    ///
    /// A refused login leaves any existing credentials untouched.
    #[instrument(skip_all)]
    pub async fn login(&self, identifier: &str, secret: &str) -> Result<Profile> {
        let grant = self
            .identity
            .authenticate(identifier, secret)
            .await
            .map_err(Error::from_login)?;

        if let Err(e) = self.tokens.seed(&grant.access_token, &grant.refresh_token) {
            warn!(error = %e, "failed to persist refresh credential, session will not survive restart");
        }
        info!(user_id = grant.user.id, "logged in");
        self.events.emit(SessionEvent::LoggedIn(grant.user.clone()));
        Ok(grant.user)
    }

    /// End the session locally, and remotely when the provider is reachable.
    pub async fn logout(&self) {
        if let Some(refresh_token) = self.tokens.refresh() {
            if let Err(e) = self.identity.invalidate(&refresh_token).await {
                warn!(error = %e, "failed to invalidate refresh credential, clearing locally");
            }
        }
        if let Err(e) = self.tokens.clear() {
            warn!(error = %e, "failed to remove persisted credential");
        }
        info!("logged out");
        self.events.emit(SessionEvent::LoggedOut);
    }

    /// Resume a persisted session, if there is one.
    ///
    /// Never fails: any problem along the way discards the persisted
    /// credential and reports `NoSession`.
    #[instrument(skip_all)]
    pub async fn restore_session(&self) -> RestoreOutcome {
        if self.tokens.refresh().is_none() {
            debug!("no persisted session");
            return RestoreOutcome::NoSession;
        }

        let restored = async {
            self.coordinator.refresh().await?;
            self.current_user().await
        }
        .await;

        match restored {
            Ok(profile) => {
                info!(user_id = profile.id, "session restored");
                self.events.emit(SessionEvent::Restored(profile.clone()));
                RestoreOutcome::Restored(profile)
            }
            Err(err) => {
                warn!(error = %err, "could not restore session");
                if let Err(e) = self.tokens.clear() {
                    warn!(error = %e, "failed to remove persisted credential");
                }
                RestoreOutcome::NoSession
            }
        }
    }

    /// Fetch the signed-in user's profile.
    pub async fn current_user(&self) -> Result<Profile> {
        self.pipeline.get_json(PROFILE_PATH).await
    }

    /// Whether an access credential is held.
    pub fn is_authenticated(&self) -> bool {
        self.tokens.access().is_some()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Pipeline for application requests.
    pub fn pipeline(&self) -> &RequestPipeline {
        &self.pipeline
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }
}
