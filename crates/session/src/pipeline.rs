//! Authenticated request pipeline
//!
//! Attaches the current access credential to every outgoing request and
//! recovers from a 401 exactly once:
//!
//! 1. Send with `Authorization: Bearer <access>` (if any)
//! 2. Non-401, or 401 on an already-retried request: return as-is
//! 3. 401 on a first attempt: mark the request, obtain a credential, re-send
//!
//! The credential for the retry comes from the token store when a refresh
//! already replaced the one this request was sent with; otherwise from the
//! `RefreshCoordinator`, which shares one exchange among all concurrent
//! callers.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::{debug, instrument};
use transport::{ApiRequest, ApiResponse, Transport};

use crate::coordinator::RefreshCoordinator;
use crate::error::{Error, Result};
use crate::metrics;
use crate::token_store::TokenStore;

/// Whether a request has already been retried after a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryMarker {
    #[default]
    Unset,
    Set,
}

/// Sends application requests with credential injection and retry-once.
#[derive(Clone)]
pub struct RequestPipeline {
    transport: Arc<dyn Transport>,
    tokens: Arc<TokenStore>,
    coordinator: RefreshCoordinator,
}

impl std::fmt::Debug for RequestPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestPipeline")
            .field("transport", &self.transport.id())
            .finish_non_exhaustive()
    }
}

impl RequestPipeline {
    pub fn new(
        transport: Arc<dyn Transport>,
        tokens: Arc<TokenStore>,
        coordinator: RefreshCoordinator,
    ) -> Self {
        Self {
            transport,
            tokens,
            coordinator,
        }
    }

    /// Send a request and return the final response.
    ///
    /// Every HTTP status comes back as `Ok`, including a second 401. `Err`
    /// means the request never got a response, or the refresh it needed
    /// failed (`SessionExpired`, `Unauthorized`, `NetworkFailure`).
    #[instrument(skip_all, fields(method = %request.method, path = %request.path))]
    pub async fn send(&self, mut request: ApiRequest) -> Result<ApiResponse> {
        let mut marker = RetryMarker::Unset;
        let mut credential = self.tokens.access();

        loop {
            if let Some(token) = &credential {
                request.set_bearer(token)?;
            }

            let response = self.transport.send(&request).await?;
            if !response.is_unauthorized() || marker == RetryMarker::Set {
                debug!(status = response.status.as_u16(), "response received");
                return Ok(response);
            }

            marker = RetryMarker::Set;
            credential = Some(self.recover(credential.as_deref()).await?);
            metrics::record_retry();
            debug!("retrying with refreshed credential");
        }
    }

    /// Credential to retry with after a 401 on a request sent with `sent_with`.
    async fn recover(&self, sent_with: Option<&str>) -> Result<String> {
        if let Some(current) = self.tokens.access() {
            let stale = sent_with.is_none_or(|sent| !self.tokens.is_current_access(sent));
            if stale {
                debug!("credential was replaced while request was in flight");
                return Ok(current);
            }
        }
        self.coordinator.refresh().await
    }

    /// Send a request and deserialize a successful JSON body.
    ///
    /// A final 401 becomes `Unauthorized`; any other non-2xx becomes
    /// `Status` carrying the body's `message` when it has one.
    pub async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T> {
        let response = self.send(request).await?;
        if response.is_success() {
            return Ok(response.json()?);
        }

        let message = response.message().unwrap_or_else(|| response.text());
        if response.is_unauthorized() {
            return Err(Error::Unauthorized(message));
        }
        Err(Error::Status {
            status: response.status.as_u16(),
            message,
        })
    }

    /// `GET` a path and deserialize the JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send_json(ApiRequest::get(path)).await
    }
}
