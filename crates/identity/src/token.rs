//! Identity API wire types and the HTTP client
//!
//! Handles the three identity endpoint interactions:
//! 1. Password login (`POST /auth/login`)
//! 2. Refresh credential exchange (`POST /auth/refresh`)
//! 3. Refresh credential invalidation (`POST /auth/logout`)
//!
//! Bodies are JSON with camelCase field names. 401/403 from login or refresh
//! means the presented credential was refused; every other failure is
//! reported as transient.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::Identity;
use crate::constants::{LOGIN_PATH, LOGOUT_PATH, REFRESH_PATH};
use crate::error::{Error, Result};

/// Public profile of an authenticated user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: u64,
    pub email: String,
    pub name: String,
    pub role: String,
}

/// Access/refresh pair returned by a refresh exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Successful login response: a credential pair plus the user profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginGrant {
    pub access_token: String,
    pub refresh_token: String,
    pub user: Profile,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// Identity provider reached over HTTP.
///
/// Timeouts come from the reqwest client the caller builds; a timeout is
/// reported as `Error::Http` like any other transport failure.
#[derive(Debug, Clone)]
pub struct HttpIdentity {
    client: reqwest::Client,
    base_url: String,
}

impl HttpIdentity {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<reqwest::Response> {
        self.client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Http(format!("{path} request failed: {e}")))
    }

    /// Log in with an email and password.
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginGrant> {
        let response = self
            .post(LOGIN_PATH, &LoginRequest { email, password })
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = error_message(response).await;
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(Error::InvalidCredentials(body));
            }
            return Err(Error::TokenExchange(format!(
                "login returned {status}: {body}"
            )));
        }

        response
            .json::<LoginGrant>()
            .await
            .map_err(|e| Error::TokenExchange(format!("invalid login response: {e}")))
    }

    /// Exchange a refresh credential for a new pair.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        let response = self
            .post(REFRESH_PATH, &RefreshRequest { refresh_token })
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = error_message(response).await;

            // 401/403 means the refresh credential is revoked or invalid
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(Error::InvalidCredentials(format!(
                    "refresh token rejected ({status}): {body}"
                )));
            }

            return Err(Error::TokenExchange(format!(
                "token refresh returned {status}: {body}"
            )));
        }

        response
            .json::<TokenPair>()
            .await
            .map_err(|e| Error::TokenExchange(format!("invalid refresh response: {e}")))
    }

    /// Invalidate a refresh credential server-side.
    pub async fn logout(&self, refresh_token: &str) -> Result<()> {
        let response = self
            .post(LOGOUT_PATH, &RefreshRequest { refresh_token })
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = error_message(response).await;
            return Err(Error::TokenExchange(format!(
                "logout returned {status}: {body}"
            )));
        }
        debug!("refresh token invalidated");
        Ok(())
    }
}

/// Extract the `message` field from an error body, falling back to the raw text.
async fn error_message(response: reqwest::Response) -> String {
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| String::from("<no body>"));
    serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_owned))
        .unwrap_or(body)
}

impl Identity for HttpIdentity {
    fn authenticate<'a>(
        &'a self,
        identifier: &'a str,
        secret: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<LoginGrant>> + Send + 'a>> {
        Box::pin(self.login(identifier, secret))
    }

    fn exchange<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<TokenPair>> + Send + 'a>> {
        Box::pin(self.refresh(refresh_token))
    }

    fn invalidate<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(self.logout(refresh_token))
    }
}
