//! reqwest-backed transport
//!
//! Joins the request path onto a configured base URL and applies a fixed
//! per-request timeout. Every HTTP status (including 401) is returned as a
//! response; only connection failures and timeouts become errors.

use crate::{ApiRequest, ApiResponse, Error, Result, Transport};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::debug;

/// Transport that sends requests over HTTP with a shared reqwest client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            timeout,
        }
    }

    /// Full URL for a request path.
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let url = self.url(&request.path);
        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .headers(request.headers.clone())
            .timeout(self.timeout);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout(format!(
                    "{} {} after {}s",
                    request.method,
                    request.path,
                    self.timeout.as_secs()
                ))
            } else {
                Error::Network(format!("{} {} failed: {e}", request.method, request.path))
            }
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout(format!("reading response body for {}: {e}", request.path))
            } else {
                Error::Network(format!("reading response body for {}: {e}", request.path))
            }
        })?;

        debug!(
            method = %request.method,
            path = %request.path,
            status = status.as_u16(),
            "response received"
        );

        Ok(ApiResponse {
            status,
            headers,
            body: body.to_vec(),
        })
    }
}

impl Transport for HttpTransport {
    fn id(&self) -> &str {
        "http"
    }

    fn send<'a>(
        &'a self,
        request: &'a ApiRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ApiResponse>> + Send + 'a>> {
        Box::pin(self.execute(request))
    }
}
