//! HTTP identity API
//!
//! Endpoints (under `/api`):
//! - POST /auth/login      email + password, returns a credential pair and profile
//! - POST /auth/refresh    rotates a refresh credential
//! - POST /auth/logout     forgets a refresh credential
//! - GET  /user/me         profile of the bearer
//! - GET  /data/protected  demo resource for the bearer
//!
//! Plus `/health` and `/metrics` at the root. Error bodies are
//! `{"message": "..."}`.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{SecondsFormat, Utc};
use common::Secret;
use identity::{
    Directory, LOGIN_PATH, LOGOUT_PATH, PROFILE_PATH, PROTECTED_DATA_PATH, REFRESH_PATH,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use serde_json::json;
use tracing::{Instrument, debug, info_span, warn};

use crate::metrics;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub directory: Arc<Directory>,
    pub prometheus: PrometheusHandle,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(directory: Arc<Directory>, prometheus: PrometheusHandle) -> Self {
        Self {
            directory,
            prometheus,
            started_at: Instant::now(),
        }
    }
}

/// Build the axum router with all routes and shared state.
///
/// The concurrency limit caps in-flight requests at `max_connections`;
/// excess requests wait for a slot.
pub fn build_router(state: AppState, max_connections: usize) -> Router {
    let api = Router::new()
        .route(LOGIN_PATH, post(login))
        .route(REFRESH_PATH, post(refresh))
        .route(LOGOUT_PATH, post(logout))
        .route(PROFILE_PATH, get(profile))
        .route(PROTECTED_DATA_PATH, get(protected_data));

    Router::new()
        .nest("/api", api)
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .fallback(not_found)
        .layer(middleware::from_fn(track_request))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

fn message(status: StatusCode, text: &str) -> Response {
    (status, Json(json!({ "message": text }))).into_response()
}

/// Assigns a request id, records request metrics and logs the outcome.
async fn track_request(request: Request, next: Next) -> Response {
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
    let method = request.method().to_string();
    let path = request.uri().path().to_owned();
    let started = Instant::now();

    let span = info_span!("request", request_id = %request_id, method = %method, path = %path);
    let mut response = next.run(request).instrument(span).await;

    let status = response.status().as_u16();
    let elapsed = started.elapsed();
    metrics::record_request(status, &method, elapsed.as_secs_f64());
    debug!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status,
        duration_ms = elapsed.as_millis() as u64,
        "request completed"
    );

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// Access credential from `Authorization: Bearer <token>`.
fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Resolve the bearer to a user id or produce the 401 response.
fn authorize(state: &AppState, headers: &HeaderMap) -> Result<u64, Response> {
    let Some(token) = bearer(headers) else {
        return Err(message(StatusCode::UNAUTHORIZED, "Unauthorized"));
    };
    state
        .directory
        .verify_access(token)
        .ok_or_else(|| message(StatusCode::UNAUTHORIZED, "Invalid or expired token"))
}

#[derive(Deserialize)]
struct LoginBody {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    password: Option<Secret<String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshBody {
    #[serde(default)]
    refresh_token: Option<Secret<String>>,
}

/// POST /api/auth/login
async fn login(
    State(state): State<AppState>,
    body: Result<Json<LoginBody>, JsonRejection>,
) -> Response {
    let (email, password) = match body {
        Ok(Json(LoginBody {
            email: Some(email),
            password: Some(password),
        })) => (email, password),
        Ok(_) => return message(StatusCode::BAD_REQUEST, "Email and password are required"),
        Err(e) => return message(StatusCode::BAD_REQUEST, &e.body_text()),
    };

    match state.directory.login(&email, password.expose()) {
        Ok(grant) => {
            metrics::record_auth("login", "success");
            (StatusCode::OK, Json(grant)).into_response()
        }
        Err(e) => {
            metrics::record_auth("login", "rejected");
            warn!(error = %e, "login rejected");
            message(StatusCode::UNAUTHORIZED, "Invalid email or password")
        }
    }
}

/// POST /api/auth/refresh
async fn refresh(
    State(state): State<AppState>,
    body: Result<Json<RefreshBody>, JsonRejection>,
) -> Response {
    let refresh_token = match body {
        Ok(Json(RefreshBody {
            refresh_token: Some(token),
        })) => token,
        Ok(_) => return message(StatusCode::UNAUTHORIZED, "Refresh token is required"),
        Err(e) => return message(StatusCode::BAD_REQUEST, &e.body_text()),
    };

    match state.directory.rotate(refresh_token.expose()) {
        Ok(pair) => {
            metrics::record_auth("refresh", "success");
            (StatusCode::OK, Json(pair)).into_response()
        }
        Err(_) => {
            metrics::record_auth("refresh", "rejected");
            message(StatusCode::UNAUTHORIZED, "Invalid or expired refresh token")
        }
    }
}

/// POST /api/auth/logout
///
/// Always succeeds; an unknown or missing refresh credential is ignored.
async fn logout(
    State(state): State<AppState>,
    body: Result<Json<RefreshBody>, JsonRejection>,
) -> Response {
    let revoked = match body {
        Ok(Json(RefreshBody {
            refresh_token: Some(token),
        })) => state.directory.revoke(token.expose()),
        _ => false,
    };
    metrics::record_auth("logout", if revoked { "success" } else { "unknown" });
    message(StatusCode::OK, "Logged out successfully")
}

/// GET /api/user/me
async fn profile(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let user_id = match authorize(&state, &headers) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match state.directory.profile(user_id) {
        Some(profile) => (StatusCode::OK, Json(profile)).into_response(),
        None => message(StatusCode::NOT_FOUND, "User not found"),
    }
}

/// GET /api/data/protected
async fn protected_data(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(response) = authorize(&state, &headers) {
        return response;
    }
    (
        StatusCode::OK,
        Json(json!({
            "message": "This is protected data",
            "data": [
                {"id": 1, "title": "Protected Item 1", "description": "Secret content 1"},
                {"id": 2, "title": "Protected Item 2", "description": "Secret content 2"},
                {"id": 3, "title": "Protected Item 3", "description": "Secret content 3"},
            ],
            "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        })),
    )
        .into_response()
}

/// Health endpoint: status, uptime and directory counts.
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "uptime_seconds": state.started_at.elapsed().as_secs(),
            "users": state.directory.user_count(),
            "active_sessions": state.directory.active_sessions(),
        })),
    )
}

/// Prometheus metrics endpoint in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

async fn not_found() -> Response {
    message(StatusCode::NOT_FOUND, "Not found")
}
