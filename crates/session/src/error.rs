//! Error types for session operations

/// Errors surfaced by the session layer.
///
/// `Clone` so one refresh failure can be delivered to every queued follower.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("network failure, retry later: {0}")]
    NetworkFailure(String),

    #[error("session expired")]
    SessionExpired,

    #[error("request failed with status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid response: {0}")]
    Decode(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl Error {
    /// Whether this failure means the session is gone and the user must log in again.
    pub fn ends_session(&self) -> bool {
        matches!(self, Error::SessionExpired | Error::Unauthorized(_))
    }

    /// Whether the same operation may succeed if tried again later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::NetworkFailure(_))
    }

    /// Map a failed refresh exchange. Only an explicit refusal ends the session.
    pub(crate) fn from_exchange(err: identity::Error) -> Self {
        match err {
            identity::Error::InvalidCredentials(_) => Error::SessionExpired,
            identity::Error::Http(msg) | identity::Error::TokenExchange(msg) => {
                Error::NetworkFailure(msg)
            }
        }
    }

    /// Map a failed login.
    pub(crate) fn from_login(err: identity::Error) -> Self {
        match err {
            identity::Error::InvalidCredentials(msg) => Error::InvalidCredentials(msg),
            identity::Error::Http(msg) | identity::Error::TokenExchange(msg) => {
                Error::NetworkFailure(msg)
            }
        }
    }
}

impl From<transport::Error> for Error {
    fn from(err: transport::Error) -> Self {
        match err {
            transport::Error::Network(msg) | transport::Error::Timeout(msg) => {
                Error::NetworkFailure(msg)
            }
            transport::Error::InvalidRequest(msg) => Error::InvalidRequest(msg),
            transport::Error::Decode(msg) => Error::Decode(msg),
        }
    }
}

/// Result alias for session operations.
pub type Result<T> = std::result::Result<T, Error>;
