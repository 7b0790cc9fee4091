//! Error types for identity provider operations

/// Errors from identity provider operations.
///
/// `InvalidCredentials` is the only variant that means the provider looked at
/// the presented credential and refused it. Everything else is a failure to
/// get an answer and says nothing about whether the credential is still valid.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),
}

impl Error {
    /// Whether the provider explicitly rejected the presented credential.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Error::InvalidCredentials(_))
    }
}

/// Result alias for identity operations.
pub type Result<T> = std::result::Result<T, Error>;
