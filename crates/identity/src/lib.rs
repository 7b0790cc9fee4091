//! Identity provider library
//!
//! Provides the `Identity` abstraction the session coordinator consumes, the
//! wire types shared with the identity HTTP API, a reqwest-backed client
//! (`HttpIdentity`), and an in-process provider (`Directory`) that issues and
//! validates opaque tokens. The identity server binary serves a `Directory`
//! over HTTP; tests use it directly.
//!
//! Credential flow:
//! 1. Client calls `Identity::authenticate()` with an email and password
//! 2. Provider returns an access/refresh pair plus the user profile
//! 3. Access credential authorizes requests until it expires
//! 4. Client calls `Identity::exchange()` with the refresh credential
//! 5. Provider rotates the refresh credential and issues a new access credential
//! 6. On logout the client calls `Identity::invalidate()`

pub mod constants;
pub mod directory;
pub mod error;
pub mod token;

pub use constants::*;
pub use directory::{Directory, UserRecord, demo_users};
pub use error::{Error, Result};
pub use token::{HttpIdentity, LoginGrant, Profile, TokenPair};

use std::future::Future;
use std::pin::Pin;

/// Abstraction over the service that issues and validates credentials.
///
/// The session layer treats every token as an opaque string; only the
/// implementation knows its format.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn Identity>`).
pub trait Identity: Send + Sync {
    /// Exchange an identifier and secret for a credential pair and profile.
    ///
    /// Returns `InvalidCredentials` when the provider refuses the login.
    fn authenticate<'a>(
        &'a self,
        identifier: &'a str,
        secret: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<LoginGrant>> + Send + 'a>>;

    /// Exchange a refresh credential for a new access/refresh pair.
    ///
    /// Returns `InvalidCredentials` when the refresh credential is unknown,
    /// expired or revoked. Any other error is transient.
    fn exchange<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<TokenPair>> + Send + 'a>>;

    /// Invalidate a refresh credential server-side.
    fn invalidate<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}
