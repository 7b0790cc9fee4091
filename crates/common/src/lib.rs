//! Types shared by the session workspace: the redacting `Secret` wrapper
//! used for credentials and the configuration error type used by the binaries.

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
