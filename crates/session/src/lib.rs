//! Authenticated-session token coordinator
//!
//! Holds the short-lived access credential in memory, persists the refresh
//! credential, attaches credentials to outgoing requests, and collapses
//! concurrent 401 failures into a single refresh exchange. Every request that
//! failed during that cycle is retried once with the new credential.
//!
//! Components, leaf-first:
//! 1. `Storage`: synchronous key-value persistence (memory or JSON file)
//! 2. `TokenStore`: access credential in memory, refresh credential mirrored to storage
//! 3. `RequestQueue`: FIFO of followers waiting on an in-flight refresh
//! 4. `RefreshCoordinator`: single-flight Idle/Refreshing state machine
//! 5. `RequestPipeline`: bearer injection, 401 detection, retry-once
//! 6. `SessionController`: login, logout, restore-on-startup, event subscription

pub mod controller;
pub mod coordinator;
pub mod error;
pub mod events;
mod metrics;
pub mod pipeline;
pub mod queue;
pub mod storage;
pub mod token_store;

#[cfg(test)]
pub(crate) mod testing;

pub use controller::{RestoreOutcome, SessionController};
pub use coordinator::{RefreshCoordinator, RefreshState};
pub use error::{Error, Result};
pub use events::{DEFAULT_EVENT_CAPACITY, SessionEvent, SessionEvents};
pub use pipeline::{RequestPipeline, RetryMarker};
pub use queue::{QueuedCredential, RequestQueue};
pub use storage::{FileStorage, MemoryStorage, Storage};
pub use token_store::TokenStore;
