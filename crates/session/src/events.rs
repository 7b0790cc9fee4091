//! Session lifecycle notifications
//!
//! Events are fanned out on a tokio broadcast channel. A subscriber that
//! falls behind sees `RecvError::Lagged` and misses the oldest events; the
//! emitter never blocks.

use identity::Profile;
use tokio::sync::broadcast;

/// Default buffer per subscriber.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Interactive login succeeded.
    LoggedIn(Profile),
    /// A persisted refresh credential was used to resume the session at startup.
    Restored(Profile),
    /// A refresh cycle installed a new credential pair.
    Refreshed,
    /// The refresh credential was refused; the user has to log in again.
    Expired,
    /// The user logged out.
    LoggedOut,
}

/// Broadcast handle shared by the coordinator and the controller.
#[derive(Debug, Clone)]
pub struct SessionEvents {
    tx: broadcast::Sender<SessionEvent>,
}

impl Default for SessionEvents {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl SessionEvents {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub(crate) fn emit(&self, event: SessionEvent) {
        tracing::debug!(?event, receivers = self.tx.receiver_count(), "session event");
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_events_in_order() {
        let events = SessionEvents::default();
        let mut rx = events.subscribe();

        events.emit(SessionEvent::Refreshed);
        events.emit(SessionEvent::Expired);

        assert_eq!(rx.recv().await.unwrap(), SessionEvent::Refreshed);
        assert_eq!(rx.recv().await.unwrap(), SessionEvent::Expired);
    }

    #[test]
    fn emit_without_subscribers_is_silent() {
        let events = SessionEvents::new(4);
        events.emit(SessionEvent::LoggedOut);
    }
}
