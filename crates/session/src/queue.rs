//! FIFO of requests waiting on an in-flight refresh
//!
//! Each follower parks on a oneshot receiver. The refresh leader drains the
//! queue exactly once per cycle, either with the new access credential or
//! with the shared failure. Waiters whose request was abandoned (receiver
//! dropped) are skipped silently.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::{Error, Result};

struct Waiter {
    tx: oneshot::Sender<Result<String>>,
}

/// Resolves to the credential a follower should retry with.
///
/// If the queue is dropped without being drained (the refresh task itself
/// died), resolves to `NetworkFailure` rather than hanging.
#[derive(Debug)]
pub struct QueuedCredential {
    rx: oneshot::Receiver<Result<String>>,
}

impl Future for QueuedCredential {
    type Output = Result<String>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|outcome| {
            outcome.unwrap_or_else(|_| {
                Err(Error::NetworkFailure(
                    "refresh abandoned before completing".into(),
                ))
            })
        })
    }
}

/// Requests parked behind the current refresh cycle, in arrival order.
#[derive(Default)]
pub struct RequestQueue {
    waiters: VecDeque<Waiter>,
}

impl std::fmt::Debug for RequestQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestQueue")
            .field("len", &self.waiters.len())
            .finish()
    }
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a request until the current cycle completes.
    pub fn enqueue(&mut self) -> QueuedCredential {
        let (tx, rx) = oneshot::channel();
        self.waiters.push_back(Waiter { tx });
        QueuedCredential { rx }
    }

    /// Hand the new access credential to every waiter, in FIFO order.
    ///
    /// Returns how many waiters were still listening.
    pub fn drain_success(&mut self, access_token: &str) -> usize {
        self.drain(|| Ok(access_token.to_owned()))
    }

    /// Reject every waiter with the same error, in FIFO order.
    pub fn drain_failure(&mut self, err: &Error) -> usize {
        self.drain(|| Err(err.clone()))
    }

    fn drain(&mut self, outcome: impl Fn() -> Result<String>) -> usize {
        let mut delivered = 0;
        while let Some(waiter) = self.waiters.pop_front() {
            if waiter.tx.send(outcome()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }
}
