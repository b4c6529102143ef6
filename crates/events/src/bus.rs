//! Event publishing/subscription abstraction (mechanics only).
//!
//! The bus distributes already-committed domain events to in-process
//! subscribers:
//!
//! - **Fire-and-forget publish**: `publish` hands the message to every
//!   subscriber queue and returns; it never waits for a handler to run.
//! - **At-least-once**: a subscriber may see the same event twice and must
//!   tolerate it.
//! - **Best-effort ordering**: one publisher's events arrive in publish order;
//!   nothing is promised across publishers.
//! - **No durability**: queued messages die with the process.

use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvError, RecvTimeoutError, TryRecvError};
use std::time::Duration;

/// A subscription to the bus.
///
/// Every subscription receives its own copy of every published message.
/// A subscription is meant to be drained by a single thread.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Everything currently queued, without blocking.
    pub fn drain(&self) -> Vec<M> {
        self.receiver.try_iter().collect()
    }
}

/// Domain-agnostic publish/subscribe bus.
///
/// ```text
/// state change commits → publish → subscriber queue → handler worker
///                                 → subscriber queue → handler worker
/// ```
///
/// Publishing happens strictly after the publisher's own write has
/// committed. A failed publish is the publisher's to log; it never undoes
/// the write.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
