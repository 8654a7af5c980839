use std::sync::mpsc::{Receiver, RecvError, RecvTimeoutError, TryRecvError};
use std::sync::Arc;
use std::time::Duration;

/// Receiving half of a bus subscription.
///
/// Wraps an [`std::sync::mpsc::Receiver`] so subscribers (projections, the
/// realtime fan-out loop) can consume published messages without depending on
/// the concrete bus implementation.
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Blocks until a message arrives or the bus is dropped.
    pub fn recv(&self) -> Result<M, RecvError> {
        self.receiver.recv()
    }

    /// Non-blocking receive.
    pub fn try_recv(&self) -> Result<M, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Blocks up to `timeout` for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Drains everything currently queued without blocking.
    pub fn drain(&self) -> Vec<M> {
        let mut out = Vec::new();
        while let Ok(message) = self.receiver.try_recv() {
            out.push(message);
        }
        out
    }
}

/// A publish/subscribe channel for event envelopes.
///
/// Publishing is fan-out: every active subscription receives its own clone of
/// the message. Subscribers that have been dropped are pruned on the next
/// publish.
pub trait EventBus<M>: Send + Sync
where
    M: Clone + Send + 'static,
{
    type Error: std::error::Error + Send + Sync + 'static;

    /// Delivers `message` to all active subscriptions.
    fn publish(&self, message: M) -> Result<(), Self::Error>;

    /// Registers a new subscription that receives messages published after
    /// this call returns.
    fn subscribe(&self) -> Result<Subscription<M>, Self::Error>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    M: Clone + Send + 'static,
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Result<Subscription<M>, Self::Error> {
        (**self).subscribe()
    }
}
