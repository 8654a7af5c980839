use std::sync::mpsc::{self, Sender};
use std::sync::Mutex;

use crate::bus::{EventBus, Subscription};

/// Error type for the in-memory bus.
#[derive(Debug, thiserror::Error)]
pub enum InMemoryBusError {
    #[error("bus subscriber registry lock poisoned")]
    Poisoned,
}

/// In-process fan-out bus over `std::sync::mpsc` channels.
///
/// Each subscription holds its own channel; `publish` clones the message into
/// every live sender and drops senders whose receivers are gone.
pub struct InMemoryEventBus<M> {
    senders: Mutex<Vec<Sender<M>>>,
}

impl<M> InMemoryEventBus<M> {
    pub fn new() -> Self {
        Self {
            senders: Mutex::new(Vec::new()),
        }
    }
}

impl<M> Default for InMemoryEventBus<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> EventBus<M> for InMemoryEventBus<M>
where
    M: Clone + Send + 'static,
{
    type Error = InMemoryBusError;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        let mut senders = self
            .senders
            .lock()
            .map_err(|_| InMemoryBusError::Poisoned)?;

        // Keep only senders whose receiver side is still alive.
        senders.retain(|sender| sender.send(message.clone()).is_ok());

        Ok(())
    }

    fn subscribe(&self) -> Result<Subscription<M>, Self::Error> {
        let (tx, rx) = mpsc::channel();

        self.senders
            .lock()
            .map_err(|_| InMemoryBusError::Poisoned)?
            .push(tx);

        Ok(Subscription::new(rx))
    }
}
