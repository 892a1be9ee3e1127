//! Fire-and-forget notifications for the host
//!
//! Subscribers receive events over their own channel. Delivery is never
//! acknowledged or retried; a subscriber whose receiver is gone is dropped
//! on the next publish.

use serde::Serialize;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Mutex, PoisonError};

/// Events emitted by the content manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    /// A page entered the pool
    PageReady { index: usize, size: usize },
    /// A page was evicted from the pool
    PageDiscarded { index: usize },
    /// Pool utilization crossed the configured threshold
    MemoryPressure { current: usize, limit: usize },
}

#[derive(Default)]
pub(crate) struct Subscribers {
    senders: Mutex<Vec<Sender<Notification>>>,
}

impl Subscribers {
    pub(crate) fn subscribe(&self) -> Receiver<Notification> {
        let (tx, rx) = mpsc::channel();
        self.lock().push(tx);
        rx
    }

    pub(crate) fn publish(&self, notification: Notification) {
        self.lock()
            .retain(|sender| sender.send(notification.clone()).is_ok());
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Sender<Notification>>> {
        self.senders.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
