//! A replacing queue of size 1. Sending never blocks and never needs a
//! runtime, so it can be used from any thread. The receiver only ever sees the
//! newest value.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};

use tokio::sync::Notify;

#[derive(thiserror::Error, Debug)]
#[error("Other end closed, nowhere to send or nothing to receive")]
pub struct OtherEndClosed;

struct Shared<T> {
    data: Mutex<Option<T>>,
    notifier: Notify,
    senders: AtomicUsize,
    receiver_alive: AtomicBool,
}

pub struct Sender<T> {
    shared: Arc<Shared<T>>,
}

pub struct Receiver<T> {
    shared: Arc<Shared<T>>,
}

pub fn latest<T>() -> (Sender<T>, Receiver<T>) {
    let shared = Arc::new(Shared {
        data: Mutex::new(None),
        notifier: Notify::new(),
        senders: AtomicUsize::new(1),
        receiver_alive: AtomicBool::new(true),
    });
    (
        Sender {
            shared: Arc::clone(&shared),
        },
        Receiver { shared },
    )
}

impl<T> Shared<T> {
    fn replace(&self, value: T) {
        // NOTE: a poisoned slot still holds a perfectly fine value
        let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        data.replace(value);
    }

    fn take(&self) -> Option<T> {
        let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        data.take()
    }
}

impl<T> Sender<T> {
    pub fn send(&self, value: T) -> Result<(), OtherEndClosed> {
        if self.is_closed() {
            return Err(OtherEndClosed);
        }
        self.shared.replace(value);
        self.shared.notifier.notify_one();
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        !self.shared.receiver_alive.load(Ordering::Acquire)
    }
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        self.shared.senders.fetch_add(1, Ordering::AcqRel);
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        self.shared.senders.fetch_sub(1, Ordering::AcqRel);
        // NOTE: Make sure the receiver doesn't hang if the last one is dropped between
        // `is_closed` and `notified`.
        self.shared.notifier.notify_one();
    }
}

impl<T> Receiver<T> {
    /// Cancel safe, a value is only taken once this resolves.
    pub async fn recv(&self) -> Result<T, OtherEndClosed> {
        loop {
            if let Some(value) = self.shared.take() {
                return Ok(value);
            }
            if self.is_closed() {
                return Err(OtherEndClosed);
            }
            self.shared.notifier.notified().await;
        }
    }

    pub fn try_recv(&self) -> Option<T> {
        self.shared.take()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.senders.load(Ordering::Acquire) == 0
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        self.shared.receiver_alive.store(false, Ordering::Release);
    }
}
