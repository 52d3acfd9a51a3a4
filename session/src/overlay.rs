use std::time::Duration;

use tokio::sync::mpsc;

use crate::util::{CancelOnDrop, FutureCancel};

/// Single re-armable one-shot timer that dismisses the overlay.
///
/// Every arm spawns a new sleeping task and cancels the previous one. Fires of
/// cancelled tasks that were already in flight are recognized by their
/// generation and thrown away.
pub struct OverlayTimer {
    default_interval: Duration,
    tx: mpsc::UnboundedSender<u64>,
    rx: mpsc::UnboundedReceiver<u64>,
    generation: u64,
    pending: Option<CancelOnDrop>,
    suspended: u32,
}

impl OverlayTimer {
    /// `default_interval` is used when a [`OverlayTimer::resume`] re-arms.
    pub fn new(default_interval: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            default_interval,
            tx,
            rx,
            generation: 0,
            pending: None,
            suspended: 0,
        }
    }

    pub fn arm(&mut self, interval: Duration) {
        self.cancel();
        if self.is_suspended() {
            log::debug!("Overlay timer is suspended, not arming");
            return;
        }

        let generation = self.generation;
        let tx = self.tx.clone();
        self.pending = Some(CancelOnDrop::spawn(move |token| async move {
            if tokio::time::sleep(interval)
                .cancellable(&token)
                .await
                .is_some()
            {
                tx.send(generation).ok();
            }
        }));
        log::trace!("Overlay timer armed for {:?}", interval);
    }

    pub fn cancel(&mut self) {
        self.generation += 1;
        self.pending = None;
    }

    pub fn suspend(&mut self) {
        self.suspended += 1;
        self.cancel();
    }

    pub fn resume(&mut self) {
        match self.suspended {
            0 => log::warn!("Overlay timer resumed without being suspended"),
            1 => {
                self.suspended = 0;
                self.arm(self.default_interval);
            }
            _ => self.suspended -= 1,
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended > 0
    }

    pub fn is_armed(&self) -> bool {
        self.pending.is_some()
    }

    /// Resolves when the currently armed timer runs out. Cancel safe.
    pub async fn fired(&mut self) {
        loop {
            match self.rx.recv().await {
                Some(generation) if generation == self.generation && !self.is_suspended() => {
                    self.pending = None;
                    return;
                }
                Some(stale) => log::trace!("Ignoring stale overlay timer {}", stale),
                None => std::future::pending::<()>().await,
            }
        }
    }
}
