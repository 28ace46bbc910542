//! Cooperative Cancellation
//!
//! A one-shot stop signal shared between whoever requests a stop and the
//! running engine. The engine checks it at the top of every step and races
//! it against each suspension point, so a stop lands within one step.
//!
//! Dropping every [`CancelHandle`] also counts as cancellation: a run whose
//! owner has gone away must not keep driving the device.

use std::sync::Arc;

use tokio::sync::watch;

/// Requests cancellation.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

/// Observes cancellation.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
    // Only set by `never`, to keep the channel open.
    _keepalive: Option<Arc<watch::Sender<bool>>>,
}

/// Creates a connected handle and signal.
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (
        CancelHandle { tx: Arc::new(tx) },
        CancelSignal {
            rx,
            _keepalive: None,
        },
    )
}

impl CancelHandle {
    /// Signals cancellation. Repeated calls have no further effect.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            rx,
            _keepalive: Some(Arc::new(tx)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Completes once cancellation is requested.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}
