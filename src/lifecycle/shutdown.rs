//! Shutdown coordination.
//!
//! The signal is level-triggered: once [`Shutdown::trigger`] runs, every
//! current and future [`ShutdownSignal::cancelled`] completes immediately.

use std::sync::Arc;

use tokio::sync::watch;

/// Coordinator for graceful shutdown.
///
/// Cloning shares the same underlying signal.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// A receiver-side handle for tasks that must stop on shutdown.
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: Some(self.tx.subscribe()),
        }
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Cancellation handle observed by connections and WebSocket sessions.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: Option<watch::Receiver<bool>>,
}

impl ShutdownSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        Self { rx: None }
    }

    pub fn is_triggered(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Completes once shutdown has been triggered.
    ///
    /// Pends forever if the coordinator was dropped without triggering.
    pub async fn cancelled(&self) {
        if let Some(rx) = &self.rx {
            let mut rx = rx.clone();
            let triggered = rx.wait_for(|stop| *stop).await.is_ok();
            if triggered {
                return;
            }
        }
        std::future::pending::<()>().await
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::never()
    }
}
