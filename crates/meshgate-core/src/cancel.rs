//! Cooperative cancellation shared between the service and its tasks.
//!
//! Backed by a `watch` channel so any number of tasks can wait on the same
//! token and late subscribers still observe an earlier cancellation.

use std::sync::Arc;
use tokio::sync::watch;

/// Clonable cancellation token
#[derive(Debug, Clone)]
pub struct CancellationToken {
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl CancellationToken {
    /// Create a token that has not been cancelled
    pub fn new() -> Self {
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        Self {
            shutdown_tx: Arc::new(shutdown_tx),
        }
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Non-blocking cancellation check
    pub fn is_cancelled(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Resolves once cancellation is requested
    pub async fn cancelled(&self) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            if *shutdown_rx.borrow_and_update() {
                return;
            }
            if shutdown_rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}
