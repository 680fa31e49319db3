//! Cooperative cancellation token.
//!
//! A [`CancelToken`] is threaded through the mission runtime, policy checks,
//! and every tool handler. Cancellation is level-triggered: once cancelled,
//! the token stays cancelled, and every clone observes it.
//!
//! Built on a `tokio::sync::watch` channel so waiting for cancellation is a
//! plain await with no polling.

use std::sync::Arc;

use tokio::sync::watch;

/// A cloneable cancellation token.
///
/// All clones share the same state: cancelling any clone cancels them all.
#[derive(Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    /// Create a fresh, uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until cancellation is requested.
    ///
    /// Resolves immediately if the token is already cancelled; otherwise
    /// suspends until some clone calls [`cancel`](CancelToken::cancel).
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        if *rx.borrow() {
            return;
        }
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
        // Every sender clone dropped without cancelling — this future can
        // never resolve, which is the correct behavior for a select arm.
        std::future::pending::<()>().await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
