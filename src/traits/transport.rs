//! Accessory bus transport and cancellation.
//!
//! The dispatcher never touches the physical bus. It hands complete frames
//! to an [`AccessoryTransport`] and reports whatever error comes back
//! unchanged.
//!
//! Cancellation is a one-shot flag shared between a [`CancelHandle`] (held
//! by whoever may abort) and any number of [`CancelToken`]s (held by the
//! code doing the work):
//!
//! ```rust
//! use yard_dispatch::traits::cancellation;
//!
//! let (handle, token) = cancellation();
//! assert!(!token.is_cancelled());
//! handle.cancel();
//! assert!(token.is_cancelled());
//! ```

use core::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

/// Asynchronous writer for complete bus frames.
///
/// Several dispatches may call `send` concurrently. `frame` is one
/// checksummed frame; a blocking write should honour `cancel`.
pub trait AccessoryTransport: Send + Sync {
    /// Error reported by the bus.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Writes one frame and resolves once the bus has accepted it.
    fn send(
        &self,
        frame: &[u8],
        cancel: &CancelToken,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

// ============================================================================
// Cancellation
// ============================================================================

/// Creates a linked handle and token.
pub fn cancellation() -> (CancelHandle, CancelToken) {
    let handle = CancelHandle::new();
    let token = handle.token();
    (handle, token)
}

/// Triggers cancellation for every token created from it.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// Creates a handle that has not fired.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Fires. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// True once [`cancel`](Self::cancel) was called.
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// A new token observing this handle.
    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: Some(self.tx.subscribe()),
        }
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Observes a [`CancelHandle`].
///
/// A token whose handle was dropped without firing never fires.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    rx: Option<watch::Receiver<bool>>,
}

impl CancelToken {
    /// A token that is never cancelled.
    pub fn never() -> Self {
        Self { rx: None }
    }

    /// True if the handle has fired.
    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves when the handle fires; pends forever if it never will.
    pub async fn cancelled(&self) {
        let Some(rx) = &self.rx else {
            return core::future::pending().await;
        };
        let mut rx = rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // handle dropped without firing
                return core::future::pending().await;
            }
        }
    }
}
