//! A minimal cooperative cancellation token.
//!
//! Every async operation in this crate accepts an optional token:
//! cancelling one unblocks its waiter, removes its pending-command entry
//! if registered, and marks a not-yet-written queue entry for disposal.
//! In-flight socket reads/writes are unblocked only by closing the
//! socket during teardown -- an individual command's cancellation never
//! closes the socket on its own.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<Inner>);

impl CancellationToken {
    pub fn new() -> Self {
        Self(Arc::new(Inner {
            cancelled: AtomicBool::new(false),
            notify: Notify::new(),
        }))
    }

    pub fn cancel(&self) {
        self.0.cancelled.store(true, Ordering::SeqCst);
        self.0.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`Self::cancel`] has been called (returns
    /// immediately if it already has been).
    pub async fn cancelled(&self) {
        // `notified()` must be constructed before the flag check: it
        // registers this waiter so a `notify_waiters()` landing between
        // the check and the await can't be missed (`Notify::notify_waiters`
        // only wakes futures that already exist, unlike `notify_one`).
        let notified = self.0.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}
