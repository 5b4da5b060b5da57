//! The command/response correlator's id allocator and pending-command map.
//!
//! Grounded on the original's `_libwc_command_id_new` (sequential scan
//! from a monotonic cursor, skipping 0 and any id already present,
//! wrapping on overflow, all under one lock) and
//! `_libwc_relay_pending_tasks_add/remove/lookup`.

use std::collections::HashMap;

use tokio::sync::oneshot;

use crate::error::RelayError;

/// The waiter half of a registered command: resolved exactly once, either
/// with the command's result or with [`RelayError::Cancelled`].
pub type Waiter = oneshot::Sender<Result<String, RelayError>>;

struct Inner {
    next_id: u32,
    pending: HashMap<u32, Waiter>,
}

/// Maps a nonzero 32-bit command id to the waiter awaiting its reply.
pub struct Registry {
    inner: std::sync::Mutex<Inner>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pending = self
            .inner
            .lock()
            .map(|inner| inner.pending.len())
            .unwrap_or(0);
        f.debug_struct("Registry")
            .field("pending", &pending)
            .finish()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: std::sync::Mutex::new(Inner {
                next_id: 1,
                pending: HashMap::new(),
            }),
        }
    }

    /// Allocates a fresh nonzero id and registers `waiter` under it,
    /// returning the id. Registration happens-before the caller writes
    /// any byte of the corresponding command.
    pub fn register(&self, waiter: Waiter) -> u32 {
        let mut inner = self.inner.lock().expect("registry mutex poisoned");

        let mut candidate = inner.next_id;
        loop {
            if candidate != 0 && !inner.pending.contains_key(&candidate) {
                break;
            }
            candidate = candidate.wrapping_add(1);
        }

        inner.next_id = candidate.wrapping_add(1);
        inner.pending.insert(candidate, waiter);
        candidate
    }

    /// Removes and resolves the waiter for `id`, if any is registered.
    /// Returns `false` on a miss -- the caller (the `_pong` handler) must
    /// treat a miss as a non-fatal, logged event, not an error.
    pub fn resolve(&self, id: u32, result: Result<String, RelayError>) -> bool {
        let waiter = {
            let mut inner = self.inner.lock().expect("registry mutex poisoned");
            inner.pending.remove(&id)
        };

        match waiter {
            Some(waiter) => {
                let _ = waiter.send(result);
                true
            }
            None => false,
        }
    }

    /// Teardown: cancels and removes every pending command.
    pub fn cancel_all(&self) {
        let drained: Vec<Waiter> = {
            let mut inner = self.inner.lock().expect("registry mutex poisoned");
            inner.pending.drain().map(|(_, waiter)| waiter).collect()
        };

        for waiter in drained {
            let _ = waiter.send(Err(RelayError::Cancelled));
        }
    }

    /// Removes a single pending entry without resolving it (used by
    /// cooperative cancellation of one in-flight command).
    pub fn remove(&self, id: u32) -> Option<Waiter> {
        self.inner
            .lock()
            .expect("registry mutex poisoned")
            .pending
            .remove(&id)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_nonzero_and_unique() {
        let registry = Registry::new();
        let (tx1, _rx1) = oneshot::channel();
        let (tx2, _rx2) = oneshot::channel();

        let id1 = registry.register(tx1);
        let id2 = registry.register(tx2);

        assert_ne!(id1, 0);
        assert_ne!(id2, 0);
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_resolve_miss_returns_false() {
        let registry = Registry::new();
        assert!(!registry.resolve(42, Ok("x".into())));
    }

    #[tokio::test]
    async fn test_resolve_hit_delivers_result() {
        let registry = Registry::new();
        let (tx, rx) = oneshot::channel();
        let id = registry.register(tx);

        assert!(registry.resolve(id, Ok("hello".into())));
        assert_eq!(rx.await.unwrap().unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_cancel_all_resolves_every_waiter() {
        let registry = Registry::new();
        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        registry.register(tx1);
        registry.register(tx2);

        registry.cancel_all();

        assert!(matches!(rx1.await.unwrap(), Err(RelayError::Cancelled)));
        assert!(matches!(rx2.await.unwrap(), Err(RelayError::Cancelled)));
    }

    #[test]
    fn test_allocation_skips_taken_ids_and_wraps() {
        let registry = Registry::new();
        {
            let mut inner = registry.inner.lock().unwrap();
            inner.next_id = u32::MAX;
        }
        let (tx, _rx) = oneshot::channel();
        let id = registry.register(tx);
        assert_eq!(id, u32::MAX);

        let (tx2, _rx2) = oneshot::channel();
        let id2 = registry.register(tx2);
        assert_eq!(id2, 1); // wrapped past 0
    }
}
