//! Plumbing shared by the server-synced aggregates (cart, wishlist).
//!
//! [`Synced`] holds the last server-confirmed snapshot and publishes it on a
//! `watch` channel. Fetch responses are applied only if no newer fetch or
//! local mutation has been applied since the fetch was issued.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::models::ApiEnvelope;
use crate::session::SessionStore;

/// Ticket identifying one fetch, in issue order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct FetchTicket(u64);

pub(crate) struct Synced<T> {
    tx: watch::Sender<T>,
    issued: AtomicU64,
    /// Sequence number of the last applied change. Held while publishing.
    applied: Mutex<u64>,
    loading: Arc<AtomicUsize>,
}

impl<T: Clone + Default> Synced<T> {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(T::default());
        Self {
            tx,
            issued: AtomicU64::new(0),
            applied: Mutex::new(0),
            loading: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn snapshot(&self) -> T {
        self.tx.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }

    /// Read the current snapshot without cloning it.
    pub(crate) fn inspect<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.tx.borrow())
    }

    pub(crate) fn begin_fetch(&self) -> FetchTicket {
        FetchTicket(self.next_seq())
    }

    /// Publish a fetch result unless something newer was applied first.
    /// Returns whether it was applied.
    pub(crate) fn apply_fetch(&self, ticket: FetchTicket, value: T) -> bool {
        let mut applied = self.applied.lock().unwrap_or_else(PoisonError::into_inner);
        if ticket.0 < *applied {
            return false;
        }
        *applied = ticket.0;
        self.tx.send_replace(value);
        true
    }

    /// Apply a local change. Fetches issued before it become stale.
    pub(crate) fn modify(&self, f: impl FnOnce(&mut T) -> bool) -> bool {
        let mut applied = self.applied.lock().unwrap_or_else(PoisonError::into_inner);
        *applied = self.next_seq();
        self.tx.send_if_modified(f)
    }

    pub(crate) fn reset(&self) {
        self.modify(|value| {
            *value = T::default();
            true
        });
    }

    /// Mark an operation in flight until the guard drops.
    pub(crate) fn loading(&self) -> LoadingGuard {
        self.loading.fetch_add(1, Ordering::SeqCst);
        LoadingGuard {
            loading: Arc::clone(&self.loading),
        }
    }

    pub(crate) fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst) > 0
    }

    fn next_seq(&self) -> u64 {
        self.issued.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Clears the loading flag on drop, including on error and cancellation.
pub(crate) struct LoadingGuard {
    loading: Arc<AtomicUsize>,
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        self.loading.fetch_sub(1, Ordering::SeqCst);
    }
}

pub(crate) fn require_session(session: &SessionStore) -> Result<()> {
    if session.is_authenticated() {
        Ok(())
    } else {
        Err(Error::Unauthenticated)
    }
}

/// Turn a `success: false` envelope into `Error::Rejected`.
pub(crate) fn ensure_success<T>(envelope: ApiEnvelope<T>, fallback: &str) -> Result<Option<T>> {
    if envelope.is_success() {
        Ok(envelope.data)
    } else {
        Err(Error::Rejected(envelope.message_or(fallback)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_fetch_is_discarded() {
        let synced: Synced<Vec<i32>> = Synced::new();
        let older = synced.begin_fetch();
        let newer = synced.begin_fetch();

        assert!(synced.apply_fetch(newer, vec![2]));
        assert!(!synced.apply_fetch(older, vec![1]));
        assert_eq!(synced.snapshot(), vec![2]);
    }

    #[test]
    fn test_local_change_outdates_pending_fetch() {
        let synced: Synced<Vec<i32>> = Synced::new();
        let ticket = synced.begin_fetch();
        synced.modify(|v| {
            v.push(9);
            true
        });
        assert!(!synced.apply_fetch(ticket, vec![]));
        assert_eq!(synced.snapshot(), vec![9]);
    }

    #[test]
    fn test_loading_guard_clears_on_drop() {
        let synced: Synced<Vec<i32>> = Synced::new();
        let first = synced.loading();
        let second = synced.loading();
        drop(first);
        assert!(synced.is_loading());
        drop(second);
        assert!(!synced.is_loading());
    }

    #[test]
    fn test_ensure_success() {
        let ok: ApiEnvelope<i32> = serde_json::from_str(r#"{"success":true,"data":1}"#).unwrap();
        assert_eq!(ensure_success(ok, "x").unwrap(), Some(1));

        let rejected: ApiEnvelope<i32> =
            serde_json::from_str(r#"{"success":false,"message":"Out of stock"}"#).unwrap();
        let err = ensure_success(rejected, "x").unwrap_err();
        assert!(matches!(err, Error::Rejected(m) if m == "Out of stock"));
    }
}
