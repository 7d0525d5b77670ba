//! Single-flight coordination for access-token refresh.
//!
//! The first caller that needs a refresh becomes the leader and performs it.
//! Callers arriving while the leader is in flight register a waiter and are
//! released with the leader's outcome: all get the same new token, or all
//! get the same failure.

use std::mem;
use std::sync::{Mutex, PoisonError};

use secrecy::SecretString;
use thiserror::Error;
use tokio::sync::oneshot;

/// Why a refresh did not produce a token.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("token refresh failed: {0}")]
pub struct RefreshFailure(pub String);

pub(crate) type RefreshOutcome = Result<SecretString, RefreshFailure>;

#[derive(Default)]
enum Slot {
    #[default]
    Idle,
    InFlight(Vec<oneshot::Sender<RefreshOutcome>>),
}

/// What a caller must do after [`RefreshCoordinator::join`].
pub(crate) enum Turn<'a> {
    /// Perform the refresh, then call [`LeaderGuard::finish`].
    Leader(LeaderGuard<'a>),
    /// Wait for the leader's outcome.
    Follower(oneshot::Receiver<RefreshOutcome>),
}

#[derive(Default)]
pub(crate) struct RefreshCoordinator {
    slot: Mutex<Slot>,
}

impl RefreshCoordinator {
    /// Become the leader if no refresh is in flight, otherwise queue up.
    pub(crate) fn join(&self) -> Turn<'_> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        match &mut *slot {
            Slot::InFlight(waiters) => {
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                Turn::Follower(rx)
            }
            Slot::Idle => {
                *slot = Slot::InFlight(Vec::new());
                Turn::Leader(LeaderGuard {
                    coordinator: self,
                    finished: false,
                })
            }
        }
    }

    pub(crate) fn is_in_flight(&self) -> bool {
        matches!(
            *self.slot.lock().unwrap_or_else(PoisonError::into_inner),
            Slot::InFlight(_)
        )
    }

    /// Return to idle and hand `outcome` to every queued waiter.
    fn settle(&self, outcome: &RefreshOutcome) -> usize {
        let waiters = {
            let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
            match mem::take(&mut *slot) {
                Slot::InFlight(waiters) => waiters,
                Slot::Idle => Vec::new(),
            }
        };
        let released = waiters.len();
        for waiter in waiters {
            // A waiter whose request was dropped no longer listens
            let _ = waiter.send(outcome.clone());
        }
        released
    }
}

/// Held by the refresh leader. Dropping it without [`finish`](Self::finish)
/// (the leader's future was cancelled) releases the waiters with a failure
/// so nobody waits forever.
pub(crate) struct LeaderGuard<'a> {
    coordinator: &'a RefreshCoordinator,
    finished: bool,
}

impl LeaderGuard<'_> {
    /// Release all waiters with `outcome`. Returns how many were queued.
    pub(crate) fn finish(mut self, outcome: &RefreshOutcome) -> usize {
        self.finished = true;
        self.coordinator.settle(outcome)
    }
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.coordinator
                .settle(&Err(RefreshFailure("refresh abandoned".to_string())));
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use secrecy::ExposeSecret;

    use super::*;

    fn expect_leader(turn: Turn<'_>) -> LeaderGuard<'_> {
        match turn {
            Turn::Leader(guard) => guard,
            Turn::Follower(_) => panic!("expected to lead"),
        }
    }

    fn expect_follower(turn: Turn<'_>) -> oneshot::Receiver<RefreshOutcome> {
        match turn {
            Turn::Follower(rx) => rx,
            Turn::Leader(_) => panic!("expected to follow"),
        }
    }

    #[tokio::test]
    async fn test_followers_share_leader_token() {
        let coordinator = RefreshCoordinator::default();
        let leader = expect_leader(coordinator.join());
        let first = expect_follower(coordinator.join());
        let second = expect_follower(coordinator.join());
        assert!(coordinator.is_in_flight());

        let released = leader.finish(&Ok(SecretString::from("tok2")));
        assert_eq!(released, 2);
        assert!(!coordinator.is_in_flight());

        for rx in [first, second] {
            let token = rx.await.unwrap().unwrap();
            assert_eq!(token.expose_secret(), "tok2");
        }
    }

    #[tokio::test]
    async fn test_followers_share_leader_failure() {
        let coordinator = RefreshCoordinator::default();
        let leader = expect_leader(coordinator.join());
        let follower = expect_follower(coordinator.join());

        leader.finish(&Err(RefreshFailure("expired".to_string())));

        let outcome = follower.await.unwrap();
        assert_eq!(outcome.unwrap_err(), RefreshFailure("expired".to_string()));
    }

    #[tokio::test]
    async fn test_dropped_leader_releases_waiters() {
        let coordinator = RefreshCoordinator::default();
        let leader = expect_leader(coordinator.join());
        let follower = expect_follower(coordinator.join());

        drop(leader);

        assert!(follower.await.unwrap().is_err());
        // Next caller can lead again
        assert!(matches!(coordinator.join(), Turn::Leader(_)));
    }
}
