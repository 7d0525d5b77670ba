//! Session store: who is logged in, persisted across restarts.
//!
//! [`SessionStore`] is the only owner of the [`keys::SESSION`] storage entry.
//! State changes are published two ways:
//! - a `watch` channel carrying the current session, for views that render it
//! - a `broadcast` channel of [`SessionEvent`]s, for reactions such as
//!   returning to the login screen on [`SessionEvent::Expired`]

pub mod auth;

use std::sync::Arc;

use secrecy::SecretString;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::models::session::SessionRecord;
use crate::models::{Identity, Session};
use crate::storage::{Storage, StorageError, keys};

pub use auth::{AuthService, MIN_PASSWORD_LENGTH};

const EVENT_CAPACITY: usize = 16;

/// Session lifecycle notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// A login established a session.
    SignedIn,
    /// The access token was replaced by a refresh.
    TokenRefreshed,
    /// The user logged out.
    SignedOut,
    /// Refresh failed; the session is gone and the user must log in again.
    Expired,
}

/// Holds the active session, if any.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    storage: Arc<dyn Storage>,
    current: watch::Sender<Option<Session>>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionStore {
    /// Create an empty store over `storage`. Call [`restore`](Self::restore)
    /// to load a persisted session.
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        let (current, _) = watch::channel(None);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(SessionInner {
                storage,
                current,
                events,
            }),
        }
    }

    /// The active session.
    #[must_use]
    pub fn current(&self) -> Option<Session> {
        self.inner.current.borrow().clone()
    }

    #[must_use]
    pub fn identity(&self) -> Option<Identity> {
        self.inner
            .current
            .borrow()
            .as_ref()
            .map(|session| session.identity.clone())
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.inner.current.borrow().is_some()
    }

    /// Bearer token for outbound requests.
    #[must_use]
    pub fn access_token(&self) -> Option<SecretString> {
        self.inner
            .current
            .borrow()
            .as_ref()
            .map(|session| session.access_token().clone())
    }

    /// Watch the active session.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Option<Session>> {
        self.inner.current.subscribe()
    }

    /// Subscribe to lifecycle events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Persist `session` and make it current.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the session cannot be persisted; the
    /// in-memory state is left unchanged in that case.
    pub fn establish(&self, session: Session) -> Result<(), StorageError> {
        self.persist(&session)?;
        info!(username = %session.identity.username, role = %session.identity.role, "Session established");
        self.inner.current.send_replace(Some(session));
        self.emit(SessionEvent::SignedIn);
        Ok(())
    }

    /// Swap the access token of the active session.
    ///
    /// Does nothing when no session exists (it ended while a refresh was in
    /// flight). A persistence failure is logged; the new token is still used
    /// for this process.
    pub fn replace_token(&self, token: SecretString) {
        let updated = self.inner.current.send_if_modified(|current| {
            let Some(session) = current.as_mut() else {
                return false;
            };
            *session = session.with_access_token(token);
            true
        });
        if !updated {
            debug!("Session ended before refreshed token arrived, discarding it");
            return;
        }

        if let Some(session) = self.current()
            && let Err(e) = self.persist(&session)
        {
            warn!(error = %e, "Failed to persist refreshed token");
        }
        self.emit(SessionEvent::TokenRefreshed);
    }

    /// Load the persisted session, if any.
    ///
    /// The token is not validated here; a stale token is discovered on the
    /// first protected request. A corrupted entry is deleted and treated as
    /// absent.
    pub fn restore(&self) -> Option<Session> {
        let raw = match self.inner.storage.get(keys::SESSION) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "Failed to read persisted session");
                return None;
            }
        };

        match serde_json::from_str::<SessionRecord>(&raw) {
            Ok(record) => {
                let session = Session::from(record);
                debug!(username = %session.identity.username, "Restored persisted session");
                self.inner.current.send_replace(Some(session.clone()));
                Some(session)
            }
            Err(e) => {
                warn!(error = %e, "Persisted session is corrupted, discarding it");
                self.clear_storage();
                None
            }
        }
    }

    /// End the session at the user's request.
    pub fn sign_out(&self) {
        self.teardown();
        info!("Signed out");
        self.emit(SessionEvent::SignedOut);
    }

    /// End the session because it can no longer be refreshed.
    pub fn expire(&self) {
        self.teardown();
        warn!("Session expired, login required");
        self.emit(SessionEvent::Expired);
    }

    fn teardown(&self) {
        self.inner.current.send_replace(None);
        self.clear_storage();
    }

    fn persist(&self, session: &Session) -> Result<(), StorageError> {
        let json = serde_json::to_string(&SessionRecord::from(session))
            .map_err(|e| StorageError::Io(std::io::Error::other(e)))?;
        self.inner.storage.set(keys::SESSION, &json)
    }

    fn clear_storage(&self) {
        if let Err(e) = self.inner.storage.remove(keys::SESSION) {
            warn!(error = %e, "Failed to remove persisted session");
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.inner.events.send(event);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use electrokart_core::{Email, Role};
    use secrecy::ExposeSecret;

    use super::*;
    use crate::storage::MemoryStorage;

    fn session(token: &str) -> Session {
        Session::new(
            Identity {
                username: "A".to_string(),
                email: Email::parse("a@b.com").unwrap(),
                role: Role::Customer,
            },
            SecretString::from(token.to_string()),
        )
    }

    #[test]
    fn test_establish_persists_and_restores() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let store = SessionStore::new(Arc::clone(&storage));
        store.establish(session("tok1")).unwrap();
        assert!(store.is_authenticated());

        let reopened = SessionStore::new(storage);
        assert!(!reopened.is_authenticated());
        let restored = reopened.restore().unwrap();
        assert_eq!(restored.identity.username, "A");
        assert_eq!(
            reopened.access_token().unwrap().expose_secret(),
            "tok1"
        );
    }

    #[test]
    fn test_restore_discards_corrupted_entry() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        storage.set(keys::SESSION, "{not json").unwrap();

        let store = SessionStore::new(Arc::clone(&storage));
        assert!(store.restore().is_none());
        assert!(!store.is_authenticated());
        assert!(storage.get(keys::SESSION).unwrap().is_none());
    }

    #[test]
    fn test_replace_token_persists() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let store = SessionStore::new(Arc::clone(&storage));
        store.establish(session("tok1")).unwrap();
        let mut events = store.subscribe();

        store.replace_token(SecretString::from("tok2"));

        assert_eq!(store.access_token().unwrap().expose_secret(), "tok2");
        assert!(storage.get(keys::SESSION).unwrap().unwrap().contains("tok2"));
        assert_eq!(events.try_recv().unwrap(), SessionEvent::TokenRefreshed);
    }

    #[test]
    fn test_replace_token_without_session_is_ignored() {
        let store = SessionStore::new(Arc::new(MemoryStorage::new()));
        let mut events = store.subscribe();
        store.replace_token(SecretString::from("tok2"));
        assert!(store.access_token().is_none());
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_expire_clears_and_notifies() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let store = SessionStore::new(Arc::clone(&storage));
        store.establish(session("tok1")).unwrap();
        let mut events = store.subscribe();
        let watcher = store.watch();

        store.expire();

        assert!(!store.is_authenticated());
        assert!(watcher.borrow().is_none());
        assert!(storage.get(keys::SESSION).unwrap().is_none());
        assert_eq!(events.try_recv().unwrap(), SessionEvent::Expired);
    }

    #[test]
    fn test_sign_out_notifies() {
        let store = SessionStore::new(Arc::new(MemoryStorage::new()));
        store.establish(session("tok1")).unwrap();
        let mut events = store.subscribe();
        store.sign_out();
        assert_eq!(events.try_recv().unwrap(), SessionEvent::SignedOut);
    }
}
