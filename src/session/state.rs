//! Canonical session state and its single writer.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use strum::Display;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::auth::{RefreshCredential, Session, SessionStore};
use crate::error::SessionError;

/// Externally observable session state.
#[derive(Debug, Clone, PartialEq, Display)]
pub enum SessionState {
    /// `initialize()` has not settled yet.
    Uninitialized,
    Unauthenticated,
    Authenticated(Arc<Session>),
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }

    pub fn is_initialized(&self) -> bool {
        !matches!(self, Self::Uninitialized)
    }

    pub fn session(&self) -> Option<&Arc<Session>> {
        match self {
            Self::Authenticated(session) => Some(session),
            _ => None,
        }
    }

    pub fn access_token(&self) -> Option<String> {
        self.session().map(|s| s.access_token.clone())
    }
}

/// Time of the last attempt of a rate-limited operation. Volatile.
#[derive(Debug, Clone, Copy, Default)]
pub struct CooldownMarker {
    last_attempt_at: Option<DateTime<Utc>>,
}

impl CooldownMarker {
    pub fn record(&mut self, now: DateTime<Utc>) {
        self.last_attempt_at = Some(now);
    }

    pub fn last_attempt_at(&self) -> Option<DateTime<Utc>> {
        self.last_attempt_at
    }

    /// Time since the last attempt, `None` if there never was one.
    pub fn elapsed(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.last_attempt_at.map(|at| now - at)
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owner of the in-memory session, the persisted artifacts, and the
/// generation counter.
///
/// Every mutation takes the generation lock, so a generation check and the
/// write it guards can never interleave with a login or logout.
pub(crate) struct SessionCell {
    store: Arc<dyn SessionStore>,
    state: watch::Sender<SessionState>,
    generation: Mutex<u64>,
}

impl SessionCell {
    pub(crate) fn new(store: Arc<dyn SessionStore>) -> Self {
        let (state, _) = watch::channel(SessionState::Uninitialized);
        Self {
            store,
            state,
            generation: Mutex::new(0),
        }
    }

    pub(crate) fn current(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub(crate) fn generation(&self) -> u64 {
        *lock(&self.generation)
    }

    pub(crate) fn load_persisted(&self) -> Result<Option<Session>, SessionError> {
        self.store.load_session()
    }

    pub(crate) fn credential(&self) -> Result<Option<RefreshCredential>, SessionError> {
        self.store.load_credential()
    }

    /// Persist a brand-new session and publish it. Returns the new generation.
    ///
    /// On a failed write the previously persisted credential is put back, so
    /// storage never pairs a new credential with an old session.
    pub(crate) fn establish(
        &self,
        session: Session,
        credential: &RefreshCredential,
    ) -> Result<u64, SessionError> {
        let mut generation = lock(&self.generation);
        let previous = self.store.load_credential().unwrap_or_else(|err| {
            warn!(error = %err, "could not read previous refresh credential");
            None
        });
        self.store.save_credential(credential)?;
        if let Err(err) = self.store.save_session(&session) {
            let restored = match &previous {
                Some(previous) => self.store.save_credential(previous),
                None => self.store.clear_credential(),
            };
            if let Err(restore_err) = restored {
                warn!(error = %restore_err, "failed to restore previous refresh credential");
            }
            return Err(err);
        }
        *generation += 1;
        self.state
            .send_replace(SessionState::Authenticated(Arc::new(session)));
        Ok(*generation)
    }

    /// Apply a refreshed session if no login/logout happened since `expected`.
    pub(crate) fn apply_refresh(
        &self,
        expected: u64,
        session: Session,
        rotated: Option<&RefreshCredential>,
    ) -> bool {
        let generation = lock(&self.generation);
        if *generation != expected {
            debug!(
                expected,
                current = *generation,
                "discarding refresh from a previous session generation"
            );
            return false;
        }
        if let Some(credential) = rotated {
            if let Err(err) = self.store.save_credential(credential) {
                warn!(error = %err, "failed to persist rotated refresh credential");
            }
        }
        if let Err(err) = self.store.save_session(&session) {
            warn!(error = %err, "failed to persist refreshed session");
        }
        self.state
            .send_replace(SessionState::Authenticated(Arc::new(session)));
        true
    }

    /// Publish an already-persisted session found at startup.
    pub(crate) fn adopt(&self, expected: u64, session: Session) -> bool {
        let generation = lock(&self.generation);
        if *generation != expected || self.state.borrow().is_initialized() {
            return false;
        }
        self.state
            .send_replace(SessionState::Authenticated(Arc::new(session)));
        true
    }

    /// Settle an uninitialized cell as unauthenticated.
    pub(crate) fn settle_unauthenticated(&self) {
        let _generation = lock(&self.generation);
        self.state.send_if_modified(|state| {
            if state.is_initialized() {
                return false;
            }
            *state = SessionState::Unauthenticated;
            true
        });
    }

    /// Clear memory and storage, bump the generation, and hand back the
    /// credential that was stored so the caller can invalidate it remotely.
    pub(crate) fn clear(&self) -> Option<RefreshCredential> {
        let mut generation = lock(&self.generation);
        self.clear_locked(&mut generation)
    }

    /// [`clear`](Self::clear), but only while the generation is still
    /// `expected`. Returns `None` when a login or logout got there first.
    pub(crate) fn clear_if(&self, expected: u64) -> Option<Option<RefreshCredential>> {
        let mut generation = lock(&self.generation);
        if *generation != expected {
            debug!(
                expected,
                current = *generation,
                "not clearing a newer session generation"
            );
            return None;
        }
        Some(self.clear_locked(&mut generation))
    }

    fn clear_locked(&self, generation: &mut u64) -> Option<RefreshCredential> {
        let credential = self.store.load_credential().unwrap_or_else(|err| {
            warn!(error = %err, "could not read refresh credential during logout");
            None
        });
        if let Err(err) = self.store.clear_session() {
            warn!(error = %err, "failed to clear persisted session");
        }
        if let Err(err) = self.store.clear_credential() {
            warn!(error = %err, "failed to clear persisted refresh credential");
        }
        *generation += 1;
        self.state.send_replace(SessionState::Unauthenticated);
        credential
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Claims, MemorySessionStore};
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct FlakyStore {
        inner: MemorySessionStore,
        fail_session_writes: AtomicBool,
    }

    impl SessionStore for FlakyStore {
        fn load_session(&self) -> Result<Option<Session>, SessionError> {
            self.inner.load_session()
        }

        fn save_session(&self, session: &Session) -> Result<(), SessionError> {
            if self.fail_session_writes.load(Ordering::SeqCst) {
                return Err(SessionError::Io("disk full".to_string()));
            }
            self.inner.save_session(session)
        }

        fn clear_session(&self) -> Result<(), SessionError> {
            self.inner.clear_session()
        }

        fn load_credential(&self) -> Result<Option<RefreshCredential>, SessionError> {
            self.inner.load_credential()
        }

        fn save_credential(&self, credential: &RefreshCredential) -> Result<(), SessionError> {
            self.inner.save_credential(credential)
        }

        fn clear_credential(&self) -> Result<(), SessionError> {
            self.inner.clear_credential()
        }
    }

    fn session(token: &str) -> Session {
        Session::new(
            token,
            Claims {
                expires_at: Utc::now() + Duration::hours(1),
                subject_id: "learner".to_string(),
                extra: Default::default(),
            },
        )
    }

    fn cell() -> (Arc<MemorySessionStore>, SessionCell) {
        let store = Arc::new(MemorySessionStore::new());
        (store.clone(), SessionCell::new(store))
    }

    #[test]
    fn establish_persists_and_bumps_generation() {
        let (store, cell) = cell();
        let generation = cell
            .establish(session("a"), &RefreshCredential::new("r"))
            .unwrap();
        assert_eq!(generation, 1);
        assert_eq!(cell.current().access_token().as_deref(), Some("a"));
        assert_eq!(store.load_session().unwrap().unwrap().access_token, "a");
        assert_eq!(store.load_credential().unwrap().unwrap().expose(), "r");
    }

    #[test]
    fn stale_refresh_is_discarded() {
        let (store, cell) = cell();
        cell.establish(session("a"), &RefreshCredential::new("r"))
            .unwrap();
        let captured = cell.generation();
        cell.clear();

        assert!(!cell.apply_refresh(captured, session("b"), None));
        assert_eq!(cell.current(), SessionState::Unauthenticated);
        assert!(store.load_session().unwrap().is_none());
    }

    #[test]
    fn refresh_with_matching_generation_replaces_session() {
        let (store, cell) = cell();
        cell.establish(session("a"), &RefreshCredential::new("r"))
            .unwrap();
        let captured = cell.generation();
        let rotated = RefreshCredential::new("r2");

        assert!(cell.apply_refresh(captured, session("b"), Some(&rotated)));
        assert_eq!(cell.current().access_token().as_deref(), Some("b"));
        assert_eq!(store.load_credential().unwrap().unwrap().expose(), "r2");
        assert_eq!(cell.generation(), captured);
    }

    #[test]
    fn clear_returns_credential_once() {
        let (_store, cell) = cell();
        cell.establish(session("a"), &RefreshCredential::new("r"))
            .unwrap();
        assert!(cell.clear().is_some());
        assert!(cell.clear().is_none());
        assert_eq!(cell.generation(), 3);
    }

    #[test]
    fn clear_if_leaves_a_newer_session_alone() {
        let (store, cell) = cell();
        cell.establish(session("a"), &RefreshCredential::new("r"))
            .unwrap();
        let stale = cell.generation();
        cell.establish(session("b"), &RefreshCredential::new("r2"))
            .unwrap();

        assert!(cell.clear_if(stale).is_none());
        assert_eq!(cell.current().access_token().as_deref(), Some("b"));
        assert_eq!(store.load_credential().unwrap().unwrap().expose(), "r2");

        let current = cell.generation();
        let cleared = cell.clear_if(current).expect("generation matches");
        assert_eq!(cleared.unwrap().expose(), "r2");
        assert_eq!(cell.current(), SessionState::Unauthenticated);
    }

    #[test]
    fn failed_session_write_restores_previous_credential() {
        let store = Arc::new(FlakyStore::default());
        let cell = SessionCell::new(store.clone());
        cell.establish(session("a"), &RefreshCredential::new("r1"))
            .unwrap();

        store.fail_session_writes.store(true, Ordering::SeqCst);
        let result = cell.establish(session("b"), &RefreshCredential::new("r2"));

        assert!(matches!(result, Err(SessionError::Io(_))));
        assert_eq!(cell.current().access_token().as_deref(), Some("a"));
        assert_eq!(store.inner.load_session().unwrap().unwrap().access_token, "a");
        assert_eq!(store.inner.load_credential().unwrap().unwrap().expose(), "r1");
        assert_eq!(cell.generation(), 1);
    }

    #[test]
    fn failed_first_login_leaves_no_credential_behind() {
        let store = Arc::new(FlakyStore::default());
        store.fail_session_writes.store(true, Ordering::SeqCst);
        let cell = SessionCell::new(store.clone());

        assert!(cell
            .establish(session("a"), &RefreshCredential::new("r1"))
            .is_err());
        assert!(store.inner.load_credential().unwrap().is_none());
        assert_eq!(cell.current(), SessionState::Uninitialized);
    }

    #[test]
    fn adopt_only_settles_an_uninitialized_cell() {
        let (_store, cell) = cell();
        assert!(cell.adopt(0, session("a")));
        assert!(!cell.adopt(0, session("b")));
        assert_eq!(cell.current().access_token().as_deref(), Some("a"));
    }

    #[test]
    fn settle_unauthenticated_does_not_override_a_session() {
        let (_store, cell) = cell();
        cell.establish(session("a"), &RefreshCredential::new("r"))
            .unwrap();
        cell.settle_unauthenticated();
        assert!(cell.current().is_authenticated());
    }

    #[test]
    fn cooldown_marker_reports_elapsed_time() {
        let now = Utc::now();
        let mut marker = CooldownMarker::default();
        assert!(marker.elapsed(now).is_none());
        marker.record(now);
        assert_eq!(
            marker.elapsed(now + Duration::seconds(4)),
            Some(Duration::seconds(4))
        );
    }
}
