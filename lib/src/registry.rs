//! The session registry: cross-thread lookup with singular destruction.

use {
    crate::session::{Session, SessionId},
    std::collections::HashMap,
    std::sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
    tracing::{event, Level},
};

/// Engine-instance-owned table of live sessions.
///
/// Ids are allocated from a monotonic counter and never reused, so a late
/// completion notification or a stale timer tick can never be mis-delivered
/// to an unrelated session that happens to occupy a recycled slot. Removal
/// happens exactly once per session, on delivery or on cancellation;
/// removing an absent id is a no-op rather than an error.
pub struct Registry {
    next_id: AtomicU64,
    sessions: Mutex<HashMap<SessionId, Session>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            // Ids start at 1; 0 is never a valid session.
            next_id: AtomicU64::new(1),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Insert a session, assigning it the next monotonic id.
    pub fn register(&self, mut session: Session) -> SessionId {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        session.assign_id(id);
        self.sessions
            .lock()
            .expect("registry lock poisoned")
            .insert(id, session);
        event!(Level::DEBUG, %id, "session registered");
        id
    }

    /// Whether `id` names a live session.
    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions
            .lock()
            .expect("registry lock poisoned")
            .contains_key(&id)
    }

    /// Run `f` against the live session for `id`, if any.
    ///
    /// Returns `None` for ids that were never registered or have already been
    /// removed; callers treat that as "already delivered or cancelled" and
    /// silently stand down.
    pub fn with_session<R>(&self, id: SessionId, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        let mut sessions = self.sessions.lock().expect("registry lock poisoned");
        sessions.get_mut(&id).map(f)
    }

    /// Remove and return the session for `id`. Idempotent: an absent id
    /// yields `None` and has no effect.
    pub fn unregister(&self, id: SessionId) -> Option<Session> {
        let session = self
            .sessions
            .lock()
            .expect("registry lock poisoned")
            .remove(&id);
        if session.is_some() {
            event!(Level::DEBUG, %id, "session unregistered");
        }
        session
    }

    /// Number of live sessions. Exposed for shutdown accounting and tests.
    pub fn len(&self) -> usize {
        self.sessions.lock().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
