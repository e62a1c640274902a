//! Short-lived quiz sessions
//!
//! A session is created when a quiz starts and is valid until its expiry.
//! Nothing sweeps expired sessions: they stay in the store until deleted,
//! which quiz evaluation does on every path.

use crate::error::SessionError;
use crate::utils::unique_id;
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

pub type SessionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub id: SessionId,
    pub expiry: DateTime<Utc>,
}

impl Session {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expiry
    }
}

#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_session(&self, ttl: TimeDelta) -> Session {
        self.create_session_at(ttl, Utc::now())
    }

    /// Creates a session expiring at `now + ttl`.
    pub fn create_session_at(&self, ttl: TimeDelta, now: DateTime<Utc>) -> Session {
        let mut sessions = self.sessions.write();
        let id = unique_id(|id| sessions.contains_key(id));
        let session = Session {
            id,
            expiry: now + ttl,
        };
        sessions.insert(id, session);
        session
    }

    pub fn get_session(&self, id: &SessionId) -> Result<Session, SessionError> {
        self.sessions
            .read()
            .get(id)
            .copied()
            .ok_or(SessionError::NotFound(*id))
    }

    /// Expired sessions report `Ok(false)`; only deleted or unknown ids are errors.
    pub fn is_session_active(
        &self,
        id: &SessionId,
        now: DateTime<Utc>,
    ) -> Result<bool, SessionError> {
        self.get_session(id).map(|s| s.is_active_at(now))
    }

    pub fn delete_session(&self, id: &SessionId) {
        self.sessions.write().remove(id);
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}
