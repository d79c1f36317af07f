//! In-memory scheduling sessions
//!
//! The service holds one session across iterations. A session that has not
//! been touched within its TTL is gone, and lookups report
//! [`Error::SessionNotFound`] the same way an external session store would.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Default idle lifetime of a session
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(3600);

/// One scheduling session
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    last_seen: Instant,
}

impl Session {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            last_seen: Instant::now(),
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.last_seen.elapsed() >= ttl
    }
}

#[derive(Debug)]
pub struct SessionService {
    ttl: Duration,
    sessions: HashMap<String, Session>,
}

impl Default for SessionService {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_TTL)
    }
}

impl SessionService {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: HashMap::new(),
        }
    }

    /// Open a fresh session and return its id
    pub fn create(&mut self) -> String {
        let session = Session::new();
        let id = session.id.clone();
        tracing::debug!(session_id = %id, "Session created");
        self.sessions.insert(id.clone(), session);
        id
    }

    /// Look up a live session; expired sessions are dropped
    pub fn get(&mut self, id: &str) -> Result<&Session> {
        let ttl = self.ttl;
        if self.sessions.get(id).is_some_and(|s| s.is_expired(ttl)) {
            self.sessions.remove(id);
            tracing::debug!(session_id = %id, "Session expired");
        }
        self.sessions
            .get(id)
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))
    }

    /// Extend a live session's lifetime
    pub fn touch(&mut self, id: &str) -> Result<()> {
        self.get(id)?;
        if let Some(session) = self.sessions.get_mut(id) {
            session.last_seen = Instant::now();
        }
        Ok(())
    }

    pub fn invalidate(&mut self, id: &str) -> bool {
        self.sessions.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
