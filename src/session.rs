//! Session idle-timeout tracking.
//!
//! The registry records when each authenticated identity was last active.
//! It is independent of token expiry: a valid token is still rejected once
//! its identity has been idle past the timeout.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, trace};

use crate::error::{Result, TurnstileError};
use crate::sweep::Sweep;

/// Activity timestamps for one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionRecord {
    pub identity_id: i64,
    pub last_activity_at: Instant,
    pub created_at: Instant,
}

impl SessionRecord {
    fn is_idle(&self, now: Instant, idle_timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_activity_at) > idle_timeout
    }
}

/// Per-identity last-activity registry.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<i64, SessionRecord>>,
    idle_timeout: Duration,
}

impl SessionRegistry {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            idle_timeout,
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Create the record for `identity_id` or refresh its last activity.
    pub fn touch(&self, identity_id: i64) {
        let now = Instant::now();
        let mut sessions = self.sessions.write();
        sessions
            .entry(identity_id)
            .and_modify(|record| record.last_activity_at = now)
            .or_insert(SessionRecord {
                identity_id,
                last_activity_at: now,
                created_at: now,
            });
        trace!(identity_id, "Session touched");
    }

    /// Establish a session after credentials were verified.
    pub fn begin(&self, identity_id: i64) {
        self.touch(identity_id);
        info!(identity_id, "Session started");
    }

    /// Whether `identity_id` has a session that has not been idle too long.
    pub fn is_valid(&self, identity_id: i64) -> bool {
        let now = Instant::now();
        self.sessions
            .read()
            .get(&identity_id)
            .is_some_and(|record| !record.is_idle(now, self.idle_timeout))
    }

    /// Validate then refresh, as one exclusive step.
    ///
    /// An expired or missing session is never recreated here; expired
    /// records are dropped on the spot.
    pub fn check_and_touch(&self, identity_id: i64) -> Result<()> {
        let now = Instant::now();
        let mut sessions = self.sessions.write();

        match sessions.get_mut(&identity_id) {
            Some(record) if !record.is_idle(now, self.idle_timeout) => {
                record.last_activity_at = now;
                Ok(())
            }
            Some(_) => {
                sessions.remove(&identity_id);
                debug!(identity_id, "Session expired after idle timeout");
                Err(TurnstileError::SessionExpired)
            }
            None => {
                debug!(identity_id, "No session for identity");
                Err(TurnstileError::SessionExpired)
            }
        }
    }

    /// Drop the session for `identity_id`, e.g. on logout.
    pub fn invalidate(&self, identity_id: i64) {
        if self.sessions.write().remove(&identity_id).is_some() {
            info!(identity_id, "Session invalidated");
        }
    }

    /// Snapshot of the record for `identity_id`.
    pub fn get(&self, identity_id: i64) -> Option<SessionRecord> {
        self.sessions.read().get(&identity_id).copied()
    }

    /// Number of records held, including idle ones not yet swept.
    pub fn active_count(&self) -> usize {
        self.sessions.read().len()
    }
}

impl Sweep for SessionRegistry {
    fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, record| !record.is_idle(now, self.idle_timeout));
        before - sessions.len()
    }
}
