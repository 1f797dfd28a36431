//! Session registry.
//!
//! The registry is the single source of truth for which sessions exist. All
//! structural changes, buffer appends and drains happen under one lock; PTY
//! I/O and signaling happen outside it, on handles cloned out of the entry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

use uuid::Uuid;

use super::buffer::OutputBuffer;
use super::lock;
use super::process::ProcessControl;
use super::pty::{PtyHandle, SessionError, SessionId};

/// Lifecycle of a registered session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Serving client operations.
    Active,
    /// Termination protocol in progress; invisible to clients.
    Terminating,
    /// Removed from the registry.
    Closed,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Active => write!(f, "active"),
            LifecycleState::Terminating => write!(f, "terminating"),
            LifecycleState::Closed => write!(f, "closed"),
        }
    }
}

/// One shell session: a process, its PTY and its pending output.
pub struct Session {
    id: SessionId,
    pty: Arc<PtyHandle>,
    process: Arc<dyn ProcessControl>,
    buffer: OutputBuffer,
    created_at: SystemTime,
    last_contact: Instant,
    state: LifecycleState,
}

impl Session {
    /// Creates an active session with a fresh id and an empty buffer.
    pub fn new(pty: Arc<PtyHandle>, process: Arc<dyn ProcessControl>, buffer_chunks: usize) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            pty,
            process,
            buffer: OutputBuffer::new(buffer_chunks),
            created_at: SystemTime::now(),
            last_contact: Instant::now(),
            state: LifecycleState::Active,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Consumes the session, handing back its resources.
    ///
    /// Used when a launched session could not be registered.
    pub fn into_parts(self) -> (Arc<PtyHandle>, Arc<dyn ProcessControl>) {
        (self.pty, self.process)
    }
}

/// A point-in-time view of one session.
#[derive(Clone)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub state: LifecycleState,
    pub created_at: SystemTime,
    pub last_contact: Instant,
    pub pid: Option<u32>,
    pub cols: u16,
    pub rows: u16,
    pub buffered_chunks: usize,
}

/// Handles needed to run the termination protocol for one session.
///
/// Only produced by a successful `Active -> Terminating` transition, so at
/// most one ticket ever exists per session.
pub struct TerminationTicket {
    pub id: SessionId,
    pub pty: Arc<PtyHandle>,
    pub process: Arc<dyn ProcessControl>,
}

/// Concurrency-safe map from session id to session.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session and returns its id.
    pub fn insert(&self, session: Session) -> SessionId {
        let id = session.id.clone();
        lock(&self.sessions).insert(id.clone(), session);
        id
    }

    /// Registers a session unless `max_active` sessions are already active.
    ///
    /// The check and the insert share one critical section, so concurrent
    /// creates never overshoot the limit. On refusal the session is handed
    /// back for cleanup.
    pub fn try_insert(&self, session: Session, max_active: usize) -> Result<SessionId, Session> {
        let mut sessions = lock(&self.sessions);
        let active = sessions
            .values()
            .filter(|s| s.state == LifecycleState::Active)
            .count();
        if active >= max_active {
            return Err(session);
        }

        let id = session.id.clone();
        sessions.insert(id.clone(), session);
        Ok(id)
    }

    /// Returns whether `id` is registered and active.
    pub fn is_active(&self, id: &str) -> bool {
        lock(&self.sessions)
            .get(id)
            .is_some_and(|s| s.state == LifecycleState::Active)
    }

    /// Returns the PTY of an active session.
    pub fn pty(&self, id: &str) -> Result<Arc<PtyHandle>, SessionError> {
        lock(&self.sessions)
            .get(id)
            .filter(|s| s.state == LifecycleState::Active)
            .map(|s| Arc::clone(&s.pty))
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }

    /// Appends pump output to an active session's buffer.
    ///
    /// Returns `false` when the session is no longer active, which tells the
    /// pump to stop.
    pub fn append_output(&self, id: &str, chunk: String) -> bool {
        let mut sessions = lock(&self.sessions);
        match sessions.get_mut(id) {
            Some(session) if session.state == LifecycleState::Active => {
                if session.buffer.push(chunk).is_some() {
                    tracing::trace!(session_id = %id, "Output buffer full, dropped oldest chunk");
                }
                true
            }
            _ => false,
        }
    }

    /// Drains an active session's buffer and records client contact.
    pub fn drain(&self, id: &str) -> Result<String, SessionError> {
        let mut sessions = lock(&self.sessions);
        let session = sessions
            .get_mut(id)
            .filter(|s| s.state == LifecycleState::Active)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;

        session.last_contact = session.last_contact.max(Instant::now());
        Ok(session.buffer.drain_all())
    }

    /// Moves an active session to `Terminating` and returns its ticket.
    ///
    /// Returns `None` if the session is unknown or already terminating.
    pub fn begin_termination(&self, id: &str) -> Option<TerminationTicket> {
        let mut sessions = lock(&self.sessions);
        let session = sessions
            .get_mut(id)
            .filter(|s| s.state == LifecycleState::Active)?;
        Some(Self::claim(session))
    }

    /// Like [`begin_termination`](Self::begin_termination), but only if the
    /// session has still not been contacted within `threshold` of `now`.
    ///
    /// A drain that lands after the reaper's snapshot wins.
    pub fn claim_stale(&self, id: &str, threshold: Duration, now: Instant) -> Option<TerminationTicket> {
        let mut sessions = lock(&self.sessions);
        let session = sessions
            .get_mut(id)
            .filter(|s| s.state == LifecycleState::Active)
            .filter(|s| now.saturating_duration_since(s.last_contact) > threshold)?;
        Some(Self::claim(session))
    }

    fn claim(session: &mut Session) -> TerminationTicket {
        session.state = LifecycleState::Terminating;
        TerminationTicket {
            id: session.id.clone(),
            pty: Arc::clone(&session.pty),
            process: Arc::clone(&session.process),
        }
    }

    /// Removes a session and hands it back marked `Closed`.
    ///
    /// Returns `None` if it was already gone.
    pub fn remove(&self, id: &str) -> Option<Session> {
        let mut session = lock(&self.sessions).remove(id)?;
        session.state = LifecycleState::Closed;
        Some(session)
    }

    /// Returns a view of every registered session.
    pub fn snapshot(&self) -> Vec<SessionSnapshot> {
        let sessions = lock(&self.sessions);
        sessions
            .values()
            .map(|s| {
                let (cols, rows) = s.pty.size();
                SessionSnapshot {
                    id: s.id.clone(),
                    state: s.state,
                    created_at: s.created_at,
                    last_contact: s.last_contact,
                    pid: s.process.pid(),
                    cols,
                    rows,
                    buffered_chunks: s.buffer.len(),
                }
            })
            .collect()
    }

    /// Ids of every active session.
    pub fn active_ids(&self) -> Vec<SessionId> {
        lock(&self.sessions)
            .values()
            .filter(|s| s.state == LifecycleState::Active)
            .map(|s| s.id.clone())
            .collect()
    }

    /// Number of active sessions.
    pub fn active_count(&self) -> usize {
        lock(&self.sessions)
            .values()
            .filter(|s| s.state == LifecycleState::Active)
            .count()
    }

    /// Number of registered sessions, terminating ones included.
    pub fn len(&self) -> usize {
        lock(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.sessions).is_empty()
    }

    /// Last client contact of a registered session.
    pub fn last_contact(&self, id: &str) -> Option<Instant> {
        lock(&self.sessions).get(id).map(|s| s.last_contact)
    }

    /// Lifecycle state of a registered session.
    pub fn state(&self, id: &str) -> Option<LifecycleState> {
        lock(&self.sessions).get(id).map(|s| s.state)
    }
}
