//! Caller-owned session registry.
//!
//! There is no process-wide singleton tracking connected pens: whoever
//! drives the transport constructs one [`PenRegistry`], registers sessions
//! as links come up, and unregisters them as links go away.  Handles are
//! plain UUIDs so UI layers can reference sessions without borrowing them.

use std::collections::HashMap;

use uuid::Uuid;

use crate::session::PenSession;

/// Opaque handle to a registered session.
pub type SessionId = Uuid;

/// Registry of live sessions, one per connected pen.
#[derive(Default)]
pub struct PenRegistry {
    sessions: HashMap<SessionId, PenSession>,
}

impl PenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session and returns its handle.
    pub fn register(&mut self, session: PenSession) -> SessionId {
        let id = Uuid::new_v4();
        self.sessions.insert(id, session);
        id
    }

    /// Removes and returns a session; the caller usually disconnects it.
    pub fn unregister(&mut self, id: SessionId) -> Option<PenSession> {
        self.sessions.remove(&id)
    }

    pub fn get(&self, id: SessionId) -> Option<&PenSession> {
        self.sessions.get(&id)
    }

    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut PenSession> {
        self.sessions.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Handles of every registered session.
    pub fn ids(&self) -> impl Iterator<Item = SessionId> + '_ {
        self.sessions.keys().copied()
    }

    /// True when any registered session has a live connection.
    pub fn any_connected(&self) -> bool {
        self.sessions.values().any(PenSession::is_connected)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
