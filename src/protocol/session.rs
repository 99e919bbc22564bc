//! Session and Presence Types
//!
//! In-memory bookkeeping for the current collaboration session: who is in
//! the room, who owns it, and where everyone's cursor is. The registry is
//! mutated only by the message router and the connection controller, both
//! of which run on the engine's single sequential task; external readers
//! get cloned snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A collaborator's role within the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Owns the document and is authoritative for canvas-state pushes
    Owner,
    /// Started the session; treated as owner when no owner is asserted
    Initiator,
    /// Regular participant
    Collaborator,
}

impl Role {
    /// Whether this role asserts session ownership
    pub fn asserts_ownership(&self) -> bool {
        matches!(self, Role::Owner | Role::Initiator)
    }
}

/// Ephemeral cursor position on the shared canvas
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CursorPosition {
    pub x: f64,
    pub y: f64,
}

/// One connected participant's presence record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collaborator {
    /// Stable participant id
    pub id: String,
    /// Name shown to other participants
    pub display_name: String,
    /// Identifying color assigned at join time
    pub color: String,
    /// Role within the session
    pub role: Role,
    /// Last time this participant was seen doing anything
    pub last_active_at: DateTime<Utc>,
    /// Ephemeral cursor position; never persisted, never reconciled
    #[serde(skip)]
    pub cursor: Option<CursorPosition>,
}

impl Collaborator {
    /// Create a presence record for a participant seen now
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        color: impl Into<String>,
        role: Role,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            color: color.into(),
            role,
            last_active_at: now,
            cursor: None,
        }
    }
}

/// The logical collaboration session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Session id (assigned by the server)
    pub id: String,
    /// Document the session collaborates on
    pub document_id: String,
    /// Current authoritative owner; the most recent message asserting
    /// ownership wins
    pub owner_id: String,
    /// Current participants
    pub collaborators: Vec<Collaborator>,
    /// When the session was created
    pub created_at: DateTime<Utc>,
}

/// In-memory table of the current session and its participants.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    session: Option<Session>,
}

impl PresenceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// The current session, if one has been established
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Cloned snapshot of the current session
    pub fn session_snapshot(&self) -> Option<Session> {
        self.session.clone()
    }

    /// Cloned snapshot of the collaborator list
    pub fn collaborators(&self) -> Vec<Collaborator> {
        self.session
            .as_ref()
            .map(|s| s.collaborators.clone())
            .unwrap_or_default()
    }

    /// Number of known participants
    pub fn len(&self) -> usize {
        self.session.as_ref().map(|s| s.collaborators.len()).unwrap_or(0)
    }

    /// Whether no session or participants are known
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up a participant by id
    pub fn get(&self, id: &str) -> Option<&Collaborator> {
        self.session
            .as_ref()
            .and_then(|s| s.collaborators.iter().find(|c| c.id == id))
    }

    /// Whether the given participant currently owns the session.
    ///
    /// With no session established yet, the local client is treated as
    /// authoritative (first peer in the room).
    pub fn is_authoritative(&self, id: &str) -> bool {
        match &self.session {
            Some(session) => session.owner_id == id,
            None => true,
        }
    }

    /// Establish the session if none exists yet
    pub fn ensure_session(
        &mut self,
        session_id: impl Into<String>,
        document_id: impl Into<String>,
        owner_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> &mut Session {
        self.session.get_or_insert_with(|| Session {
            id: session_id.into(),
            document_id: document_id.into(),
            owner_id: owner_id.into(),
            collaborators: Vec::new(),
            created_at: now,
        })
    }

    /// Insert or update a participant by id
    pub fn upsert(&mut self, collaborator: Collaborator) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        match session.collaborators.iter_mut().find(|c| c.id == collaborator.id) {
            Some(existing) => {
                // Keep the ephemeral cursor across presence refreshes
                let cursor = existing.cursor;
                *existing = collaborator;
                existing.cursor = cursor;
            }
            None => session.collaborators.push(collaborator),
        }
    }

    /// Remove a participant by id; returns whether one was removed
    pub fn remove(&mut self, id: &str) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        let before = session.collaborators.len();
        session.collaborators.retain(|c| c.id != id);
        session.collaborators.len() != before
    }

    /// Replace the full collaborator list and owner (full-replace
    /// semantics, not merge)
    pub fn replace_all(&mut self, collaborators: Vec<Collaborator>, owner_id: Option<String>) {
        if let Some(session) = self.session.as_mut() {
            session.collaborators = collaborators;
            if let Some(owner) = owner_id {
                session.owner_id = owner;
            }
        }
    }

    /// Assert session ownership for the given participant
    pub fn set_owner(&mut self, owner_id: impl Into<String>) {
        if let Some(session) = self.session.as_mut() {
            session.owner_id = owner_id.into();
        }
    }

    /// Update a participant's ephemeral cursor; returns false when the
    /// participant is unknown
    pub fn update_cursor(&mut self, id: &str, cursor: CursorPosition, now: DateTime<Utc>) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        match session.collaborators.iter_mut().find(|c| c.id == id) {
            Some(collaborator) => {
                collaborator.cursor = Some(cursor);
                collaborator.last_active_at = now;
                true
            }
            None => false,
        }
    }

    /// Forget the session and everyone in it
    pub fn clear(&mut self) {
        self.session = None;
    }
}
