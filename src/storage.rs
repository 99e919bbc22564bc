//! Persisted Local State
//!
//! Small JSON file holding the state that must survive a process restart:
//! whether the client considers itself in a session (so a restart can
//! resume), and the per-collaborator join timestamps that back the join
//! dedupe window.
//!
//! Persistence failures are logged and swallowed; losing this file costs
//! a duplicate join notification at worst, never the session.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// The on-disk shape
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PersistedState {
    /// The client was in a session when it last ran
    #[serde(default)]
    is_collaborating: bool,
    /// Last time each collaborator's join was surfaced
    #[serde(default)]
    join_seen: HashMap<String, DateTime<Utc>>,
}

/// Persisted local state with an in-memory fallback.
#[derive(Debug, Default)]
pub struct LocalStore {
    path: Option<PathBuf>,
    state: PersistedState,
}

impl LocalStore {
    /// Open the store at the given path, loading existing state.
    ///
    /// A missing file starts empty; an unreadable or corrupt file is
    /// logged and replaced on the next write.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!("[Storage] corrupt state file {}: {}", path.display(), e);
                PersistedState::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => PersistedState::default(),
            Err(e) => {
                tracing::warn!("[Storage] cannot read {}: {}", path.display(), e);
                PersistedState::default()
            }
        };
        Self {
            path: Some(path),
            state,
        }
    }

    /// In-memory store for hosts that do not persist
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Whether the client was in a session at last persist
    pub fn is_collaborating(&self) -> bool {
        self.state.is_collaborating
    }

    /// Record whether the client is in a session
    pub fn set_collaborating(&mut self, value: bool) {
        self.state.is_collaborating = value;
        self.persist();
    }

    /// Decide whether a JOIN for this collaborator should be surfaced.
    ///
    /// Returns true and records the time when the collaborator has not
    /// been seen joining within the window; returns false for a repeat
    /// inside the window. The window survives restarts, so a reconnecting
    /// client does not re-announce everyone.
    pub fn should_surface_join(
        &mut self,
        collaborator_id: &str,
        now: DateTime<Utc>,
        window: std::time::Duration,
    ) -> bool {
        let window = ChronoDuration::from_std(window).unwrap_or_else(|_| ChronoDuration::seconds(5));
        if let Some(last) = self.state.join_seen.get(collaborator_id) {
            if now.signed_duration_since(*last) < window {
                return false;
            }
        }
        self.state.join_seen.insert(collaborator_id.to_string(), now);
        self.persist();
        true
    }

    /// Forget all join dedupe records
    pub fn clear_join_records(&mut self) {
        self.state.join_seen.clear();
        self.persist();
    }

    fn persist(&self) {
        if let Err(e) = self.try_persist() {
            tracing::warn!("[Storage] persist failed: {}", e);
        }
    }

    fn try_persist(&self) -> Result<(), EngineError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let raw = serde_json::to_string_pretty(&self.state)?;
        std::fs::write(path, raw)
            .map_err(|e| EngineError::storage(format!("write {}: {}", path.display(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_join_dedupe_window() {
        let mut store = LocalStore::in_memory();
        let now = Utc::now();
        let window = Duration::from_secs(5);

        assert!(store.should_surface_join("a", now, window));
        assert!(!store.should_surface_join("a", now + ChronoDuration::seconds(3), window));
        assert!(store.should_surface_join("a", now + ChronoDuration::seconds(6), window));
        assert!(store.should_surface_join("b", now, window));
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("collab.json");
        let now = Utc::now();

        {
            let mut store = LocalStore::open(&path);
            store.set_collaborating(true);
            assert!(store.should_surface_join("a", now, Duration::from_secs(5)));
        }

        let mut reopened = LocalStore::open(&path);
        assert!(reopened.is_collaborating());
        assert!(!reopened.should_surface_join(
            "a",
            now + ChronoDuration::seconds(2),
            Duration::from_secs(5)
        ));
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("collab.json");
        std::fs::write(&path, "not json").unwrap();
        let store = LocalStore::open(&path);
        assert!(!store.is_collaborating());
    }
}
