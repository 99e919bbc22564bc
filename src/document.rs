//! Document Model Seam
//!
//! The engine transports document mutations but never interprets their
//! contents. The host application supplies a [`DocumentModel`]
//! implementation; the engine calls into it for inbound mutations and
//! reads full snapshots out of it for reconciliation.
//!
//! Entity and path payloads are opaque `serde_json::Value`s throughout.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A full, self-contained snapshot of the document.
///
/// Applying a snapshot with [`DocumentModel::restore`] is a destructive
/// overwrite, not a merge, and must be idempotent: restoring the same
/// snapshot twice yields the same state.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FullState {
    /// All obstacles on the course, as opaque entities
    #[serde(default)]
    pub obstacles: Vec<Value>,
    /// The course path, if one exists
    #[serde(default)]
    pub path: Option<Value>,
    /// Start anchor
    #[serde(default)]
    pub start_point: Option<Value>,
    /// End anchor
    #[serde(default)]
    pub end_point: Option<Value>,
}

/// The document model the engine mutates on behalf of remote peers.
///
/// All calls arrive strictly sequentially from the engine's run loop, so
/// implementations need no internal synchronization beyond what the host
/// already requires.
pub trait DocumentModel: Send {
    /// Add an entity received from a peer
    fn apply_add(&mut self, entity: Value);

    /// Apply a partial update to the entity with the given id
    fn apply_update(&mut self, id: &str, patch: Value);

    /// Remove the entity with the given id
    fn apply_remove(&mut self, id: &str);

    /// Apply a partial update to the course path
    fn apply_path_update(&mut self, patch: Value);

    /// Whether an entity with the given id exists locally
    fn contains(&self, id: &str) -> bool;

    /// Produce a full snapshot of the current document
    fn snapshot(&self) -> FullState;

    /// Replace the full document state with a snapshot
    fn restore(&mut self, state: FullState);
}

/// In-memory document model.
///
/// Keeps entities as raw JSON objects keyed by their `"id"` field and
/// merges update patches shallowly. Handy for tests and for hosts that
/// only need the replicated state, not their own store.
#[derive(Debug, Default)]
pub struct MemoryDocument {
    state: FullState,
}

impl MemoryDocument {
    /// Create an empty document
    pub fn new() -> Self {
        Self::default()
    }

    /// Current obstacle count
    pub fn len(&self) -> usize {
        self.state.obstacles.len()
    }

    /// Whether the document holds no obstacles
    pub fn is_empty(&self) -> bool {
        self.state.obstacles.is_empty()
    }

    fn position_of(&self, id: &str) -> Option<usize> {
        self.state
            .obstacles
            .iter()
            .position(|e| e.get("id").and_then(Value::as_str) == Some(id))
    }
}

impl DocumentModel for MemoryDocument {
    fn apply_add(&mut self, entity: Value) {
        self.state.obstacles.push(entity);
    }

    fn apply_update(&mut self, id: &str, patch: Value) {
        let Some(index) = self.position_of(id) else {
            return;
        };
        let entity = &mut self.state.obstacles[index];
        if let (Some(target), Some(fields)) = (entity.as_object_mut(), patch.as_object()) {
            for (key, value) in fields {
                target.insert(key.clone(), value.clone());
            }
        }
    }

    fn apply_remove(&mut self, id: &str) {
        if let Some(index) = self.position_of(id) {
            self.state.obstacles.remove(index);
        }
    }

    fn apply_path_update(&mut self, patch: Value) {
        match (self.state.path.as_mut().and_then(Value::as_object_mut), patch.as_object()) {
            (Some(target), Some(fields)) => {
                for (key, value) in fields {
                    target.insert(key.clone(), value.clone());
                }
            }
            _ => self.state.path = Some(patch),
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.position_of(id).is_some()
    }

    fn snapshot(&self) -> FullState {
        self.state.clone()
    }

    fn restore(&mut self, state: FullState) {
        self.state = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_add_and_update() {
        let mut doc = MemoryDocument::new();
        doc.apply_add(json!({"id": "a", "x": 1}));
        doc.apply_update("a", json!({"x": 2, "y": 3}));
        assert_eq!(doc.snapshot().obstacles[0], json!({"id": "a", "x": 2, "y": 3}));
    }

    #[test]
    fn test_remove() {
        let mut doc = MemoryDocument::new();
        doc.apply_add(json!({"id": "a"}));
        doc.apply_add(json!({"id": "b"}));
        doc.apply_remove("a");
        assert_eq!(doc.len(), 1);
        assert!(!doc.contains("a"));
        assert!(doc.contains("b"));
    }

    #[test]
    fn test_restore_is_idempotent() {
        let mut doc = MemoryDocument::new();
        doc.apply_add(json!({"id": "local-only"}));

        let snapshot = FullState {
            obstacles: vec![json!({"id": "a"}), json!({"id": "b"})],
            path: Some(json!({"points": []})),
            start_point: Some(json!({"x": 0.0, "y": 0.0})),
            end_point: None,
        };

        doc.restore(snapshot.clone());
        let first = doc.snapshot();
        doc.restore(snapshot);
        let second = doc.snapshot();
        assert_eq!(first, second);
        assert!(!doc.contains("local-only"));
    }

    #[test]
    fn test_path_patch_merges() {
        let mut doc = MemoryDocument::new();
        doc.apply_path_update(json!({"visible": true, "points": [1, 2]}));
        doc.apply_path_update(json!({"visible": false}));
        assert_eq!(
            doc.snapshot().path,
            Some(json!({"visible": false, "points": [1, 2]}))
        );
    }
}
