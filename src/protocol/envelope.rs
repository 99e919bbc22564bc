//! Wire Envelope
//!
//! Every session message travels as a JSON envelope with a uniform shape:
//! a message type tag, sender identity, session id, timestamp, and a
//! type-specific payload. Field names on the wire are camelCase; this
//! module owns the serde mapping so the rest of the crate stays snake_case.
//!
//! Unknown message types fail decoding and are dropped by the router with
//! a log line; they never tear down the connection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EngineError;
use crate::protocol::session::{Collaborator, Role, Session};

/// Message type tag carried in every envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// A collaborator entered the session
    Join,
    /// A collaborator left the session
    Leave,
    /// Partial update to one entity
    UpdateEntity,
    /// A new entity was created
    AddEntity,
    /// An entity was deleted
    RemoveEntity,
    /// Partial update to the shared path
    UpdatePath,
    /// Ephemeral cursor movement
    CursorMove,
    /// Ask peers for state
    SyncRequest,
    /// Full or partial state in reply to a request
    SyncResponse,
    /// In-session chat line
    Chat,
    /// Peer- or server-surfaced error
    Error,
    /// Session metadata changed
    SessionUpdate,
}

impl MessageType {
    /// Whether this type mutates replicated document state.
    ///
    /// Mutation types are subject to echo suppression and are the only
    /// types the outbound queue will hold.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            MessageType::UpdateEntity
                | MessageType::AddEntity
                | MessageType::RemoveEntity
                | MessageType::UpdatePath
        )
    }
}

/// The uniform wire envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Message type tag
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// Stable id of the sending client
    #[serde(rename = "senderId")]
    pub sender_id: String,
    /// Display name of the sending client
    #[serde(rename = "senderName")]
    pub sender_name: String,
    /// Session the message belongs to
    #[serde(rename = "sessionId")]
    pub session_id: String,
    /// When the sender produced the message
    pub timestamp: DateTime<Utc>,
    /// Type-specific payload
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    /// Build an envelope stamped with the current time
    pub fn new(
        message_type: MessageType,
        sender_id: impl Into<String>,
        sender_name: impl Into<String>,
        session_id: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            message_type,
            sender_id: sender_id.into(),
            sender_name: sender_name.into(),
            session_id: session_id.into(),
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Serialize for the wire
    pub fn encode(&self) -> Result<String, EngineError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse an envelope off the wire
    pub fn decode(raw: &str) -> Result<Self, EngineError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Deserialize the payload into a typed form
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, EngineError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// Payload of a JOIN message
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinPayload {
    /// Identifying color chosen by the joining client
    #[serde(default)]
    pub color: Option<String>,
    /// Role the sender claims
    #[serde(default)]
    pub role: Option<Role>,
    /// Sender joined through a shareable link
    #[serde(default)]
    pub via_link: bool,
    /// Sender wants the current canvas state pushed to it
    #[serde(default)]
    pub request_canvas_state: bool,
    /// Session metadata as the sender knows it
    #[serde(default)]
    pub session: Option<WireSession>,
}

/// Payload of an UPDATE_ENTITY message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEntityPayload {
    /// Target entity
    pub entity_id: String,
    /// Fields to merge into the entity
    pub updates: Value,
}

/// Payload of an ADD_ENTITY message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddEntityPayload {
    /// The complete new entity
    pub entity: Value,
}

/// Payload of a REMOVE_ENTITY message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveEntityPayload {
    /// Entity to delete
    pub entity_id: String,
}

/// Payload of an UPDATE_PATH message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePathPayload {
    /// Fields to merge into the path
    pub patch: Value,
}

/// Payload of a CURSOR_MOVE message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorPayload {
    /// Canvas-space cursor position
    pub position: CursorPoint,
}

/// Canvas-space point carried in cursor messages
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CursorPoint {
    pub x: f64,
    pub y: f64,
}

/// Payload of a CHAT message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    /// The chat line
    pub content: String,
}

/// What a SYNC_REQUEST asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncRequestKind {
    /// Full document state plus session metadata
    #[default]
    Full,
    /// Only the collaborator roster, no document state
    CollaboratorsOnly,
}

/// Payload of a SYNC_REQUEST message
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequestPayload {
    /// What the requester wants back
    #[serde(default)]
    pub request_type: SyncRequestKind,
}

/// Payload of a SYNC_RESPONSE message
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponsePayload {
    /// Session metadata and collaborator roster
    #[serde(default)]
    pub session: Option<WireSession>,
    /// Set when the response carries only the roster
    #[serde(default)]
    pub collaborators_only: bool,
    /// Document entities
    #[serde(default)]
    pub obstacles: Option<Vec<Value>>,
    /// Document path
    #[serde(default)]
    pub path: Option<Value>,
    /// Start anchor
    #[serde(default)]
    pub start_point: Option<Value>,
    /// End anchor
    #[serde(default)]
    pub end_point: Option<Value>,
}

impl SyncResponsePayload {
    /// Whether the response carries document state to restore
    pub fn has_state(&self) -> bool {
        !self.collaborators_only
            && (self.obstacles.is_some()
                || self.path.is_some()
                || self.start_point.is_some()
                || self.end_point.is_some())
    }

    /// Extract the document snapshot from the response
    pub fn into_state(self) -> crate::document::FullState {
        crate::document::FullState {
            obstacles: self.obstacles.unwrap_or_default(),
            path: self.path,
            start_point: self.start_point,
            end_point: self.end_point,
        }
    }
}

/// Payload of an ERROR message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    /// Machine-readable code
    #[serde(default)]
    pub code: String,
    /// Human-readable message
    pub message: String,
}

/// Session metadata as carried on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireSession {
    /// Session id
    pub id: String,
    /// Document the session collaborates on
    #[serde(default)]
    pub document_id: String,
    /// Current owner
    #[serde(default)]
    pub owner_id: Option<String>,
    /// Participants
    #[serde(default)]
    pub collaborators: Vec<WireCollaborator>,
    /// When the session was created
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Collaborator record as carried on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireCollaborator {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
}

impl WireCollaborator {
    /// Convert into a presence record seen at the given time
    pub fn into_collaborator(self, now: DateTime<Utc>) -> Collaborator {
        Collaborator::new(
            self.id,
            self.name,
            self.color.unwrap_or_else(|| "#95a5a6".to_string()),
            self.role.unwrap_or(Role::Collaborator),
            now,
        )
    }
}

impl From<&Session> for WireSession {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id.clone(),
            document_id: session.document_id.clone(),
            owner_id: Some(session.owner_id.clone()),
            collaborators: session
                .collaborators
                .iter()
                .map(|c| WireCollaborator {
                    id: c.id.clone(),
                    name: c.display_name.clone(),
                    color: Some(c.color.clone()),
                    role: Some(c.role),
                })
                .collect(),
            created_at: Some(session.created_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_wire_shape() {
        let envelope = Envelope::new(
            MessageType::AddEntity,
            "client-1",
            "Alice",
            "session-9",
            json!({"entity": {"id": "obs-1"}}),
        );
        let raw = envelope.encode().unwrap();
        let value: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["type"], "add_entity");
        assert_eq!(value["senderId"], "client-1");
        assert_eq!(value["senderName"], "Alice");
        assert_eq!(value["sessionId"], "session-9");
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_decode_round_trip() {
        let raw = r#"{
            "type": "update_entity",
            "senderId": "client-2",
            "senderName": "Bob",
            "sessionId": "session-9",
            "timestamp": "2026-08-27T10:00:00Z",
            "payload": {"entityId": "obs-1", "updates": {"x": 4}}
        }"#;
        let envelope = Envelope::decode(raw).unwrap();
        assert_eq!(envelope.message_type, MessageType::UpdateEntity);
        let payload: UpdateEntityPayload = envelope.payload_as().unwrap();
        assert_eq!(payload.entity_id, "obs-1");
        assert_eq!(payload.updates["x"], 4);
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let raw = r#"{
            "type": "compact",
            "senderId": "a",
            "senderName": "A",
            "sessionId": "s",
            "timestamp": "2026-08-27T10:00:00Z",
            "payload": {}
        }"#;
        assert!(Envelope::decode(raw).is_err());
    }

    #[test]
    fn test_missing_payload_defaults_to_null() {
        let raw = r#"{
            "type": "leave",
            "senderId": "a",
            "senderName": "A",
            "sessionId": "s",
            "timestamp": "2026-08-27T10:00:00Z"
        }"#;
        let envelope = Envelope::decode(raw).unwrap();
        assert!(envelope.payload.is_null());
    }

    #[test]
    fn test_mutation_classification() {
        assert!(MessageType::UpdateEntity.is_mutation());
        assert!(MessageType::AddEntity.is_mutation());
        assert!(MessageType::RemoveEntity.is_mutation());
        assert!(MessageType::UpdatePath.is_mutation());
        assert!(!MessageType::Join.is_mutation());
        assert!(!MessageType::CursorMove.is_mutation());
        assert!(!MessageType::SyncRequest.is_mutation());
    }

    #[test]
    fn test_sync_response_state_detection() {
        let roster_only = SyncResponsePayload {
            collaborators_only: true,
            obstacles: Some(vec![json!({"id": "x"})]),
            ..Default::default()
        };
        assert!(!roster_only.has_state());

        let full = SyncResponsePayload {
            obstacles: Some(vec![json!({"id": "x"})]),
            ..Default::default()
        };
        assert!(full.has_state());
        let state = full.into_state();
        assert_eq!(state.obstacles.len(), 1);
    }

    #[test]
    fn test_join_payload_defaults() {
        let payload: JoinPayload = serde_json::from_value(json!({})).unwrap();
        assert!(!payload.via_link);
        assert!(!payload.request_canvas_state);
        assert!(payload.session.is_none());
    }
}
