//! Inbound Message Router
//!
//! Applies each decoded envelope to local state and answers with the
//! actions the run loop should take: envelopes to send back out and
//! events to raise toward the host. The router owns the presence
//! registry and the chat log; the document model and persisted store are
//! borrowed per dispatch so the run loop stays the single owner.
//!
//! # Dispatch Rules
//!
//! - Own mutations echoed back by the server are dropped before they
//!   touch the document.
//! - An update for an unknown entity self-heals: a minimal entity is
//!   synthesized from the patch and a full sync is requested.
//! - A repeated JOIN for the same collaborator inside the dedupe window
//!   is absorbed: no event, no snapshot push.
//! - Malformed payloads are logged and dropped; they never tear down the
//!   connection.

use std::collections::HashMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::document::DocumentModel;
use crate::events::EngineEvent;
use crate::protocol::envelope::{
    AddEntityPayload, ChatPayload, CursorPayload, ErrorPayload, JoinPayload, RemoveEntityPayload,
    SyncRequestKind, SyncRequestPayload, SyncResponsePayload, UpdateEntityPayload,
    UpdatePathPayload, WireSession,
};
use crate::protocol::session::CursorPosition;
use crate::protocol::{Collaborator, Envelope, MessageType, PresenceRegistry, Role};
use crate::storage::LocalStore;

/// Who the local client is
#[derive(Debug, Clone)]
pub struct LocalIdentity {
    /// Stable client id, also used for echo suppression
    pub id: String,
    /// Name shown to peers
    pub display_name: String,
    /// The local user holds the entitlement that permits collaboration
    pub has_entitlement: bool,
}

/// An action the run loop should take after a dispatch
#[derive(Debug)]
pub enum RouterAction {
    /// Send this envelope to the session
    Send(Envelope),
    /// Raise this event to the host
    Emit(EngineEvent),
}

/// One line of session chat
#[derive(Debug, Clone)]
pub struct ChatEntry {
    /// Local id for the entry
    pub id: Uuid,
    /// Who said it
    pub sender_id: String,
    /// Their display name at the time
    pub sender_name: String,
    /// The line itself
    pub content: String,
    /// Sender-side timestamp
    pub timestamp: DateTime<Utc>,
}

/// Routes inbound envelopes and holds presence plus chat state.
pub struct Router {
    local: LocalIdentity,
    document_id: String,
    dedupe_window: std::time::Duration,
    presence: PresenceRegistry,
    chat_log: Vec<ChatEntry>,
    recent_chat: HashMap<(String, String), DateTime<Utc>>,
}

impl Router {
    /// Create a router for the given local identity and document
    pub fn new(
        local: LocalIdentity,
        document_id: impl Into<String>,
        dedupe_window: std::time::Duration,
    ) -> Self {
        Self {
            local,
            document_id: document_id.into(),
            dedupe_window,
            presence: PresenceRegistry::new(),
            chat_log: Vec::new(),
            recent_chat: HashMap::new(),
        }
    }

    /// The local identity
    pub fn local(&self) -> &LocalIdentity {
        &self.local
    }

    /// The presence registry
    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    /// Mutable access for the run loop (local join bookkeeping)
    pub fn presence_mut(&mut self) -> &mut PresenceRegistry {
        &mut self.presence
    }

    /// Snapshot of the chat log
    pub fn chat_log(&self) -> Vec<ChatEntry> {
        self.chat_log.clone()
    }

    /// Whether the local client may reconnect automatically
    pub fn reconnect_eligible(&self, joined_via_link: bool) -> bool {
        self.local.has_entitlement || joined_via_link
    }

    /// Session id for outgoing envelopes; the document id stands in until
    /// the server has established a session
    pub fn current_session_id(&self) -> String {
        self.presence
            .session()
            .map(|s| s.id.clone())
            .unwrap_or_else(|| self.document_id.clone())
    }

    /// Build an outgoing envelope from the local identity
    pub fn outgoing(&self, message_type: MessageType, payload: Value) -> Envelope {
        Envelope::new(
            message_type,
            self.local.id.clone(),
            self.local.display_name.clone(),
            self.current_session_id(),
            payload,
        )
    }

    /// Forget session-scoped state after a final disconnect
    pub fn clear_session(&mut self) {
        self.presence.clear();
        self.recent_chat.clear();
    }

    /// Apply one inbound envelope.
    ///
    /// Returns the envelopes to send and events to raise, in order.
    pub fn dispatch(
        &mut self,
        envelope: &Envelope,
        now: DateTime<Utc>,
        document: &mut dyn DocumentModel,
        store: &mut LocalStore,
    ) -> Vec<RouterAction> {
        let from_self = envelope.sender_id == self.local.id;

        // Own mutations come back from the server; never re-apply them
        if from_self && envelope.message_type.is_mutation() {
            tracing::trace!("[Router] suppressed echo of {:?}", envelope.message_type);
            return Vec::new();
        }

        match envelope.message_type {
            MessageType::Join => self.on_join(envelope, from_self, now, document, store),
            MessageType::Leave => self.on_leave(envelope, from_self),
            MessageType::UpdateEntity => self.on_update_entity(envelope, document),
            MessageType::AddEntity => self.on_add_entity(envelope, document),
            MessageType::RemoveEntity => self.on_remove_entity(envelope, document),
            MessageType::UpdatePath => self.on_update_path(envelope, document),
            MessageType::CursorMove => self.on_cursor_move(envelope, from_self, now),
            MessageType::SyncRequest => self.on_sync_request(envelope, from_self, document),
            MessageType::SyncResponse => self.on_sync_response(envelope, from_self, now, document),
            MessageType::Chat => self.on_chat(envelope, now),
            MessageType::Error => self.on_error(envelope),
            MessageType::SessionUpdate => self.on_session_update(envelope, now),
        }
    }

    fn on_join(
        &mut self,
        envelope: &Envelope,
        from_self: bool,
        now: DateTime<Utc>,
        document: &mut dyn DocumentModel,
        store: &mut LocalStore,
    ) -> Vec<RouterAction> {
        let payload: JoinPayload = match envelope.payload_as() {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("[Router] bad join payload: {}", e);
                return Vec::new();
            }
        };

        self.presence.ensure_session(
            envelope.session_id.clone(),
            self.document_id.clone(),
            envelope.sender_id.clone(),
            now,
        );

        // Roster carried in the join fills in peers we have not seen
        if let Some(wire) = &payload.session {
            self.absorb_wire_session(wire.clone(), now, false);
        }

        let role = payload.role.unwrap_or(Role::Collaborator);
        let collaborator = Collaborator::new(
            envelope.sender_id.clone(),
            envelope.sender_name.clone(),
            payload
                .color
                .clone()
                .unwrap_or_else(|| "#95a5a6".to_string()),
            role,
            now,
        );
        self.presence.upsert(collaborator.clone());
        if role.asserts_ownership() {
            self.presence.set_owner(envelope.sender_id.clone());
        }

        if from_self {
            return Vec::new();
        }

        // One gate covers both the notification and the snapshot push, so
        // a rapid rejoin costs peers nothing
        if !store.should_surface_join(&envelope.sender_id, now, self.dedupe_window) {
            tracing::debug!("[Router] duplicate join from {} absorbed", envelope.sender_id);
            return Vec::new();
        }

        let mut actions = vec![RouterAction::Emit(EngineEvent::CollaboratorJoined(
            collaborator,
        ))];

        if payload.request_canvas_state && self.presence.is_authoritative(&self.local.id) {
            tracing::info!("[Router] pushing canvas state to {}", envelope.sender_id);
            actions.push(RouterAction::Send(self.build_sync_response(
                SyncRequestKind::Full,
                document,
            )));
        }

        actions
    }

    fn on_leave(&mut self, envelope: &Envelope, from_self: bool) -> Vec<RouterAction> {
        if !from_self && self.presence.remove(&envelope.sender_id) {
            tracing::info!("[Router] {} left the session", envelope.sender_id);
        }
        Vec::new()
    }

    fn on_update_entity(
        &mut self,
        envelope: &Envelope,
        document: &mut dyn DocumentModel,
    ) -> Vec<RouterAction> {
        let payload: UpdateEntityPayload = match envelope.payload_as() {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("[Router] bad update payload: {}", e);
                return Vec::new();
            }
        };

        if document.contains(&payload.entity_id) {
            document.apply_update(&payload.entity_id, payload.updates);
            return Vec::new();
        }

        // Unknown target: synthesize what the patch tells us and ask for
        // the real state rather than dropping the update
        tracing::warn!(
            "[Router] update for unknown entity {}, self-healing",
            payload.entity_id
        );
        let mut entity = json!({ "id": payload.entity_id });
        if let (Some(target), Some(fields)) = (entity.as_object_mut(), payload.updates.as_object())
        {
            for (key, value) in fields {
                target.insert(key.clone(), value.clone());
            }
        }
        document.apply_add(entity);

        vec![RouterAction::Send(self.outgoing(
            MessageType::SyncRequest,
            serde_json::to_value(SyncRequestPayload {
                request_type: SyncRequestKind::Full,
            })
            .unwrap_or(Value::Null),
        ))]
    }

    fn on_add_entity(
        &mut self,
        envelope: &Envelope,
        document: &mut dyn DocumentModel,
    ) -> Vec<RouterAction> {
        let payload: AddEntityPayload = match envelope.payload_as() {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("[Router] bad add payload: {}", e);
                return Vec::new();
            }
        };
        if let Some(id) = payload.entity.get("id").and_then(Value::as_str) {
            if document.contains(id) {
                tracing::debug!("[Router] duplicate add for {} dropped", id);
                return Vec::new();
            }
        }
        document.apply_add(payload.entity);
        Vec::new()
    }

    fn on_remove_entity(
        &mut self,
        envelope: &Envelope,
        document: &mut dyn DocumentModel,
    ) -> Vec<RouterAction> {
        match envelope.payload_as::<RemoveEntityPayload>() {
            Ok(payload) => document.apply_remove(&payload.entity_id),
            Err(e) => tracing::warn!("[Router] bad remove payload: {}", e),
        }
        Vec::new()
    }

    fn on_update_path(
        &mut self,
        envelope: &Envelope,
        document: &mut dyn DocumentModel,
    ) -> Vec<RouterAction> {
        match envelope.payload_as::<UpdatePathPayload>() {
            Ok(payload) => document.apply_path_update(payload.patch),
            Err(e) => tracing::warn!("[Router] bad path payload: {}", e),
        }
        Vec::new()
    }

    fn on_cursor_move(
        &mut self,
        envelope: &Envelope,
        from_self: bool,
        now: DateTime<Utc>,
    ) -> Vec<RouterAction> {
        if from_self {
            return Vec::new();
        }
        let payload: CursorPayload = match envelope.payload_as() {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("[Router] bad cursor payload: {}", e);
                return Vec::new();
            }
        };
        let cursor = CursorPosition {
            x: payload.position.x,
            y: payload.position.y,
        };
        if self.presence.update_cursor(&envelope.sender_id, cursor, now) {
            return Vec::new();
        }

        // A cursor from someone we do not know means our roster is stale
        tracing::debug!(
            "[Router] cursor from unknown {}, requesting roster",
            envelope.sender_id
        );
        vec![RouterAction::Send(self.outgoing(
            MessageType::SyncRequest,
            serde_json::to_value(SyncRequestPayload {
                request_type: SyncRequestKind::CollaboratorsOnly,
            })
            .unwrap_or(Value::Null),
        ))]
    }

    fn on_sync_request(
        &mut self,
        envelope: &Envelope,
        from_self: bool,
        document: &mut dyn DocumentModel,
    ) -> Vec<RouterAction> {
        if from_self {
            return Vec::new();
        }
        // Only the owner answers, so a room full of peers produces one
        // response per request
        if !self.presence.is_authoritative(&self.local.id) {
            return Vec::new();
        }
        let payload: SyncRequestPayload = envelope.payload_as().unwrap_or_default();
        vec![RouterAction::Send(
            self.build_sync_response(payload.request_type, document),
        )]
    }

    fn on_sync_response(
        &mut self,
        envelope: &Envelope,
        from_self: bool,
        now: DateTime<Utc>,
        document: &mut dyn DocumentModel,
    ) -> Vec<RouterAction> {
        if from_self {
            return Vec::new();
        }
        let payload: SyncResponsePayload = match envelope.payload_as() {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("[Router] bad sync response: {}", e);
                return Vec::new();
            }
        };

        if let Some(wire) = payload.session.clone() {
            self.absorb_wire_session(wire, now, true);
        }

        if payload.has_state() {
            tracing::info!("[Router] restoring document from sync response");
            document.restore(payload.into_state());
        }
        Vec::new()
    }

    fn on_chat(&mut self, envelope: &Envelope, now: DateTime<Utc>) -> Vec<RouterAction> {
        let payload: ChatPayload = match envelope.payload_as() {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("[Router] bad chat payload: {}", e);
                return Vec::new();
            }
        };

        let key = (envelope.sender_id.clone(), payload.content.clone());
        let window = ChronoDuration::from_std(self.dedupe_window)
            .unwrap_or_else(|_| ChronoDuration::seconds(5));
        if let Some(last) = self.recent_chat.get(&key) {
            if now.signed_duration_since(*last) < window {
                tracing::debug!("[Router] duplicate chat from {} dropped", envelope.sender_id);
                return Vec::new();
            }
        }
        self.recent_chat.insert(key, now);
        self.recent_chat
            .retain(|_, seen| now.signed_duration_since(*seen) < window);

        self.chat_log.push(ChatEntry {
            id: Uuid::new_v4(),
            sender_id: envelope.sender_id.clone(),
            sender_name: envelope.sender_name.clone(),
            content: payload.content,
            timestamp: envelope.timestamp,
        });
        Vec::new()
    }

    fn on_error(&mut self, envelope: &Envelope) -> Vec<RouterAction> {
        let payload: ErrorPayload = match envelope.payload_as() {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("[Router] bad error payload: {}", e);
                return Vec::new();
            }
        };
        tracing::error!("[Router] peer error {}: {}", payload.code, payload.message);
        vec![RouterAction::Emit(EngineEvent::Error {
            code: payload.code,
            message: payload.message,
        })]
    }

    fn on_session_update(&mut self, envelope: &Envelope, now: DateTime<Utc>) -> Vec<RouterAction> {
        match envelope.payload_as::<WireSession>() {
            Ok(wire) => self.absorb_wire_session(wire, now, true),
            Err(e) => tracing::warn!("[Router] bad session update: {}", e),
        }
        Vec::new()
    }

    fn build_sync_response(
        &self,
        kind: SyncRequestKind,
        document: &mut dyn DocumentModel,
    ) -> Envelope {
        let session = self.presence.session().map(WireSession::from);
        let payload = match kind {
            SyncRequestKind::CollaboratorsOnly => SyncResponsePayload {
                session,
                collaborators_only: true,
                ..Default::default()
            },
            SyncRequestKind::Full => {
                let state = document.snapshot();
                SyncResponsePayload {
                    session,
                    collaborators_only: false,
                    obstacles: Some(state.obstacles),
                    path: state.path,
                    start_point: state.start_point,
                    end_point: state.end_point,
                }
            }
        };
        self.outgoing(
            MessageType::SyncResponse,
            serde_json::to_value(payload).unwrap_or(Value::Null),
        )
    }

    /// Fold a wire session into the registry. `replace` swaps the roster
    /// wholesale (sync responses); otherwise peers are merged in (joins).
    fn absorb_wire_session(&mut self, wire: WireSession, now: DateTime<Utc>, replace: bool) {
        let document_id = if wire.document_id.is_empty() {
            self.document_id.clone()
        } else {
            wire.document_id.clone()
        };
        let owner = wire.owner_id.clone();
        self.presence.ensure_session(
            wire.id.clone(),
            document_id,
            owner.clone().unwrap_or_else(|| self.local.id.clone()),
            wire.created_at.unwrap_or(now),
        );

        let roster: Vec<Collaborator> = wire
            .collaborators
            .into_iter()
            .map(|c| c.into_collaborator(now))
            .collect();

        if replace {
            self.presence.replace_all(roster, owner);
        } else {
            for collaborator in roster {
                if self.presence.get(&collaborator.id).is_none() {
                    self.presence.upsert(collaborator);
                }
            }
            if let Some(owner) = owner {
                self.presence.set_owner(owner);
            }
        }
    }
}
