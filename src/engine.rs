//! Collaboration Engine
//!
//! The public entry point. One engine owns one document session: it runs
//! a single sequential task that holds the connection controller, the
//! message router, the outbound queue, and the persisted store, so no
//! state needs locking. The host talks to the task over a command
//! channel and listens on a broadcast of [`EngineEvent`]s.
//!
//! Connect, reconnect timing, queue flushing, and message routing all
//! happen inside the run loop; the pieces themselves are plain state
//! machines tested on their own.

use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::EngineConfig;
use crate::connection::{CloseDirective, ConnectionController, ConnectionState};
use crate::document::DocumentModel;
use crate::error::EngineError;
use crate::events::{emit_event, EngineEvent, EngineEventSender};
use crate::protocol::envelope::{
    ChatPayload, CursorPayload, CursorPoint, JoinPayload, SyncRequestKind, SyncRequestPayload,
};
use crate::protocol::session::{Collaborator, Session};
use crate::protocol::MessageType;
use crate::queue::{OutboundKind, OutboundQueue};
use crate::router::{ChatEntry, LocalIdentity, Router, RouterAction};
use crate::storage::LocalStore;
use crate::transport::{Transport, TransportConn, TransportEvent};

/// Colors handed to joining collaborators
const COLLABORATOR_COLORS: [&str; 8] = [
    "#e74c3c", "#3498db", "#2ecc71", "#f39c12", "#9b59b6", "#1abc9c", "#e67e22", "#34495e",
];

/// Commands the host sends to the run loop
enum Command {
    Connect { via_link: bool, silent: bool },
    Resume,
    Disconnect,
    AddEntity(Value),
    UpdateEntity { entity_id: String, updates: Value },
    RemoveEntity { entity_id: String },
    UpdatePath(Value),
    CursorMove { x: f64, y: f64 },
    Chat(String),
    RequestSync { collaborators_only: bool },
    Collaborators(oneshot::Sender<Vec<Collaborator>>),
    SessionInfo(oneshot::Sender<Option<Session>>),
    ChatLog(oneshot::Sender<Vec<ChatEntry>>),
    State(oneshot::Sender<ConnectionState>),
}

/// Handle to a running collaboration engine.
///
/// Dropping the handle aborts the run loop and closes any live
/// connection.
pub struct Engine {
    commands: mpsc::Sender<Command>,
    events: EngineEventSender,
    task: JoinHandle<()>,
}

impl Engine {
    /// Start an engine for the given session.
    ///
    /// The document model is shared with the host; the engine locks it
    /// only for the duration of one message dispatch.
    pub fn spawn(
        config: EngineConfig,
        local: LocalIdentity,
        document: Arc<Mutex<dyn DocumentModel>>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(64);
        let (event_tx, _) = broadcast::channel(64);

        let store = match &config.storage_path {
            Some(path) => LocalStore::open(path.clone()),
            None => LocalStore::in_memory(),
        };
        let router = Router::new(local, config.document_id.clone(), config.dedupe_window);
        let conn = ConnectionController::new(config.max_reconnect_attempts);

        let runtime = Runtime {
            config,
            router,
            conn,
            queue: OutboundQueue::new(),
            store,
            document,
            transport,
            events: event_tx.clone(),
            socket: None,
            via_link: false,
            color: pick_color(),
            connect_deadline: None,
            reconnect_at: None,
        };

        let task = tokio::spawn(runtime.run(command_rx));
        Self {
            commands: command_tx,
            events: event_tx,
            task,
        }
    }

    /// Subscribe to engine events
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Connect to the session. `via_link` marks this client as having
    /// joined through a shareable link.
    pub async fn connect(&self, via_link: bool) -> Result<(), EngineError> {
        self.send(Command::Connect {
            via_link,
            silent: false,
        })
        .await
    }

    /// Reconnect silently if the persisted store says a session was
    /// active when the process last ran
    pub async fn resume_if_collaborating(&self) -> Result<(), EngineError> {
        self.send(Command::Resume).await
    }

    /// Leave the session and close the connection
    pub async fn disconnect(&self) -> Result<(), EngineError> {
        self.send(Command::Disconnect).await
    }

    /// Broadcast a new entity
    pub async fn add_entity(&self, entity: Value) -> Result<(), EngineError> {
        self.send(Command::AddEntity(entity)).await
    }

    /// Broadcast a partial update to an entity
    pub async fn update_entity(
        &self,
        entity_id: impl Into<String>,
        updates: Value,
    ) -> Result<(), EngineError> {
        self.send(Command::UpdateEntity {
            entity_id: entity_id.into(),
            updates,
        })
        .await
    }

    /// Broadcast an entity removal
    pub async fn remove_entity(&self, entity_id: impl Into<String>) -> Result<(), EngineError> {
        self.send(Command::RemoveEntity {
            entity_id: entity_id.into(),
        })
        .await
    }

    /// Broadcast a partial update to the shared path
    pub async fn update_path(&self, patch: Value) -> Result<(), EngineError> {
        self.send(Command::UpdatePath(patch)).await
    }

    /// Broadcast the local cursor position (dropped when offline)
    pub async fn move_cursor(&self, x: f64, y: f64) -> Result<(), EngineError> {
        self.send(Command::CursorMove { x, y }).await
    }

    /// Send a chat line (dropped when offline)
    pub async fn send_chat(&self, content: impl Into<String>) -> Result<(), EngineError> {
        self.send(Command::Chat(content.into())).await
    }

    /// Ask the session owner for state
    pub async fn request_sync(&self, collaborators_only: bool) -> Result<(), EngineError> {
        self.send(Command::RequestSync { collaborators_only }).await
    }

    /// Current collaborator roster
    pub async fn collaborators(&self) -> Result<Vec<Collaborator>, EngineError> {
        self.query(Command::Collaborators).await
    }

    /// Current session metadata
    pub async fn session(&self) -> Result<Option<Session>, EngineError> {
        self.query(Command::SessionInfo).await
    }

    /// Current chat log
    pub async fn chat_log(&self) -> Result<Vec<ChatEntry>, EngineError> {
        self.query(Command::ChatLog).await
    }

    /// Current connection state
    pub async fn state(&self) -> Result<ConnectionState, EngineError> {
        self.query(Command::State).await
    }

    async fn send(&self, command: Command) -> Result<(), EngineError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| EngineError::transport("engine task stopped"))
    }

    async fn query<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.send(make(tx)).await?;
        rx.await
            .map_err(|_| EngineError::transport("engine task stopped"))
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn pick_color() -> String {
    use rand::seq::SliceRandom;
    COLLABORATOR_COLORS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or("#95a5a6")
        .to_string()
}

/// What woke the run loop
enum LoopInput {
    Command(Option<Command>),
    Transport(Option<TransportEvent>),
    ConnectTimeout,
    ReconnectDue,
}

struct Runtime {
    config: EngineConfig,
    router: Router,
    conn: ConnectionController,
    queue: OutboundQueue,
    store: LocalStore,
    document: Arc<Mutex<dyn DocumentModel>>,
    transport: Arc<dyn Transport>,
    events: EngineEventSender,
    socket: Option<TransportConn>,
    via_link: bool,
    color: String,
    connect_deadline: Option<Instant>,
    reconnect_at: Option<Instant>,
}

impl Runtime {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        tracing::info!("[Engine] run loop started for {}", self.config.document_id);
        loop {
            let connect_deadline = self.connect_deadline;
            let reconnect_at = self.reconnect_at;
            let socket_active = self.socket.is_some();

            let input = tokio::select! {
                cmd = commands.recv() => LoopInput::Command(cmd),
                event = recv_transport(&mut self.socket), if socket_active => {
                    LoopInput::Transport(event)
                }
                _ = sleep_until_opt(connect_deadline), if connect_deadline.is_some() => {
                    LoopInput::ConnectTimeout
                }
                _ = sleep_until_opt(reconnect_at), if reconnect_at.is_some() => {
                    LoopInput::ReconnectDue
                }
            };

            match input {
                LoopInput::Command(None) => {
                    tracing::info!("[Engine] handle dropped, shutting down");
                    self.teardown();
                    break;
                }
                LoopInput::Command(Some(command)) => self.handle_command(command),
                LoopInput::Transport(Some(event)) => self.handle_transport(event),
                LoopInput::Transport(None) => {
                    self.handle_transport(TransportEvent::Failed("transport task ended".into()))
                }
                LoopInput::ConnectTimeout => self.handle_connect_timeout(),
                LoopInput::ReconnectDue => {
                    self.reconnect_at = None;
                    tracing::info!(
                        "[Engine] reconnect attempt {} of {}",
                        self.conn.attempts(),
                        self.config.max_reconnect_attempts
                    );
                    self.conn.begin_reconnect();
                    self.start_connect(true);
                }
            }
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { via_link, silent } => {
                if matches!(
                    self.conn.state(),
                    ConnectionState::Connected | ConnectionState::Connecting
                ) {
                    tracing::debug!("[Engine] connect ignored, already {:?}", self.conn.state());
                    return;
                }
                self.via_link = via_link;
                self.conn.begin_connect(silent);
                self.start_connect(silent);
            }
            Command::Resume => {
                let idle = !matches!(
                    self.conn.state(),
                    ConnectionState::Connected | ConnectionState::Connecting
                );
                if self.store.is_collaborating() && idle {
                    tracing::info!("[Engine] resuming persisted session");
                    self.conn.begin_connect(true);
                    self.start_connect(true);
                }
            }
            Command::Disconnect => self.handle_disconnect(),
            Command::AddEntity(entity) => {
                self.send_or_queue(OutboundKind::Add, serde_json::json!({ "entity": entity }))
            }
            Command::UpdateEntity { entity_id, updates } => self.send_or_queue(
                OutboundKind::Update,
                serde_json::json!({ "entityId": entity_id, "updates": updates }),
            ),
            Command::RemoveEntity { entity_id } => self.send_or_queue(
                OutboundKind::Remove,
                serde_json::json!({ "entityId": entity_id }),
            ),
            Command::UpdatePath(patch) => {
                self.send_or_queue(OutboundKind::Path, serde_json::json!({ "patch": patch }))
            }
            Command::CursorMove { x, y } => self.send_ephemeral(
                MessageType::CursorMove,
                serde_json::to_value(CursorPayload {
                    position: CursorPoint { x, y },
                })
                .unwrap_or(Value::Null),
            ),
            Command::Chat(content) => self.send_ephemeral(
                MessageType::Chat,
                serde_json::to_value(ChatPayload { content }).unwrap_or(Value::Null),
            ),
            Command::RequestSync { collaborators_only } => self.send_ephemeral(
                MessageType::SyncRequest,
                serde_json::to_value(SyncRequestPayload {
                    request_type: if collaborators_only {
                        SyncRequestKind::CollaboratorsOnly
                    } else {
                        SyncRequestKind::Full
                    },
                })
                .unwrap_or(Value::Null),
            ),
            Command::Collaborators(reply) => {
                let _ = reply.send(self.router.presence().collaborators());
            }
            Command::SessionInfo(reply) => {
                let _ = reply.send(self.router.presence().session_snapshot());
            }
            Command::ChatLog(reply) => {
                let _ = reply.send(self.router.chat_log());
            }
            Command::State(reply) => {
                let _ = reply.send(self.conn.state());
            }
        }
    }

    fn start_connect(&mut self, silent: bool) {
        let url = self.config.session_url(self.via_link);
        tracing::info!("[Engine] connecting (silent: {})", silent);
        self.socket = Some(self.transport.connect(&url));
        self.connect_deadline = Some(Instant::now() + self.config.connect_timeout);
    }

    fn handle_disconnect(&mut self) {
        self.reconnect_at = None;
        self.connect_deadline = None;
        if self.conn.is_connected() {
            let leave = self.router.outgoing(MessageType::Leave, Value::Null);
            if let Err(e) = self.send_envelope(&leave) {
                tracing::warn!("[Engine] leave not sent: {}", e);
            }
        }
        self.conn.begin_disconnect();
        // Dropping the socket asks the transport to close with 1000
        self.socket = None;
        self.conn.finish_disconnect();
        self.router.clear_session();
        self.store.set_collaborating(false);
        emit_event(
            &self.events,
            EngineEvent::Disconnected {
                reason: "disconnected by user".to_string(),
                was_error: false,
            },
        );
    }

    fn handle_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened => self.handle_opened(),
            TransportEvent::Message(raw) => self.handle_message(&raw),
            TransportEvent::Closed { code, reason } => {
                self.socket = None;
                self.connect_deadline = None;
                let directive = self
                    .conn
                    .on_close(code, self.router.reconnect_eligible(self.via_link));
                self.apply_directive(directive, format!("closed with code {code}: {reason}"), false);
            }
            TransportEvent::Failed(message) => {
                tracing::warn!("[Engine] transport failure: {}", message);
                self.socket = None;
                self.connect_deadline = None;
                // A failed dial or socket error retries like an abnormal
                // close
                let directive = self
                    .conn
                    .on_close(1006, self.router.reconnect_eligible(self.via_link));
                self.apply_directive(directive, message, true);
            }
        }
    }

    fn handle_connect_timeout(&mut self) {
        let seconds = self.config.connect_timeout.as_secs();
        tracing::warn!("[Engine] connect timed out after {}s", seconds);
        self.connect_deadline = None;
        self.socket = None;
        let directive = self
            .conn
            .on_timeout(self.router.reconnect_eligible(self.via_link));
        self.apply_directive(directive, EngineError::Timeout { seconds }.to_string(), true);
    }

    fn apply_directive(&mut self, directive: CloseDirective, reason: String, failure: bool) {
        match directive {
            CloseDirective::Stay => {
                if !(failure && self.conn.is_silent()) {
                    emit_event(
                        &self.events,
                        EngineEvent::Disconnected {
                            reason,
                            was_error: failure,
                        },
                    );
                }
            }
            CloseDirective::Retry { attempt } => {
                tracing::info!(
                    "[Engine] scheduling reconnect {} in {:?}",
                    attempt,
                    self.config.reconnect_delay
                );
                self.reconnect_at = Some(Instant::now() + self.config.reconnect_delay);
            }
            CloseDirective::GiveUp => {
                tracing::error!("[Engine] reconnect budget exhausted: {}", reason);
                self.conn.on_transport_error();
                self.store.set_collaborating(false);
                if !self.conn.is_silent() {
                    emit_event(
                        &self.events,
                        EngineEvent::Disconnected {
                            reason,
                            was_error: true,
                        },
                    );
                }
            }
            CloseDirective::EntitlementRequired => {
                tracing::warn!("[Engine] reconnect refused, entitlement required");
                self.conn.on_transport_error();
                self.store.set_collaborating(false);
                emit_event(&self.events, EngineEvent::EntitlementRequired);
            }
        }
    }

    fn handle_opened(&mut self) {
        self.connect_deadline = None;
        self.conn.on_open();
        self.store.set_collaborating(true);

        // Buffered mutations go out before the join announcement so
        // peers never see presence ahead of the state it implies
        self.flush_queue();

        let join = self.router.outgoing(
            MessageType::Join,
            serde_json::to_value(JoinPayload {
                color: Some(self.color.clone()),
                role: None,
                via_link: self.via_link,
                request_canvas_state: self.via_link,
                session: None,
            })
            .unwrap_or(Value::Null),
        );
        if let Err(e) = self.send_envelope(&join) {
            tracing::warn!("[Engine] join not sent: {}", e);
        }

        emit_event(&self.events, EngineEvent::Connected);
    }

    fn flush_queue(&mut self) {
        let items = self.queue.drain_for_flush();
        if items.is_empty() {
            return;
        }
        tracing::info!("[Engine] flushing {} buffered mutations", items.len());
        let mut failed = false;
        for item in items {
            if failed {
                self.queue.requeue(item);
                continue;
            }
            let envelope = self
                .router
                .outgoing(item.kind.message_type(), item.data.clone());
            if self.send_envelope(&envelope).is_err() {
                failed = true;
                self.queue.requeue(item);
            }
        }
    }

    fn handle_message(&mut self, raw: &str) {
        let envelope = match crate::protocol::Envelope::decode(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!("[Engine] undecodable message dropped: {}", e);
                return;
            }
        };

        let actions = {
            let mut document = lock_document(&self.document);
            self.router
                .dispatch(&envelope, chrono::Utc::now(), &mut *document, &mut self.store)
        };

        for action in actions {
            match action {
                RouterAction::Send(outgoing) => {
                    if let Err(e) = self.send_envelope(&outgoing) {
                        tracing::warn!("[Engine] reply not sent: {}", e);
                    }
                }
                RouterAction::Emit(event) => {
                    emit_event(&self.events, event);
                }
            }
        }
    }

    fn send_or_queue(&mut self, kind: OutboundKind, data: Value) {
        if self.conn.is_connected() {
            let envelope = self.router.outgoing(kind.message_type(), data.clone());
            if self.send_envelope(&envelope).is_ok() {
                return;
            }
        }
        self.queue.enqueue(kind, data);
    }

    fn send_ephemeral(&mut self, message_type: MessageType, payload: Value) {
        if !self.conn.is_connected() {
            tracing::debug!("[Engine] offline, dropping {:?}", message_type);
            return;
        }
        let envelope = self.router.outgoing(message_type, payload);
        if let Err(e) = self.send_envelope(&envelope) {
            tracing::warn!("[Engine] {:?} not sent: {}", message_type, e);
        }
    }

    fn send_envelope(&mut self, envelope: &crate::protocol::Envelope) -> Result<(), EngineError> {
        let raw = envelope.encode()?;
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| EngineError::transport("no live connection"))?;
        socket
            .outbound
            .send(raw)
            .map_err(|_| EngineError::transport("connection write failed"))
    }

    fn teardown(&mut self) {
        if self.conn.is_connected() {
            let leave = self.router.outgoing(MessageType::Leave, Value::Null);
            let _ = self.send_envelope(&leave);
        }
        self.socket = None;
    }
}

async fn recv_transport(socket: &mut Option<TransportConn>) -> Option<TransportEvent> {
    match socket.as_mut() {
        Some(conn) => conn.events.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn lock_document(
    document: &Arc<Mutex<dyn DocumentModel>>,
) -> MutexGuard<'_, dyn DocumentModel + 'static> {
    match document.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
