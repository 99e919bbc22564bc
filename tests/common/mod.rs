//! Shared test fixtures: a channel-backed transport and envelope helpers.

use std::sync::{Arc, Mutex, Once};

use serde_json::{json, Value};
use tokio::sync::mpsc;

use arena_collab::config::EngineConfig;
use arena_collab::document::{DocumentModel, MemoryDocument};
use arena_collab::engine::Engine;
use arena_collab::router::LocalIdentity;
use arena_collab::transport::{Transport, TransportConn, TransportEvent};

/// One connection attempt as seen from the test side.
pub struct MockHandle {
    pub url: String,
    pub events: mpsc::UnboundedSender<TransportEvent>,
    pub outbound: mpsc::UnboundedReceiver<String>,
}

impl MockHandle {
    /// Tell the engine the socket opened
    pub fn open(&self) {
        self.events
            .send(TransportEvent::Opened)
            .expect("engine gone");
    }

    /// Close the socket with the given code
    pub fn close(&self, code: u16) {
        let _ = self.events.send(TransportEvent::Closed {
            code,
            reason: String::new(),
        });
    }

    /// Deliver an inbound frame
    pub fn deliver(&self, raw: String) {
        self.events
            .send(TransportEvent::Message(raw))
            .expect("engine gone");
    }

    /// Next frame the engine sent, parsed
    pub async fn next_frame(&mut self) -> Value {
        let raw = self.outbound.recv().await.expect("engine closed socket");
        serde_json::from_str(&raw).expect("frame is not json")
    }
}

/// Transport that hands each connection attempt to the test.
pub struct MockTransport {
    handles: mpsc::UnboundedSender<MockHandle>,
}

impl MockTransport {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MockHandle>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { handles: tx }), rx)
    }
}

impl Transport for MockTransport {
    fn connect(&self, url: &str) -> TransportConn {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let _ = self.handles.send(MockHandle {
            url: url.to_string(),
            events: event_tx,
            outbound: out_rx,
        });
        TransportConn {
            outbound: out_tx,
            events: event_rx,
        }
    }
}

pub fn test_config() -> EngineConfig {
    EngineConfig::new("doc-1").with_endpoint("ws://session.test")
}

pub fn local_identity(id: &str, has_entitlement: bool) -> LocalIdentity {
    LocalIdentity {
        id: id.to_string(),
        display_name: format!("user-{id}"),
        has_entitlement,
    }
}

static TRACING: Once = Once::new();

/// Route engine logs through the test writer; `RUST_LOG` controls the
/// level
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Spawn an engine over a mock transport with an in-memory document.
#[allow(clippy::type_complexity)]
pub fn spawn_engine(
    config: EngineConfig,
    local: LocalIdentity,
) -> (
    Engine,
    mpsc::UnboundedReceiver<MockHandle>,
    Arc<Mutex<MemoryDocument>>,
) {
    init_tracing();
    let (transport, handles) = MockTransport::new();
    let document = Arc::new(Mutex::new(MemoryDocument::new()));
    let doc_for_engine: Arc<Mutex<dyn DocumentModel>> = document.clone();
    let engine = Engine::spawn(config, local, doc_for_engine, transport);
    (engine, handles, document)
}

/// Build a raw inbound envelope from a peer
pub fn peer_frame(message_type: &str, sender: &str, payload: Value) -> String {
    json!({
        "type": message_type,
        "senderId": sender,
        "senderName": format!("user-{sender}"),
        "sessionId": "s-1",
        "timestamp": chrono::Utc::now(),
        "payload": payload,
    })
    .to_string()
}
