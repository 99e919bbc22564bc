//! # arena-collab
//!
//! Session synchronization engine for collaborative editing of a shared
//! design document. Multiple clients connect to a WebSocket session and
//! exchange typed messages to keep replicated state converged: document
//! entities, a shared path, collaborator presence, cursors, and chat.
//!
//! # Module Structure
//!
//! - **`engine`** - public handle; spawns the single sequential run-loop
//!   task that owns all mutable state
//! - **`connection`** - connection lifecycle state machine with a bounded
//!   reconnect budget
//! - **`protocol`** - wire envelope, typed payloads, session and presence
//!   types
//! - **`router`** - applies inbound messages to local state and decides
//!   replies
//! - **`queue`** - FIFO buffer for mutations produced while offline
//! - **`document`** - the document model seam the host implements
//! - **`transport`** - WebSocket transport behind a trait for testing
//! - **`storage`** - small persisted file for resume and join dedupe
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::{Arc, Mutex};
//! use arena_collab::config::EngineConfig;
//! use arena_collab::document::{DocumentModel, MemoryDocument};
//! use arena_collab::engine::Engine;
//! use arena_collab::router::LocalIdentity;
//! use arena_collab::transport::WsTransport;
//!
//! # async fn example() -> Result<(), arena_collab::error::EngineError> {
//! let config = EngineConfig::new("design-42").with_token("secret");
//! let local = LocalIdentity {
//!     id: "client-1".to_string(),
//!     display_name: "Alice".to_string(),
//!     has_entitlement: true,
//! };
//! let document: Arc<Mutex<dyn DocumentModel>> =
//!     Arc::new(Mutex::new(MemoryDocument::new()));
//!
//! let engine = Engine::spawn(config, local, document, Arc::new(WsTransport::new()));
//! let mut _events = engine.subscribe();
//! engine.connect(false).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod document;
pub mod engine;
pub mod error;
pub mod events;
pub mod protocol;
pub mod queue;
pub mod router;
pub mod storage;
pub mod transport;

pub use config::EngineConfig;
pub use connection::ConnectionState;
pub use document::{DocumentModel, FullState, MemoryDocument};
pub use engine::Engine;
pub use error::EngineError;
pub use events::EngineEvent;
pub use protocol::{Collaborator, Envelope, MessageType, Role, Session};
pub use router::{ChatEntry, LocalIdentity};
pub use transport::{Transport, TransportConn, TransportEvent, WsTransport};
