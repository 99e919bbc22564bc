//! Session Protocol
//!
//! Wire envelope, typed payloads, and session/presence types shared by the
//! router, the connection controller, and the engine run loop.

pub mod envelope;
pub mod session;

pub use envelope::{Envelope, MessageType};
pub use session::{Collaborator, CursorPosition, PresenceRegistry, Role, Session};
