//! Engine Event System
//!
//! Typed events raised by the engine toward the host application. These
//! replace any host-runtime event bus: consumers subscribe through the
//! engine and receive a copy of each event over a broadcast channel.
//!
//! Events are the only coupling point between the engine and UI concerns
//! such as toasts or on-screen cursors.

use crate::protocol::session::Collaborator;
use tokio::sync::broadcast;

/// Events raised to the host application
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// The session connection is established and JOIN has been sent
    Connected,
    /// The session connection ended
    Disconnected {
        /// Why the connection ended
        reason: String,
        /// Whether the disconnect was a failure rather than a clean close
        was_error: bool,
    },
    /// A new collaborator joined the session (deduped per collaborator)
    CollaboratorJoined(Collaborator),
    /// Collaboration was refused because the local user has no
    /// entitlement and did not join via a shareable link
    EntitlementRequired,
    /// An error surfaced by a peer or the server
    Error {
        /// Machine-readable error code
        code: String,
        /// Human-readable error message
        message: String,
    },
}

/// Broadcast sender for engine events
///
/// Can be cloned and shared; every subscriber receives a copy of each
/// event. Sending with no subscribers is not an error.
pub type EngineEventSender = broadcast::Sender<EngineEvent>;

/// Broadcast an event to all subscribers.
///
/// Returns the number of subscribers that received the event (0 when
/// nobody is listening, which is fine).
pub fn emit_event(tx: &EngineEventSender, event: EngineEvent) -> usize {
    match tx.send(event) {
        Ok(subscriber_count) => subscriber_count,
        Err(e) => {
            // No subscribers, that's okay
            tracing::debug!("[Events] no subscribers to receive event: {:?}", e.0);
            0
        }
    }
}
