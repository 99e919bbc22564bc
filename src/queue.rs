//! Outbound Mutation Queue
//!
//! FIFO buffer for document mutations produced while the session is not
//! connected. Only mutation messages are queued; presence, cursor, chat,
//! and sync traffic is connection-scoped and dropped when offline.
//!
//! Delivery is at-least-once: a send that fails during flush goes back to
//! the tail and is retried on the next flush. Peers apply mutations
//! idempotently, so a duplicate delivery is harmless.

use std::collections::VecDeque;

use serde_json::Value;

use crate::protocol::MessageType;

/// The kinds of mutation the queue will hold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundKind {
    /// Partial entity update
    Update,
    /// New entity
    Add,
    /// Entity removal
    Remove,
    /// Partial path update
    Path,
}

impl OutboundKind {
    /// The wire message type this mutation is sent as
    pub fn message_type(&self) -> MessageType {
        match self {
            OutboundKind::Update => MessageType::UpdateEntity,
            OutboundKind::Add => MessageType::AddEntity,
            OutboundKind::Remove => MessageType::RemoveEntity,
            OutboundKind::Path => MessageType::UpdatePath,
        }
    }
}

/// One buffered mutation
#[derive(Debug, Clone)]
pub struct OutboundItem {
    /// Which mutation this is
    pub kind: OutboundKind,
    /// The already-shaped payload for the envelope
    pub data: Value,
}

/// FIFO queue of mutations awaiting a live connection.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    items: VecDeque<OutboundItem>,
}

impl OutboundQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of buffered mutations
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Buffer a mutation at the tail
    pub fn enqueue(&mut self, kind: OutboundKind, data: Value) {
        self.items.push_back(OutboundItem { kind, data });
        tracing::debug!("[Queue] buffered {:?}, depth {}", kind, self.items.len());
    }

    /// Take everything buffered, in arrival order, leaving the queue
    /// empty. Items that fail to send should come back via [`requeue`].
    ///
    /// [`requeue`]: OutboundQueue::requeue
    pub fn drain_for_flush(&mut self) -> Vec<OutboundItem> {
        self.items.drain(..).collect()
    }

    /// Return a failed item to the tail for the next flush
    pub fn requeue(&mut self, item: OutboundItem) {
        tracing::warn!("[Queue] send failed, requeueing {:?}", item.kind);
        self.items.push_back(item);
    }

    /// Drop everything buffered
    pub fn clear(&mut self) {
        self.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fifo_order() {
        let mut queue = OutboundQueue::new();
        queue.enqueue(OutboundKind::Add, json!({"entity": {"id": "a"}}));
        queue.enqueue(OutboundKind::Update, json!({"entityId": "a", "updates": {"x": 1}}));
        queue.enqueue(OutboundKind::Remove, json!({"entityId": "a"}));

        let drained = queue.drain_for_flush();
        assert!(queue.is_empty());
        let kinds: Vec<_> = drained.iter().map(|i| i.kind).collect();
        assert_eq!(
            kinds,
            vec![OutboundKind::Add, OutboundKind::Update, OutboundKind::Remove]
        );
    }

    #[test]
    fn test_requeue_goes_to_tail() {
        let mut queue = OutboundQueue::new();
        queue.enqueue(OutboundKind::Add, json!({"entity": {"id": "a"}}));
        queue.enqueue(OutboundKind::Path, json!({"patch": {}}));

        let mut drained = queue.drain_for_flush();
        let failed = drained.remove(0);
        queue.requeue(failed);
        queue.enqueue(OutboundKind::Remove, json!({"entityId": "b"}));

        let next = queue.drain_for_flush();
        assert_eq!(next[0].kind, OutboundKind::Add);
        assert_eq!(next[1].kind, OutboundKind::Remove);
    }

    #[test]
    fn test_message_type_mapping() {
        assert_eq!(OutboundKind::Update.message_type(), MessageType::UpdateEntity);
        assert_eq!(OutboundKind::Add.message_type(), MessageType::AddEntity);
        assert_eq!(OutboundKind::Remove.message_type(), MessageType::RemoveEntity);
        assert_eq!(OutboundKind::Path.message_type(), MessageType::UpdatePath);
    }
}
