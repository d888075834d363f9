use serde::{Deserialize, Serialize};

use crate::Node;

/// Node lifecycle events (spec.md §4.1, §9's "typed channel per event kind").
///
/// Emitted *after* the store mutation commits (spec.md §5). Delivery is
/// synchronous to registered listeners on the emitting thread; listeners must
/// not re-enter the store's writer from inside a handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum NodeEvent {
    Created(Node),
    Updated(Node),
    Deleted { id: String, node_type: String, owner: String },
}

impl NodeEvent {
    pub fn node_id(&self) -> &str {
        match self {
            NodeEvent::Created(n) | NodeEvent::Updated(n) => n.id(),
            NodeEvent::Deleted { id, .. } => id,
        }
    }
}

/// Fan-out registry: a broadcast channel any number of subscribers can tap.
///
/// A lagging subscriber drops the oldest events rather than blocking the
/// writer (`tokio::sync::broadcast` semantics) — acceptable here since
/// subscribers (remote-sync relays, webhook-queue relays) are expected to
/// keep up or fall back to a catch-up read via `Since`/`GetByType`.
pub struct EventBus {
    sender: tokio::sync::broadcast::Sender<NodeEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<NodeEvent> {
        self.sender.subscribe()
    }

    pub(crate) fn emit(&self, event: NodeEvent) {
        // No receivers is not an error: events are best-effort fan-out, not a
        // delivery guarantee (spec.md Design Notes §9, open question (a)).
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
