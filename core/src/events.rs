/// Store event stream — fan-out of mutations for live clients (SSE).
use crate::message::MessageRecord;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Real-time events emitted after each successful mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreEvent {
    /// A conversation was created along with its first message.
    ConversationCreated {
        conversation_id: String,
        initiator: String,
        peer: String,
    },
    /// A message was appended to an existing conversation.
    NewMessage {
        conversation_id: String,
        record: MessageRecord,
    },
    /// One participant removed the conversation from their own index.
    ConversationRemoved {
        conversation_id: String,
        user: String,
    },
}

/// Broadcast bus for store events. Slow subscribers lag and skip;
/// writers never block on delivery.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<StoreEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emit an event; no-op when nobody is listening.
    pub fn emit(&self, event: StoreEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
