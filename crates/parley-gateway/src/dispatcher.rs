use std::sync::Arc;

use tokio::sync::broadcast;

use parley_types::events::GatewayEvent;
use parley_types::models::{ConversationId, MessageEntry};

/// Capacity of the fan-out channel. A receiver that falls further behind
/// than this sees `RecvError::Lagged` and must resynchronise from a snapshot.
const BROADCAST_CAPACITY: usize = 1024;

/// Fans conversation changes out to every live subscriber, in-process or
/// over the WebSocket gateway.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// All subscribers receive all events and filter by conversation_id
    broadcast_tx: broadcast::Sender<GatewayEvent>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            inner: Arc::new(DispatcherInner { broadcast_tx }),
        }
    }

    /// Subscribe to gateway events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Broadcast an event to all subscribers.
    pub fn broadcast(&self, event: GatewayEvent) {
        // No receivers is not an error: nobody is watching right now.
        let _ = self.inner.broadcast_tx.send(event);
    }

    pub fn message_appended(&self, conversation_id: ConversationId, entry: MessageEntry) {
        self.broadcast(GatewayEvent::MessageAppended {
            conversation_id,
            entry,
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.broadcast_tx.receiver_count()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
