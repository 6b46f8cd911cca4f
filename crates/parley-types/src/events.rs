use serde::{Deserialize, Serialize};

use crate::models::{ConversationId, MessageEntry, UserId};

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: UserId },

    /// Server acknowledges a subscription; snapshots fetched after this
    /// point cannot miss an append.
    Subscribed { conversation_id: ConversationId },

    /// Server refused a subscription; `code` is a structured error code
    SubscriptionRejected {
        conversation_id: ConversationId,
        code: String,
    },

    /// A message was appended to a conversation
    MessageAppended {
        conversation_id: ConversationId,
        entry: MessageEntry,
    },
}

impl GatewayEvent {
    /// Returns the conversation_id if this event is scoped to one conversation.
    pub fn conversation_id(&self) -> Option<ConversationId> {
        match self {
            Self::Subscribed { conversation_id } => Some(*conversation_id),
            Self::SubscriptionRejected {
                conversation_id, ..
            } => Some(*conversation_id),
            Self::MessageAppended {
                conversation_id, ..
            } => Some(*conversation_id),
            Self::Ready { .. } => None,
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Start receiving appends for a conversation
    Subscribe { conversation_id: ConversationId },

    /// Stop receiving appends for a conversation
    Unsubscribe { conversation_id: ConversationId },
}
