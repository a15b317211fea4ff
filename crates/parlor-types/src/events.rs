use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::ReactionGroup;
use crate::models::{Conversation, MessageWithSender};

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid, name: String },

    /// A new message was posted. Content is still encrypted.
    MessageCreate {
        conversation_id: Uuid,
        message: MessageWithSender,
    },

    /// A message was soft-deleted
    MessageDelete {
        conversation_id: Uuid,
        message_id: Uuid,
    },

    /// Conversation metadata changed: preview, name or membership
    ConversationUpdate {
        conversation_id: Uuid,
        conversation: Conversation,
    },

    /// A user started typing
    TypingStart {
        conversation_id: Uuid,
        user_id: Uuid,
        name: String,
    },

    /// A user stopped typing (explicit clear, not expiry)
    TypingStop {
        conversation_id: Uuid,
        user_id: Uuid,
    },

    /// A user came online or went offline
    PresenceUpdate { user_id: Uuid, online: bool },

    /// The reactions on a message changed
    ReactionUpdate {
        conversation_id: Uuid,
        message_id: Uuid,
        reactions: Vec<ReactionGroup>,
    },

    /// The receiving user's unread count for a conversation changed
    UnreadUpdate { conversation_id: Uuid, count: u32 },
}

impl GatewayEvent {
    /// Returns the conversation_id if this event is scoped to a specific conversation.
    /// Events that return `None` are global and delivered to all clients.
    pub fn conversation_id(&self) -> Option<Uuid> {
        match self {
            Self::MessageCreate { conversation_id, .. }
            | Self::MessageDelete { conversation_id, .. }
            | Self::ConversationUpdate { conversation_id, .. }
            | Self::TypingStart { conversation_id, .. }
            | Self::TypingStop { conversation_id, .. }
            | Self::ReactionUpdate { conversation_id, .. } => Some(*conversation_id),
            // Ready and UnreadUpdate are sent to one user; PresenceUpdate is global
            Self::Ready { .. } | Self::PresenceUpdate { .. } | Self::UnreadUpdate { .. } => None,
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Subscribe to events for specific conversations.
    /// Replaces the previous subscription set.
    Subscribe { conversation_ids: Vec<Uuid> },

    /// Indicate typing in a conversation
    StartTyping { conversation_id: Uuid },

    /// Stop the typing indicator (blur or send)
    StopTyping { conversation_id: Uuid },

    /// Liveness signal, optionally naming the conversation being viewed
    Heartbeat {
        #[serde(default)]
        conversation_id: Option<Uuid>,
    },
}
