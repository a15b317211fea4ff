use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    /// Identifier issued by the external identity provider.
    pub external_id: String,
    pub email: String,
    pub name: String,
    pub avatar_url: Option<String>,
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// The shape of a conversation. A direct conversation always has exactly two
/// participants; only groups carry a name and a variable member list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConversationKind {
    Direct {
        participant_a: Uuid,
        participant_b: Uuid,
    },
    Group {
        name: String,
        participants: Vec<Uuid>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    #[serde(flatten)]
    pub kind: ConversationKind,
    pub created_by: Uuid,
    pub last_message_at: DateTime<Utc>,
    /// Generic placeholder, never derived from message content.
    pub last_message_preview: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn participants(&self) -> Vec<Uuid> {
        match &self.kind {
            ConversationKind::Direct {
                participant_a,
                participant_b,
            } => vec![*participant_a, *participant_b],
            ConversationKind::Group { participants, .. } => participants.clone(),
        }
    }

    pub fn has_participant(&self, user_id: Uuid) -> bool {
        match &self.kind {
            ConversationKind::Direct {
                participant_a,
                participant_b,
            } => *participant_a == user_id || *participant_b == user_id,
            ConversationKind::Group { participants, .. } => participants.contains(&user_id),
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self.kind, ConversationKind::Group { .. })
    }

    pub fn name(&self) -> Option<&str> {
        match &self.kind {
            ConversationKind::Group { name, .. } => Some(name),
            ConversationKind::Direct { .. } => None,
        }
    }
}

/// Message content is opaque to the server: clients encrypt before sending and
/// decrypt after reading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageWithSender {
    #[serde(flatten)]
    pub message: Message,
    /// `None` when the sender's profile no longer resolves.
    pub sender: Option<User>,
}

/// Reactions on one message, grouped by emoji.
pub type ReactionSummary = BTreeMap<String, BTreeSet<Uuid>>;

/// Outcome of toggling a reaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ReactionChange {
    Added { emoji: String },
    Removed { emoji: String },
    Replaced { previous: String, emoji: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceStatus {
    pub user_id: Uuid,
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadCount {
    pub conversation_id: Uuid,
    pub count: u32,
    pub last_read_at: DateTime<Utc>,
}
