use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Conversation, MessageWithSender, ReactionSummary, UnreadCount};

// -- JWT Claims --

/// Bearer token claims, shared by the REST middleware and the gateway
/// handshake. `sub` is the identity provider's user id, not ours.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

// -- Users --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncProfileRequest {
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

// -- Conversations --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateDirectRequest {
    pub user_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateGroupRequest {
    pub name: String,
    pub participant_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RenameGroupRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddMemberRequest {
    pub user_id: Uuid,
}

/// A conversation as listed for one user, with that user's unread count.
#[derive(Debug, Serialize)]
pub struct ConversationSummary {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub unread_count: u32,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    #[serde(flatten)]
    pub message: MessageWithSender,
    pub reactions: Vec<ReactionGroup>,
}

// -- Reactions --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToggleReactionRequest {
    pub emoji: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionGroup {
    pub emoji: String,
    pub count: usize,
    pub user_ids: Vec<Uuid>,
}

impl ReactionGroup {
    pub fn from_summary(summary: &ReactionSummary) -> Vec<ReactionGroup> {
        summary
            .iter()
            .map(|(emoji, user_ids)| ReactionGroup {
                emoji: emoji.clone(),
                count: user_ids.len(),
                user_ids: user_ids.iter().copied().collect(),
            })
            .collect()
    }
}

// -- Presence --

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeartbeatRequest {
    #[serde(default)]
    pub conversation_id: Option<Uuid>,
}

// -- Unread --

#[derive(Debug, Serialize)]
pub struct UnreadResponse {
    pub conversation_id: Uuid,
    pub count: u32,
}

#[derive(Debug, Serialize)]
pub struct UnreadTotalResponse {
    pub total: u32,
    pub conversations: Vec<UnreadCount>,
}
