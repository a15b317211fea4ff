use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use parlor_db::ChatError;
use parlor_gateway::with_db;
use parlor_types::api::{Claims, MessageResponse, ReactionGroup, SendMessageRequest};
use parlor_types::events::GatewayEvent;
use parlor_types::models::{Message, MessageWithSender};

use crate::auth::{AppState, current_user, require_participant};
use crate::conversations::announce_conversation;
use crate::error::ApiResult;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    /// Defaults to 50 and is clamped to 1..=200 by the store.
    pub limit: Option<u32>,
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    let caller = current_user(&state, &claims).await?;

    let sender_id = caller.id;
    let delivery = with_db(&state.db, move |db| {
        db.deliver_message(conversation_id, sender_id, &req.content)
    })
    .await?;

    let message = MessageWithSender {
        message: delivery.message,
        sender: Some(caller),
    };

    state.dispatcher.broadcast(GatewayEvent::MessageCreate {
        conversation_id,
        message: message.clone(),
    });
    // Sending clears the sender's typing indicator
    state.dispatcher.broadcast(GatewayEvent::TypingStop {
        conversation_id,
        user_id: sender_id,
    });
    announce_conversation(&state, &delivery.conversation, None).await;

    state
        .dispatcher
        .send_to_user(
            sender_id,
            GatewayEvent::UnreadUpdate {
                conversation_id,
                count: 0,
            },
        )
        .await;
    for (user_id, counter) in &delivery.recipients {
        state
            .dispatcher
            .send_to_user(
                *user_id,
                GatewayEvent::UnreadUpdate {
                    conversation_id,
                    count: counter.count,
                },
            )
            .await;
    }

    debug!(
        "Message {} delivered to {} recipients",
        message.message.id,
        delivery.recipients.len()
    );

    Ok((
        StatusCode::CREATED,
        Json(MessageResponse {
            message,
            reactions: vec![],
        }),
    ))
}

/// The most recent messages in chronological order, with reactions attached.
pub async fn list_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<MessageResponse>>> {
    let caller = current_user(&state, &claims).await?;
    require_participant(&state, conversation_id, caller.id).await?;

    let (messages, mut reactions) = with_db(&state.db, move |db| {
        let messages = db.list_messages(conversation_id, query.limit)?;
        let ids: Vec<Uuid> = messages.iter().map(|m| m.message.id).collect();
        let reactions = db.reactions_for_messages(&ids)?;
        Ok((messages, reactions))
    })
    .await?;

    let responses = messages
        .into_iter()
        .map(|message| {
            let summary = reactions.remove(&message.message.id).unwrap_or_default();
            MessageResponse {
                message,
                reactions: ReactionGroup::from_summary(&summary),
            }
        })
        .collect();

    Ok(Json(responses))
}

pub async fn get_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<MessageResponse>> {
    let caller = current_user(&state, &claims).await?;

    let (message, summary) = with_db(&state.db, move |db| {
        let message = db
            .get_message(message_id)?
            .ok_or_else(|| ChatError::not_found("message", message_id))?;
        let summary = db.reactions_for_message(message_id)?;
        Ok((message, summary))
    })
    .await?;
    require_participant(&state, message.message.conversation_id, caller.id).await?;

    Ok(Json(MessageResponse {
        message,
        reactions: ReactionGroup::from_summary(&summary),
    }))
}

/// Soft-delete one of the caller's own messages.
pub async fn delete_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Message>> {
    let caller = current_user(&state, &claims).await?;
    let message = with_db(&state.db, move |db| db.soft_delete_message(message_id, caller.id)).await?;

    state.dispatcher.broadcast(GatewayEvent::MessageDelete {
        conversation_id: message.conversation_id,
        message_id,
    });

    Ok(Json(message))
}
