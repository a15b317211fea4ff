use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use serde_json::json;
use uuid::Uuid;

use parlor_db::ChatError;
use parlor_gateway::with_db;
use parlor_types::api::{Claims, ReactionGroup, ToggleReactionRequest};
use parlor_types::events::GatewayEvent;

use crate::auth::{AppState, current_user, require_participant};
use crate::error::ApiResult;

/// Look up the message's conversation and check the caller is in it.
async fn authorize_message(state: &AppState, message_id: Uuid, user_id: Uuid) -> ApiResult<Uuid> {
    let message = with_db(&state.db, move |db| db.get_message(message_id))
        .await?
        .ok_or_else(|| ChatError::not_found("message", message_id))?;
    let conversation_id = message.message.conversation_id;
    require_participant(state, conversation_id, user_id).await?;
    Ok(conversation_id)
}

async fn publish_reactions(
    state: &AppState,
    conversation_id: Uuid,
    message_id: Uuid,
) -> ApiResult<Vec<ReactionGroup>> {
    let summary = with_db(&state.db, move |db| db.reactions_for_message(message_id)).await?;
    let reactions = ReactionGroup::from_summary(&summary);

    state.dispatcher.broadcast(GatewayEvent::ReactionUpdate {
        conversation_id,
        message_id,
        reactions: reactions.clone(),
    });
    Ok(reactions)
}

pub async fn toggle_reaction(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ToggleReactionRequest>,
) -> ApiResult<impl IntoResponse> {
    let caller = current_user(&state, &claims).await?;
    let conversation_id = authorize_message(&state, message_id, caller.id).await?;

    let change = with_db(&state.db, move |db| {
        db.toggle_reaction(message_id, caller.id, &req.emoji)
    })
    .await?;
    let reactions = publish_reactions(&state, conversation_id, message_id).await?;

    Ok(Json(json!({ "change": change, "reactions": reactions })))
}

pub async fn remove_reaction(
    State(state): State<AppState>,
    Path((message_id, emoji)): Path<(Uuid, String)>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let caller = current_user(&state, &claims).await?;
    let conversation_id = authorize_message(&state, message_id, caller.id).await?;

    let removed = with_db(&state.db, move |db| {
        db.remove_reaction(message_id, caller.id, &emoji)
    })
    .await?;

    let reactions = if removed {
        publish_reactions(&state, conversation_id, message_id).await?
    } else {
        let summary = with_db(&state.db, move |db| db.reactions_for_message(message_id)).await?;
        ReactionGroup::from_summary(&summary)
    };

    Ok(Json(json!({ "removed": removed, "reactions": reactions })))
}

pub async fn get_reactions(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<ReactionGroup>>> {
    let caller = current_user(&state, &claims).await?;
    authorize_message(&state, message_id, caller.id).await?;

    let summary = with_db(&state.db, move |db| db.reactions_for_message(message_id)).await?;
    Ok(Json(ReactionGroup::from_summary(&summary)))
}
