use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use parlor_db::ChatError;
use parlor_gateway::with_db;
use parlor_types::api::{
    AddMemberRequest, Claims, ConversationSummary, CreateDirectRequest, CreateGroupRequest,
    RenameGroupRequest,
};
use parlor_types::events::GatewayEvent;
use parlor_types::models::{Conversation, User};

use crate::auth::{AppState, current_user, require_participant};
use crate::error::ApiResult;

/// Send a `ConversationUpdate` to every participant, plus `also` (a member
/// who was just removed and would otherwise never hear about it). Targeted
/// rather than broadcast so clients learn of conversations they have not
/// subscribed to yet.
pub(crate) async fn announce_conversation(
    state: &AppState,
    conversation: &Conversation,
    also: Option<Uuid>,
) {
    let also = also.filter(|id| !conversation.has_participant(*id));
    let recipients = conversation.participants().into_iter().chain(also);
    for user_id in recipients {
        state
            .dispatcher
            .send_to_user(
                user_id,
                GatewayEvent::ConversationUpdate {
                    conversation_id: conversation.id,
                    conversation: conversation.clone(),
                },
            )
            .await;
    }
}

/// The caller's conversations, most recent activity first, each with the
/// caller's unread count.
pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<ConversationSummary>>> {
    let caller = current_user(&state, &claims).await?;

    let (conversations, unread) = with_db(&state.db, move |db| {
        let conversations = db.list_conversations_for_user(caller.id)?;
        let unread: HashMap<Uuid, u32> = db
            .unread_for_user(caller.id)?
            .into_iter()
            .map(|u| (u.conversation_id, u.count))
            .collect();
        Ok((conversations, unread))
    })
    .await?;

    let summaries = conversations
        .into_iter()
        .map(|conversation| ConversationSummary {
            unread_count: unread.get(&conversation.id).copied().unwrap_or(0),
            conversation,
        })
        .collect();

    Ok(Json(summaries))
}

pub async fn create_direct(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateDirectRequest>,
) -> ApiResult<impl IntoResponse> {
    let caller = current_user(&state, &claims).await?;
    let conversation =
        with_db(&state.db, move |db| db.get_or_create_direct(caller.id, req.user_id)).await?;

    announce_conversation(&state, &conversation, None).await;
    Ok(Json(conversation))
}

pub async fn create_group(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateGroupRequest>,
) -> ApiResult<impl IntoResponse> {
    let caller = current_user(&state, &claims).await?;
    let conversation = with_db(&state.db, move |db| {
        db.create_group(&req.name, caller.id, &req.participant_ids)
    })
    .await?;

    info!("{} created group {}", caller.name, conversation.id);
    announce_conversation(&state, &conversation, None).await;
    Ok((StatusCode::CREATED, Json(conversation)))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<Uuid>,
) -> ApiResult<Json<Conversation>> {
    let caller = current_user(&state, &claims).await?;
    let conversation = with_db(&state.db, move |db| db.get_conversation(conversation_id))
        .await?
        .ok_or_else(|| ChatError::not_found("conversation", conversation_id))?;

    if !conversation.has_participant(caller.id) {
        return Err(ChatError::Forbidden(format!(
            "{} is not a participant of {}",
            caller.id, conversation_id
        ))
        .into());
    }
    Ok(Json(conversation))
}

pub async fn rename_group(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<RenameGroupRequest>,
) -> ApiResult<Json<Conversation>> {
    let caller = current_user(&state, &claims).await?;
    require_participant(&state, conversation_id, caller.id).await?;

    let conversation =
        with_db(&state.db, move |db| db.rename_group(conversation_id, &req.name)).await?;

    announce_conversation(&state, &conversation, None).await;
    Ok(Json(conversation))
}

pub async fn get_participants(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<Uuid>,
) -> ApiResult<Json<Vec<User>>> {
    let caller = current_user(&state, &claims).await?;
    require_participant(&state, conversation_id, caller.id).await?;

    let users = with_db(&state.db, move |db| db.get_participants(conversation_id)).await?;
    Ok(Json(users))
}

pub async fn add_member(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<AddMemberRequest>,
) -> ApiResult<Json<Conversation>> {
    let caller = current_user(&state, &claims).await?;
    require_participant(&state, conversation_id, caller.id).await?;

    let conversation =
        with_db(&state.db, move |db| db.add_member(conversation_id, req.user_id)).await?;

    announce_conversation(&state, &conversation, None).await;
    Ok(Json(conversation))
}

pub async fn remove_member(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((conversation_id, user_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<Conversation>> {
    let caller = current_user(&state, &claims).await?;
    require_participant(&state, conversation_id, caller.id).await?;

    let conversation =
        with_db(&state.db, move |db| db.remove_member(conversation_id, user_id)).await?;

    announce_conversation(&state, &conversation, Some(user_id)).await;
    Ok(Json(conversation))
}
