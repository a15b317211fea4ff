use axum::{
    Extension, Json,
    extract::{Path, State},
};
use uuid::Uuid;

use parlor_gateway::with_db;
use parlor_types::api::{Claims, UnreadResponse, UnreadTotalResponse};
use parlor_types::events::GatewayEvent;
use parlor_types::models::UnreadCount;

use crate::auth::{AppState, current_user, require_participant};
use crate::error::ApiResult;

pub async fn mark_read(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<UnreadCount>> {
    let caller = current_user(&state, &claims).await?;
    require_participant(&state, conversation_id, caller.id).await?;

    let user_id = caller.id;
    let counter = with_db(&state.db, move |db| db.mark_read(conversation_id, user_id)).await?;

    // Other sessions of the same user clear their badge too
    state
        .dispatcher
        .send_to_user(
            user_id,
            GatewayEvent::UnreadUpdate {
                conversation_id,
                count: 0,
            },
        )
        .await;

    Ok(Json(counter))
}

pub async fn unread_count(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<UnreadResponse>> {
    let caller = current_user(&state, &claims).await?;
    require_participant(&state, conversation_id, caller.id).await?;

    let user_id = caller.id;
    let count = with_db(&state.db, move |db| db.unread_count(conversation_id, user_id)).await?;
    Ok(Json(UnreadResponse {
        conversation_id,
        count,
    }))
}

/// Total unread across the caller's conversations, with the per-conversation breakdown.
pub async fn unread_for_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<UnreadTotalResponse>> {
    let caller = current_user(&state, &claims).await?;

    let user_id = caller.id;
    let (total, conversations) = with_db(&state.db, move |db| {
        Ok((db.total_unread_for_user(user_id)?, db.unread_for_user(user_id)?))
    })
    .await?;

    Ok(Json(UnreadTotalResponse {
        total,
        conversations,
    }))
}
