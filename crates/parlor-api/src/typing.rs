use axum::{
    Extension, Json,
    extract::{Path, State},
};
use serde_json::{Value, json};
use uuid::Uuid;

use parlor_gateway::with_db;
use parlor_types::api::Claims;
use parlor_types::events::GatewayEvent;
use parlor_types::models::User;

use crate::auth::{AppState, current_user, require_participant};
use crate::error::ApiResult;

/// Mark the caller as typing; clients refresh this while the user types.
pub async fn start_typing(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Value>> {
    let caller = current_user(&state, &claims).await?;
    let user_id = caller.id;
    let expires_at = with_db(&state.db, move |db| db.set_typing(conversation_id, user_id)).await?;

    state.dispatcher.broadcast(GatewayEvent::TypingStart {
        conversation_id,
        user_id,
        name: caller.name,
    });

    Ok(Json(json!({ "expires_at": expires_at })))
}

pub async fn stop_typing(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Value>> {
    let caller = current_user(&state, &claims).await?;
    let user_id = caller.id;
    let cleared = with_db(&state.db, move |db| db.clear_typing(conversation_id, user_id)).await?;

    if cleared {
        state.dispatcher.broadcast(GatewayEvent::TypingStop {
            conversation_id,
            user_id,
        });
    }

    Ok(Json(json!({ "cleared": cleared })))
}

/// Users with a live typing indicator in the conversation.
pub async fn active_typers(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<User>>> {
    let caller = current_user(&state, &claims).await?;
    require_participant(&state, conversation_id, caller.id).await?;

    let typers = with_db(&state.db, move |db| db.active_typers(conversation_id)).await?;
    Ok(Json(typers))
}
