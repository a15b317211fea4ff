use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde_json::{Value, json};
use uuid::Uuid;

use parlor_gateway::with_db;
use parlor_types::api::{Claims, HeartbeatRequest};
use parlor_types::events::GatewayEvent;

use crate::auth::{AppState, current_user, require_participant};
use crate::error::ApiResult;

/// Heartbeat from a client that is not holding a gateway connection. The
/// body is optional; it may name the conversation being viewed.
pub async fn heartbeat(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    req: Option<Json<HeartbeatRequest>>,
) -> ApiResult<Json<Value>> {
    let caller = current_user(&state, &claims).await?;
    let req = req.map(|Json(req)| req).unwrap_or_default();

    let user_id = caller.id;
    let came_online =
        with_db(&state.db, move |db| db.heartbeat(user_id, req.conversation_id)).await?;

    if came_online {
        state.dispatcher.broadcast(GatewayEvent::PresenceUpdate {
            user_id,
            online: true,
        });
    }

    Ok(Json(json!({ "online": true, "came_online": came_online })))
}

/// Explicit sign-off.
pub async fn go_offline(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<StatusCode> {
    let caller = current_user(&state, &claims).await?;
    let user_id = caller.id;
    with_db(&state.db, move |db| db.go_offline(user_id)).await?;

    state.dispatcher.broadcast(GatewayEvent::PresenceUpdate {
        user_id,
        online: false,
    });

    Ok(StatusCode::NO_CONTENT)
}

/// Users whose fresh heartbeat says they are viewing this conversation.
pub async fn active_in_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<Uuid>>> {
    let caller = current_user(&state, &claims).await?;
    require_participant(&state, conversation_id, caller.id).await?;

    let active = with_db(&state.db, move |db| db.active_in_conversation(conversation_id)).await?;
    Ok(Json(active))
}
