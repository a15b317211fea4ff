use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use parlor_db::ChatError;
use parlor_gateway::with_db;
use parlor_types::api::{Claims, SyncProfileRequest};
use parlor_types::models::{PresenceStatus, User};

use crate::auth::{AppState, current_user};
use crate::error::ApiResult;

#[derive(Debug, Deserialize)]
pub struct UserQuery {
    pub search: Option<String>,
}

/// Create or refresh the caller's profile from identity-provider data.
pub async fn sync_profile(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SyncProfileRequest>,
) -> ApiResult<Json<User>> {
    let external_id = claims.sub;
    let user = with_db(&state.db, move |db| {
        db.sync_profile(&external_id, &req.email, &req.name, req.avatar_url.as_deref())
    })
    .await?;

    info!("Profile synced for {} ({})", user.name, user.id);
    Ok(Json(user))
}

pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<User>> {
    Ok(Json(current_user(&state, &claims).await?))
}

/// Everyone except the caller, optionally narrowed by a name/email search.
pub async fn list_users(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<UserQuery>,
) -> ApiResult<Json<Vec<User>>> {
    let caller = current_user(&state, &claims).await?;
    let users = with_db(&state.db, move |db| match query.search {
        Some(search) => db.search_users(&search, caller.id),
        None => db.list_users(caller.id),
    })
    .await?;
    Ok(Json(users))
}

pub async fn online_users(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<User>>> {
    current_user(&state, &claims).await?;
    Ok(Json(with_db(&state.db, |db| db.online_users()).await?))
}

pub async fn get_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<User>> {
    current_user(&state, &claims).await?;
    let user = with_db(&state.db, move |db| db.get_user(user_id))
        .await?
        .ok_or_else(|| ChatError::not_found("user", user_id))?;
    Ok(Json(user))
}

pub async fn user_presence(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<PresenceStatus>> {
    current_user(&state, &claims).await?;
    let status = with_db(&state.db, move |db| db.user_presence(user_id))
        .await?
        .ok_or_else(|| ChatError::not_found("user", user_id))?;
    Ok(Json(status))
}
