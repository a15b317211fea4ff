use std::sync::Arc;

use jsonwebtoken::{EncodingKey, Header, encode};
use uuid::Uuid;

use parlor_db::Database;
use parlor_gateway::dispatcher::Dispatcher;
use parlor_gateway::with_db;
use parlor_types::api::Claims;
use parlor_types::models::User;

use crate::error::{ApiError, ApiResult};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
    pub dispatcher: Dispatcher,
}

/// Resolve the token's external identity to a synced user.
pub async fn current_user(state: &AppState, claims: &Claims) -> ApiResult<User> {
    let external_id = claims.sub.clone();
    with_db(&state.db, move |db| db.get_user_by_external_id(&external_id))
        .await?
        .ok_or_else(|| ApiError::UnknownCaller(claims.sub.clone()))
}

/// Fail with `Forbidden` unless the user participates in the conversation,
/// `NotFound` if the conversation does not exist.
pub async fn require_participant(
    state: &AppState,
    conversation_id: Uuid,
    user_id: Uuid,
) -> ApiResult<()> {
    let conversation = with_db(&state.db, move |db| db.get_conversation(conversation_id))
        .await?
        .ok_or_else(|| parlor_db::ChatError::not_found("conversation", conversation_id))?;

    if !conversation.has_participant(user_id) {
        return Err(parlor_db::ChatError::Forbidden(format!(
            "{} is not a participant of {}",
            user_id, conversation_id
        ))
        .into());
    }
    Ok(())
}

/// Sign a token for an external identity. The identity provider normally
/// issues these; the server uses it for local tooling and tests.
pub fn create_token(secret: &str, external_id: &str) -> anyhow::Result<String> {
    let claims = Claims {
        sub: external_id.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}
