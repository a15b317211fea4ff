pub mod auth;
pub mod conversations;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod presence;
pub mod reactions;
pub mod typing;
pub mod unread;
pub mod users;

use axum::{
    Router, middleware as axum_middleware,
    routing::{delete, get, post},
};

pub use auth::{AppState, AppStateInner};
pub use error::{ApiError, ApiResult};

/// Every REST route, behind bearer authentication.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Users
        .route("/users", get(users::list_users))
        .route("/users/sync", post(users::sync_profile))
        .route("/users/me", get(users::me))
        .route("/users/online", get(users::online_users))
        .route("/users/{user_id}", get(users::get_user))
        .route("/users/{user_id}/presence", get(users::user_presence))
        // Conversations
        .route("/conversations", get(conversations::list_conversations))
        .route("/conversations/direct", post(conversations::create_direct))
        .route("/conversations/group", post(conversations::create_group))
        .route(
            "/conversations/{conversation_id}",
            get(conversations::get_conversation).patch(conversations::rename_group),
        )
        .route(
            "/conversations/{conversation_id}/participants",
            get(conversations::get_participants),
        )
        .route(
            "/conversations/{conversation_id}/members",
            post(conversations::add_member),
        )
        .route(
            "/conversations/{conversation_id}/members/{user_id}",
            delete(conversations::remove_member),
        )
        // Messages
        .route(
            "/conversations/{conversation_id}/messages",
            get(messages::list_messages).post(messages::send_message),
        )
        .route(
            "/messages/{message_id}",
            get(messages::get_message).delete(messages::delete_message),
        )
        // Reactions
        .route(
            "/messages/{message_id}/reactions",
            get(reactions::get_reactions).post(reactions::toggle_reaction),
        )
        .route(
            "/messages/{message_id}/reactions/{emoji}",
            delete(reactions::remove_reaction),
        )
        // Typing
        .route(
            "/conversations/{conversation_id}/typing",
            get(typing::active_typers)
                .put(typing::start_typing)
                .delete(typing::stop_typing),
        )
        // Presence
        .route("/presence/heartbeat", post(presence::heartbeat))
        .route("/presence/offline", post(presence::go_offline))
        .route(
            "/conversations/{conversation_id}/presence",
            get(presence::active_in_conversation),
        )
        // Unread
        .route("/conversations/{conversation_id}/read", post(unread::mark_read))
        .route("/conversations/{conversation_id}/unread", get(unread::unread_count))
        .route("/unread", get(unread::unread_for_user))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ))
        .with_state(state)
}
