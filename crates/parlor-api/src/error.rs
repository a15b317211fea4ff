use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use parlor_db::ChatError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Missing or invalid bearer token")]
    Unauthorized,

    /// Valid token, but the identity has never synced a profile.
    #[error("No user for identity {0}")]
    UnknownCaller(String),

    #[error(transparent)]
    Chat(#[from] ChatError),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized | ApiError::UnknownCaller(_) => StatusCode::UNAUTHORIZED,
            ApiError::Chat(e) => match e {
                ChatError::NotFound { .. } => StatusCode::NOT_FOUND,
                ChatError::Validation(_) => StatusCode::BAD_REQUEST,
                ChatError::NotAGroup(_) => StatusCode::CONFLICT,
                ChatError::Forbidden(_) => StatusCode::FORBIDDEN,
                ChatError::Storage(_) | ChatError::Corrupt(_) | ChatError::Internal(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            error!("Request failed: {}", self);
            "Internal server error".to_string()
        } else {
            warn!("Request rejected ({}): {}", status.as_u16(), self);
            self.to_string()
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    #[test]
    fn chat_errors_map_to_statuses() {
        let cases = [
            (ChatError::not_found("user", Uuid::nil()), StatusCode::NOT_FOUND),
            (ChatError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (ChatError::NotAGroup(Uuid::nil()), StatusCode::CONFLICT),
            (ChatError::Forbidden("x".into()), StatusCode::FORBIDDEN),
            (ChatError::Corrupt("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
        assert_eq!(ApiError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::UnknownCaller("ext".into()).status(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn server_errors_hide_details() {
        let response =
            ApiError::from(ChatError::Internal(anyhow::anyhow!("disk on fire"))).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
