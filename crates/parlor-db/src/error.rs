use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conversation {0} is not a group")]
    NotAGroup(Uuid),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ChatError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

pub type ChatResult<T> = Result<T, ChatError>;
