//! Row mapping between SQLite and the parlor-types models.
//!
//! Ids are stored as UUID text and timestamps as UTC epoch milliseconds.

use chrono::{DateTime, Utc};
use parlor_types::models::{Message, User};
use rusqlite::Row;
use rusqlite::types::Type;
use uuid::Uuid;

use crate::error::{ChatError, ChatResult};

pub(crate) const USER_COLUMNS: &str =
    "id, external_id, email, name, avatar_url, is_online, last_seen, created_at";

pub(crate) const MESSAGE_COLUMNS: &str =
    "id, conversation_id, sender_id, content, is_deleted, created_at, updated_at";

/// A conversation row before its member list is attached.
pub(crate) struct ConversationRow {
    pub id: Uuid,
    pub kind: String,
    pub name: Option<String>,
    pub created_by: Uuid,
    pub last_message_at: DateTime<Utc>,
    pub last_message_preview: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub(crate) const CONVERSATION_COLUMNS: &str =
    "id, kind, name, created_by, last_message_at, last_message_preview, created_at";

pub(crate) fn uuid_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    from_millis(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms))
}

pub(crate) fn opt_ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<i64>>(idx)? {
        Some(ms) => from_millis(ms)
            .map(Some)
            .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms)),
        None => Ok(None),
    }
}

pub(crate) fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}

/// `from_millis` for values produced by our own clock.
pub(crate) fn millis_to_dt(ms: i64) -> ChatResult<DateTime<Utc>> {
    from_millis(ms).ok_or_else(|| ChatError::Corrupt(format!("timestamp out of range: {}", ms)))
}

pub(crate) fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: uuid_col(row, 0)?,
        external_id: row.get(1)?,
        email: row.get(2)?,
        name: row.get(3)?,
        avatar_url: row.get(4)?,
        is_online: row.get(5)?,
        last_seen: ts_col(row, 6)?,
        created_at: ts_col(row, 7)?,
    })
}

pub(crate) fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: uuid_col(row, 0)?,
        conversation_id: uuid_col(row, 1)?,
        sender_id: uuid_col(row, 2)?,
        content: row.get(3)?,
        is_deleted: row.get(4)?,
        created_at: ts_col(row, 5)?,
        updated_at: opt_ts_col(row, 6)?,
    })
}

pub(crate) fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: uuid_col(row, 0)?,
        kind: row.get(1)?,
        name: row.get(2)?,
        created_by: uuid_col(row, 3)?,
        last_message_at: ts_col(row, 4)?,
        last_message_preview: row.get(5)?,
        created_at: ts_col(row, 6)?,
    })
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> ChatResult<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> ChatResult<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// `?1, ?2, ..` for an `IN (..)` list of `n` bound values.
pub(crate) fn placeholders(n: usize) -> String {
    (1..=n)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}
