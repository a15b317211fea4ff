//! Identity directory: user profiles synced from the external identity provider.

use parlor_types::models::User;
use rusqlite::{Connection, params_from_iter};
use tracing::{debug, info};
use uuid::Uuid;

use crate::Database;
use crate::error::{ChatError, ChatResult};
use crate::models::{OptionalExt, USER_COLUMNS, placeholders, user_from_row};

impl Database {
    /// Upsert a profile by external id. An update refreshes email, name and
    /// avatar only; the online flag and last-seen belong to presence tracking.
    /// A newly created user starts out online.
    pub fn sync_profile(
        &self,
        external_id: &str,
        email: &str,
        name: &str,
        avatar_url: Option<&str>,
    ) -> ChatResult<User> {
        if external_id.trim().is_empty() {
            return Err(ChatError::Validation("external id must not be empty".into()));
        }
        if name.trim().is_empty() {
            return Err(ChatError::Validation("display name must not be blank".into()));
        }

        let now = self.now_ms();
        self.with_tx(|tx| {
            let updated = tx.execute(
                "UPDATE users SET email = ?2, name = ?3, avatar_url = ?4 WHERE external_id = ?1",
                (external_id, email, name, avatar_url),
            )?;

            if updated == 0 {
                let id = Uuid::new_v4();
                tx.execute(
                    "INSERT INTO users (id, external_id, email, name, avatar_url, is_online, last_seen, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?6)",
                    (id.to_string(), external_id, email, name, avatar_url, now),
                )?;
                info!("Created user {} for external id {}", id, external_id);
            } else {
                debug!("Refreshed profile for external id {}", external_id);
            }

            query_user_by_external_id(tx, external_id)?
                .ok_or_else(|| ChatError::not_found("user", external_id))
        })
    }

    pub fn get_user(&self, id: Uuid) -> ChatResult<Option<User>> {
        self.with_conn(|conn| query_user(conn, id))
    }

    pub fn get_user_by_external_id(&self, external_id: &str) -> ChatResult<Option<User>> {
        self.with_conn(|conn| query_user_by_external_id(conn, external_id))
    }

    /// Users whose name or email contains `query` (case-insensitive),
    /// excluding the caller. An empty query matches everyone.
    pub fn search_users(&self, query: &str, exclude: Uuid) -> ChatResult<Vec<User>> {
        let needle = query.trim().to_lowercase();
        let users = self.list_users(exclude)?;

        Ok(users
            .into_iter()
            .filter(|u| {
                u.name.to_lowercase().contains(&needle) || u.email.to_lowercase().contains(&needle)
            })
            .collect())
    }

    /// Every user except `exclude`, ordered by name.
    pub fn list_users(&self, exclude: Uuid) -> ChatResult<Vec<User>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users WHERE id != ?1 ORDER BY name COLLATE NOCASE"
            ))?;
            let users = stmt
                .query_map([exclude.to_string()], user_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(users)
        })
    }
}

pub(crate) fn query_user(conn: &Connection, id: Uuid) -> ChatResult<Option<User>> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
        [id.to_string()],
        user_from_row,
    )
    .optional()
}

pub(crate) fn query_user_by_external_id(
    conn: &Connection,
    external_id: &str,
) -> ChatResult<Option<User>> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE external_id = ?1"),
        [external_id],
        user_from_row,
    )
    .optional()
}

pub(crate) fn require_user(conn: &Connection, id: Uuid) -> ChatResult<User> {
    query_user(conn, id)?.ok_or_else(|| ChatError::not_found("user", id))
}

/// Resolve a batch of ids to profiles, ordered by name. Ids that no longer
/// resolve are dropped.
pub(crate) fn query_users(conn: &Connection, ids: &[Uuid]) -> ChatResult<Vec<User>> {
    if ids.is_empty() {
        return Ok(vec![]);
    }

    let sql = format!(
        "SELECT {USER_COLUMNS} FROM users WHERE id IN ({}) ORDER BY name COLLATE NOCASE",
        placeholders(ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let users = stmt
        .query_map(params_from_iter(ids.iter().map(Uuid::to_string)), user_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(users)
}
