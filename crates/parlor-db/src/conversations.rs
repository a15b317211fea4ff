//! Conversation registry: direct and group conversations and their membership.

use std::collections::BTreeSet;

use parlor_types::models::{Conversation, ConversationKind, User};
use rusqlite::Connection;
use tracing::{debug, info};
use uuid::Uuid;

use crate::Database;
use crate::error::{ChatError, ChatResult};
use crate::models::{
    CONVERSATION_COLUMNS, ConversationRow, OptionalExt, conversation_from_row, uuid_col,
};
use crate::users::{query_users, require_user};

impl Database {
    /// Find the direct conversation between two users, creating it on first
    /// contact. The pair is unordered: `(a, b)` and `(b, a)` resolve to the
    /// same conversation, and a unique key on the sorted pair keeps two
    /// concurrent callers from creating duplicates.
    pub fn get_or_create_direct(&self, user_a: Uuid, user_b: Uuid) -> ChatResult<Conversation> {
        if user_a == user_b {
            return Err(ChatError::Validation(
                "a direct conversation needs two distinct users".into(),
            ));
        }

        let key = direct_key(user_a, user_b);
        let now = self.now_ms();

        self.with_tx(|tx| {
            require_user(tx, user_a)?;
            require_user(tx, user_b)?;

            let id = Uuid::new_v4();
            let inserted = tx.execute(
                "INSERT INTO conversations (id, kind, name, direct_key, created_by, last_message_at, created_at)
                 VALUES (?1, 'direct', NULL, ?2, ?3, ?4, ?4)
                 ON CONFLICT(direct_key) DO NOTHING",
                (id.to_string(), &key, user_a.to_string(), now),
            )?;

            if inserted == 1 {
                insert_member(tx, id, user_a, now)?;
                insert_member(tx, id, user_b, now)?;
                info!("Created direct conversation {} ({} <-> {})", id, user_a, user_b);
            }

            let existing: String = tx.query_row(
                "SELECT id FROM conversations WHERE direct_key = ?1",
                [&key],
                |row| row.get(0),
            )?;
            let existing = Uuid::parse_str(&existing)
                .map_err(|e| ChatError::Corrupt(format!("conversation id '{}': {}", existing, e)))?;

            require_conversation(tx, existing)
        })
    }

    /// Create a group. The creator is always a member; the member set,
    /// creator included, must have at least two distinct users.
    pub fn create_group(
        &self,
        name: &str,
        creator_id: Uuid,
        participant_ids: &[Uuid],
    ) -> ChatResult<Conversation> {
        let name = validate_group_name(name)?;

        let mut members: BTreeSet<Uuid> = participant_ids.iter().copied().collect();
        members.insert(creator_id);
        if members.len() < 2 {
            return Err(ChatError::Validation(
                "a group needs at least two participants".into(),
            ));
        }

        let now = self.now_ms();
        self.with_tx(|tx| {
            for member in &members {
                require_user(tx, *member)?;
            }

            let id = Uuid::new_v4();
            tx.execute(
                "INSERT INTO conversations (id, kind, name, direct_key, created_by, last_message_at, created_at)
                 VALUES (?1, 'group', ?2, NULL, ?3, ?4, ?4)",
                (id.to_string(), name, creator_id.to_string(), now),
            )?;

            // Creator first so member order reflects who started the group.
            insert_member(tx, id, creator_id, now)?;
            for member in members.iter().filter(|m| **m != creator_id) {
                insert_member(tx, id, *member, now)?;
            }

            info!(
                "Created group {} '{}' with {} members",
                id,
                name,
                members.len()
            );
            require_conversation(tx, id)
        })
    }

    pub fn get_conversation(&self, id: Uuid) -> ChatResult<Option<Conversation>> {
        self.with_conn(|conn| load_conversation(conn, id))
    }

    /// Conversations the user belongs to, most recent activity first.
    pub fn list_conversations_for_user(&self, user_id: Uuid) -> ChatResult<Vec<Conversation>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.kind, c.name, c.created_by, c.last_message_at, c.last_message_preview, c.created_at
                 FROM conversations c
                 JOIN conversation_members m ON m.conversation_id = c.id
                 WHERE m.user_id = ?1
                 ORDER BY c.last_message_at DESC, c.created_at DESC",
            )?;
            let rows = stmt
                .query_map([user_id.to_string()], conversation_from_row)?
                .collect::<Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|row| {
                    let members = query_member_ids(conn, row.id)?;
                    assemble(row, members)
                })
                .collect()
        })
    }

    /// Profiles of the conversation's members. Members whose profile no
    /// longer resolves are left out; an unknown conversation has none.
    pub fn get_participants(&self, conversation_id: Uuid) -> ChatResult<Vec<User>> {
        self.with_conn(|conn| {
            let ids = query_member_ids(conn, conversation_id)?;
            query_users(conn, &ids)
        })
    }

    pub fn is_participant(&self, conversation_id: Uuid, user_id: Uuid) -> ChatResult<bool> {
        self.with_conn(|conn| is_member(conn, conversation_id, user_id))
    }

    /// Add a user to a group. Adding an existing member is a no-op.
    pub fn add_member(&self, conversation_id: Uuid, user_id: Uuid) -> ChatResult<Conversation> {
        let now = self.now_ms();
        self.with_tx(|tx| {
            require_group(tx, conversation_id)?;
            require_user(tx, user_id)?;

            let added = tx.execute(
                "INSERT OR IGNORE INTO conversation_members (conversation_id, user_id, joined_at)
                 VALUES (?1, ?2, ?3)",
                (conversation_id.to_string(), user_id.to_string(), now),
            )?;
            if added == 1 {
                info!("Added {} to group {}", user_id, conversation_id);
            }

            require_conversation(tx, conversation_id)
        })
    }

    /// Remove a user from a group, along with their unread counter and typing
    /// indicator there. Removing a non-member is a no-op.
    pub fn remove_member(&self, conversation_id: Uuid, user_id: Uuid) -> ChatResult<Conversation> {
        self.with_tx(|tx| {
            require_group(tx, conversation_id)?;

            let cid = conversation_id.to_string();
            let uid = user_id.to_string();
            let removed = tx.execute(
                "DELETE FROM conversation_members WHERE conversation_id = ?1 AND user_id = ?2",
                (&cid, &uid),
            )?;
            tx.execute(
                "DELETE FROM unread_counters WHERE conversation_id = ?1 AND user_id = ?2",
                (&cid, &uid),
            )?;
            tx.execute(
                "DELETE FROM typing_indicators WHERE conversation_id = ?1 AND user_id = ?2",
                (&cid, &uid),
            )?;
            if removed == 1 {
                info!("Removed {} from group {}", user_id, conversation_id);
            }

            require_conversation(tx, conversation_id)
        })
    }

    pub fn rename_group(&self, conversation_id: Uuid, name: &str) -> ChatResult<Conversation> {
        let name = validate_group_name(name)?;
        self.with_tx(|tx| {
            require_group(tx, conversation_id)?;
            tx.execute(
                "UPDATE conversations SET name = ?2 WHERE id = ?1",
                (conversation_id.to_string(), name),
            )?;
            debug!("Renamed group {} to '{}'", conversation_id, name);
            require_conversation(tx, conversation_id)
        })
    }
}

/// Canonical key for an unordered pair of users.
pub(crate) fn direct_key(a: Uuid, b: Uuid) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{}:{}", lo, hi)
}

fn validate_group_name(name: &str) -> ChatResult<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ChatError::Validation("group name must not be blank".into()));
    }
    Ok(name)
}

fn insert_member(conn: &Connection, conversation_id: Uuid, user_id: Uuid, now: i64) -> ChatResult<()> {
    conn.execute(
        "INSERT OR IGNORE INTO conversation_members (conversation_id, user_id, joined_at)
         VALUES (?1, ?2, ?3)",
        (conversation_id.to_string(), user_id.to_string(), now),
    )?;
    Ok(())
}

pub(crate) fn query_member_ids(conn: &Connection, conversation_id: Uuid) -> ChatResult<Vec<Uuid>> {
    let mut stmt = conn.prepare(
        "SELECT user_id FROM conversation_members
         WHERE conversation_id = ?1
         ORDER BY joined_at, rowid",
    )?;
    let ids = stmt
        .query_map([conversation_id.to_string()], |row| uuid_col(row, 0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

pub(crate) fn is_member(conn: &Connection, conversation_id: Uuid, user_id: Uuid) -> ChatResult<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM conversation_members WHERE conversation_id = ?1 AND user_id = ?2",
            (conversation_id.to_string(), user_id.to_string()),
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub(crate) fn load_conversation(conn: &Connection, id: Uuid) -> ChatResult<Option<Conversation>> {
    let row = conn
        .query_row(
            &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"),
            [id.to_string()],
            conversation_from_row,
        )
        .optional()?;

    match row {
        Some(row) => {
            let members = query_member_ids(conn, id)?;
            assemble(row, members).map(Some)
        }
        None => Ok(None),
    }
}

pub(crate) fn require_conversation(conn: &Connection, id: Uuid) -> ChatResult<Conversation> {
    load_conversation(conn, id)?.ok_or_else(|| ChatError::not_found("conversation", id))
}

fn require_group(conn: &Connection, id: Uuid) -> ChatResult<Conversation> {
    let conversation = require_conversation(conn, id)?;
    if !conversation.is_group() {
        return Err(ChatError::NotAGroup(id));
    }
    Ok(conversation)
}

fn assemble(row: ConversationRow, members: Vec<Uuid>) -> ChatResult<Conversation> {
    let kind = match row.kind.as_str() {
        "direct" => match members.as_slice() {
            [a, b] => ConversationKind::Direct {
                participant_a: *a,
                participant_b: *b,
            },
            _ => {
                return Err(ChatError::Corrupt(format!(
                    "direct conversation {} has {} members",
                    row.id,
                    members.len()
                )));
            }
        },
        "group" => ConversationKind::Group {
            name: row.name.unwrap_or_default(),
            participants: members,
        },
        other => {
            return Err(ChatError::Corrupt(format!(
                "conversation {} has unknown kind '{}'",
                row.id, other
            )));
        }
    };

    Ok(Conversation {
        id: row.id,
        kind,
        created_by: row.created_by,
        last_message_at: row.last_message_at,
        last_message_preview: row.last_message_preview,
        created_at: row.created_at,
    })
}
