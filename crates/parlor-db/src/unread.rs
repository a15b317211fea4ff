//! Unread counter ledger, keyed by (conversation, user). A missing row reads as zero.

use parlor_types::models::UnreadCount;
use rusqlite::Connection;
use tracing::debug;
use uuid::Uuid;

use crate::Database;
use crate::conversations::require_conversation;
use crate::error::ChatResult;
use crate::models::{OptionalExt, ts_col, uuid_col};

impl Database {
    /// Acknowledge everything in the conversation as read.
    pub fn mark_read(&self, conversation_id: Uuid, user_id: Uuid) -> ChatResult<UnreadCount> {
        let now = self.now_ms();
        self.with_tx(|tx| {
            require_conversation(tx, conversation_id)?;
            let counter = reset_counter(tx, conversation_id, user_id, now)?;
            debug!("{} read conversation {}", user_id, conversation_id);
            Ok(counter)
        })
    }

    /// Add one unread message for `user_id`. Sends already do this for every
    /// recipient inside their own transaction.
    pub fn increment_unread(&self, conversation_id: Uuid, user_id: Uuid) -> ChatResult<UnreadCount> {
        let now = self.now_ms();
        self.with_tx(|tx| {
            require_conversation(tx, conversation_id)?;
            increment_counter(tx, conversation_id, user_id, now)
        })
    }

    pub fn unread_count(&self, conversation_id: Uuid, user_id: Uuid) -> ChatResult<u32> {
        self.with_conn(|conn| {
            let count: Option<u32> = conn
                .query_row(
                    "SELECT count FROM unread_counters WHERE conversation_id = ?1 AND user_id = ?2",
                    (conversation_id.to_string(), user_id.to_string()),
                    |row| row.get(0),
                )
                .optional()?;
            Ok(count.unwrap_or(0))
        })
    }

    /// Sum of the user's unread counts across all conversations.
    pub fn total_unread_for_user(&self, user_id: Uuid) -> ChatResult<u32> {
        self.with_conn(|conn| {
            let total: u32 = conn.query_row(
                "SELECT COALESCE(SUM(count), 0) FROM unread_counters WHERE user_id = ?1",
                [user_id.to_string()],
                |row| row.get(0),
            )?;
            Ok(total)
        })
    }

    /// Per-conversation counts for the user, skipping conversations with nothing unread.
    pub fn unread_for_user(&self, user_id: Uuid) -> ChatResult<Vec<UnreadCount>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT conversation_id, count, last_read_at FROM unread_counters
                 WHERE user_id = ?1 AND count > 0
                 ORDER BY conversation_id",
            )?;
            let rows = stmt
                .query_map([user_id.to_string()], counter_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

/// Zero the counter, creating it if absent.
pub(crate) fn reset_counter(
    conn: &Connection,
    conversation_id: Uuid,
    user_id: Uuid,
    now: i64,
) -> ChatResult<UnreadCount> {
    let counter = conn.query_row(
        "INSERT INTO unread_counters (conversation_id, user_id, count, last_read_at)
         VALUES (?1, ?2, 0, ?3)
         ON CONFLICT(conversation_id, user_id)
         DO UPDATE SET count = 0, last_read_at = excluded.last_read_at
         RETURNING conversation_id, count, last_read_at",
        (conversation_id.to_string(), user_id.to_string(), now),
        counter_from_row,
    )?;
    Ok(counter)
}

/// Single-statement read-modify-write: concurrent increments never lose an update.
pub(crate) fn increment_counter(
    conn: &Connection,
    conversation_id: Uuid,
    user_id: Uuid,
    now: i64,
) -> ChatResult<UnreadCount> {
    let counter = conn.query_row(
        "INSERT INTO unread_counters (conversation_id, user_id, count, last_read_at)
         VALUES (?1, ?2, 1, ?3)
         ON CONFLICT(conversation_id, user_id)
         DO UPDATE SET count = count + 1
         RETURNING conversation_id, count, last_read_at",
        (conversation_id.to_string(), user_id.to_string(), now),
        counter_from_row,
    )?;
    Ok(counter)
}

fn counter_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UnreadCount> {
    Ok(UnreadCount {
        conversation_id: uuid_col(row, 0)?,
        count: row.get(1)?,
        last_read_at: ts_col(row, 2)?,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use chrono::Duration;
    use uuid::Uuid;

    use crate::ChatError;
    use crate::test_support::{db, user};

    #[test]
    fn read_send_read_scenario() {
        let (db, clock) = db();
        let a = user(&db, "ada");
        let b = user(&db, "bob");
        let conv = db.get_or_create_direct(a.id, b.id).unwrap();

        clock.advance(Duration::seconds(1));
        db.send_message(conv.id, a.id, "hi").unwrap();
        assert_eq!(db.unread_count(conv.id, b.id).unwrap(), 1);
        assert!(db.get_conversation(conv.id).unwrap().unwrap().last_message_at > conv.last_message_at);

        let read = db.mark_read(conv.id, b.id).unwrap();
        assert_eq!(read.count, 0);
        assert_eq!(db.unread_count(conv.id, b.id).unwrap(), 0);

        db.send_message(conv.id, a.id, "again").unwrap();
        assert_eq!(db.unread_count(conv.id, b.id).unwrap(), 1);
        assert_eq!(db.unread_count(conv.id, a.id).unwrap(), 0);
    }

    #[test]
    fn own_send_resets_own_counter() {
        let (db, _) = db();
        let a = user(&db, "ada");
        let b = user(&db, "bob");
        let conv = db.get_or_create_direct(a.id, b.id).unwrap();

        db.send_message(conv.id, a.id, "one").unwrap();
        db.send_message(conv.id, a.id, "two").unwrap();
        assert_eq!(db.unread_count(conv.id, b.id).unwrap(), 2);

        db.send_message(conv.id, b.id, "reply").unwrap();
        assert_eq!(db.unread_count(conv.id, b.id).unwrap(), 0);
        assert_eq!(db.unread_count(conv.id, a.id).unwrap(), 1);
    }

    #[test]
    fn totals_span_conversations() {
        let (db, _) = db();
        let a = user(&db, "ada");
        let b = user(&db, "bob");
        let c = user(&db, "cy");
        let ab = db.get_or_create_direct(a.id, b.id).unwrap();
        let group = db.create_group("crew", b.id, &[a.id, c.id]).unwrap();

        db.send_message(ab.id, b.id, "1").unwrap();
        db.send_message(group.id, b.id, "2").unwrap();
        db.send_message(group.id, c.id, "3").unwrap();

        assert_eq!(db.total_unread_for_user(a.id).unwrap(), 3);
        let per_conv = db.unread_for_user(a.id).unwrap();
        assert_eq!(per_conv.len(), 2);
        assert_eq!(per_conv.iter().map(|c| c.count).sum::<u32>(), 3);

        db.mark_read(ab.id, a.id).unwrap();
        assert_eq!(db.total_unread_for_user(a.id).unwrap(), 2);
        assert_eq!(db.unread_for_user(a.id).unwrap().len(), 1);
    }

    #[test]
    fn absent_counters_read_as_zero() {
        let (db, _) = db();
        let a = user(&db, "ada");
        let b = user(&db, "bob");
        let conv = db.get_or_create_direct(a.id, b.id).unwrap();

        assert_eq!(db.unread_count(conv.id, a.id).unwrap(), 0);
        assert_eq!(db.total_unread_for_user(a.id).unwrap(), 0);
        assert!(db.unread_for_user(a.id).unwrap().is_empty());

        // reading a conversation nobody wrote in is fine
        assert_eq!(db.mark_read(conv.id, a.id).unwrap().count, 0);
        assert!(matches!(
            db.mark_read(Uuid::new_v4(), a.id),
            Err(ChatError::NotFound { .. })
        ));
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let (db, _) = db();
        let a = user(&db, "ada");
        let b = user(&db, "bob");
        let c = user(&db, "cy");
        let group = db.create_group("crew", a.id, &[b.id, c.id]).unwrap();
        let db = Arc::new(db);

        let handles: Vec<_> = [a.id, b.id]
            .into_iter()
            .map(|sender| {
                let db = db.clone();
                thread::spawn(move || {
                    for _ in 0..25 {
                        db.send_message(group.id, sender, "blob").unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(db.unread_count(group.id, c.id).unwrap(), 50);
        assert_eq!(db.increment_unread(group.id, c.id).unwrap().count, 51);
    }
}
