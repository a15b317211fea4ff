//! Typing presence: short-lived "is typing" facts per (conversation, user).
//!
//! An indicator is live while `expires_at > now`. Reads filter on that, so
//! expired rows are invisible whether or not the reaper has removed them.

use chrono::{DateTime, Utc};
use parlor_types::models::User;
use tracing::debug;
use uuid::Uuid;

use crate::conversations::require_conversation;
use crate::error::{ChatError, ChatResult};
use crate::models::{millis_to_dt, uuid_col};
use crate::users::query_users;
use crate::{Database, TYPING_TTL_MS};

impl Database {
    /// Mark the user as typing for the next `TYPING_TTL_MS`. Refreshing an
    /// existing indicator pushes its expiry forward. Returns the new expiry.
    pub fn set_typing(&self, conversation_id: Uuid, user_id: Uuid) -> ChatResult<DateTime<Utc>> {
        let expires_at = self.now_ms() + TYPING_TTL_MS;
        self.with_tx(|tx| {
            let conversation = require_conversation(tx, conversation_id)?;
            if !conversation.has_participant(user_id) {
                return Err(ChatError::Forbidden(format!(
                    "{} is not a participant of {}",
                    user_id, conversation_id
                )));
            }

            tx.execute(
                "INSERT INTO typing_indicators (conversation_id, user_id, expires_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(conversation_id, user_id) DO UPDATE SET expires_at = excluded.expires_at",
                (conversation_id.to_string(), user_id.to_string(), expires_at),
            )?;
            millis_to_dt(expires_at)
        })
    }

    /// Remove the indicator. Returns whether one existed.
    pub fn clear_typing(&self, conversation_id: Uuid, user_id: Uuid) -> ChatResult<bool> {
        self.with_tx(|tx| {
            let removed = tx.execute(
                "DELETE FROM typing_indicators WHERE conversation_id = ?1 AND user_id = ?2",
                (conversation_id.to_string(), user_id.to_string()),
            )?;
            Ok(removed > 0)
        })
    }

    /// Profiles of users with a live indicator in the conversation.
    pub fn active_typers(&self, conversation_id: Uuid) -> ChatResult<Vec<User>> {
        let now = self.now_ms();
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id FROM typing_indicators
                 WHERE conversation_id = ?1 AND expires_at > ?2",
            )?;
            let ids = stmt
                .query_map((conversation_id.to_string(), now), |row| uuid_col(row, 0))?
                .collect::<Result<Vec<_>, _>>()?;
            query_users(conn, &ids)
        })
    }

    /// Delete indicators that have expired. Only storage hygiene: reads
    /// already ignore them.
    pub fn purge_expired_typing(&self) -> ChatResult<usize> {
        let now = self.now_ms();
        self.with_tx(|tx| {
            let purged = tx.execute(
                "DELETE FROM typing_indicators WHERE expires_at <= ?1",
                [now],
            )?;
            if purged > 0 {
                debug!("Purged {} expired typing indicators", purged);
            }
            Ok(purged)
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use uuid::Uuid;

    use crate::ChatError;
    use crate::test_support::{db, user};

    #[test]
    fn indicator_expires_without_refresh() {
        let (db, clock) = db();
        let a = user(&db, "ada");
        let b = user(&db, "bob");
        let conv = db.get_or_create_direct(a.id, b.id).unwrap();

        db.set_typing(conv.id, a.id).unwrap();
        let typers = db.active_typers(conv.id).unwrap();
        assert_eq!(typers.iter().map(|u| u.id).collect::<Vec<_>>(), vec![a.id]);

        clock.advance(Duration::milliseconds(1_999));
        assert_eq!(db.active_typers(conv.id).unwrap().len(), 1);

        clock.advance(Duration::milliseconds(1));
        assert!(db.active_typers(conv.id).unwrap().is_empty());
    }

    #[test]
    fn refresh_extends_expiry() {
        let (db, clock) = db();
        let a = user(&db, "ada");
        let b = user(&db, "bob");
        let conv = db.get_or_create_direct(a.id, b.id).unwrap();

        db.set_typing(conv.id, a.id).unwrap();
        clock.advance(Duration::milliseconds(1_500));
        db.set_typing(conv.id, a.id).unwrap();
        clock.advance(Duration::milliseconds(1_500));

        assert_eq!(db.active_typers(conv.id).unwrap().len(), 1);
    }

    #[test]
    fn clear_is_idempotent_and_send_clears() {
        let (db, _) = db();
        let a = user(&db, "ada");
        let b = user(&db, "bob");
        let conv = db.get_or_create_direct(a.id, b.id).unwrap();

        db.set_typing(conv.id, a.id).unwrap();
        db.set_typing(conv.id, b.id).unwrap();
        assert!(db.clear_typing(conv.id, a.id).unwrap());
        assert!(!db.clear_typing(conv.id, a.id).unwrap());

        db.send_message(conv.id, b.id, "done typing").unwrap();
        assert!(db.active_typers(conv.id).unwrap().is_empty());
    }

    #[test]
    fn typing_requires_membership() {
        let (db, _) = db();
        let a = user(&db, "ada");
        let b = user(&db, "bob");
        let eve = user(&db, "eve");
        let conv = db.get_or_create_direct(a.id, b.id).unwrap();

        assert!(matches!(
            db.set_typing(conv.id, eve.id),
            Err(ChatError::Forbidden(_))
        ));
        assert!(matches!(
            db.set_typing(Uuid::new_v4(), a.id),
            Err(ChatError::NotFound { .. })
        ));
    }

    #[test]
    fn purge_only_removes_expired_rows() {
        let (db, clock) = db();
        let a = user(&db, "ada");
        let b = user(&db, "bob");
        let conv = db.get_or_create_direct(a.id, b.id).unwrap();

        db.set_typing(conv.id, a.id).unwrap();
        clock.advance(Duration::seconds(3));
        db.set_typing(conv.id, b.id).unwrap();

        assert_eq!(db.purge_expired_typing().unwrap(), 1);
        let typers = db.active_typers(conv.id).unwrap();
        assert_eq!(typers.iter().map(|u| u.id).collect::<Vec<_>>(), vec![b.id]);
    }
}
