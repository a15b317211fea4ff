//! Online presence from heartbeats.
//!
//! A user reads as online when their `is_online` flag is set and their last
//! heartbeat is younger than `HEARTBEAT_TIMEOUT_MS`. A user with no presence
//! row yet (signed in, never sent a heartbeat) is measured from `last_seen`.
//! Heartbeats set the flag, an explicit sign-off clears it at once, and the
//! reaper clears flags that went stale.

use parlor_types::models::{PresenceStatus, User};
use rusqlite::Connection;
use tracing::{debug, info};
use uuid::Uuid;

use crate::conversations::require_conversation;
use crate::error::{ChatError, ChatResult};
use crate::models::{OptionalExt, ts_col, user_from_row, uuid_col};
use crate::users::require_user;
use crate::{Database, HEARTBEAT_TIMEOUT_MS};

/// SQL predicate over `users u LEFT JOIN presence p`, bound to a cutoff
/// (`now - HEARTBEAT_TIMEOUT_MS`) at `?{n}`.
fn online_predicate(cutoff_param: usize) -> String {
    format!(
        "u.is_online = 1 AND COALESCE(p.last_heartbeat, u.last_seen) > ?{}",
        cutoff_param
    )
}

impl Database {
    /// Record a heartbeat, optionally noting the conversation being viewed,
    /// which the user must participate in. Returns `true` when this heartbeat
    /// brought the user online.
    pub fn heartbeat(&self, user_id: Uuid, conversation_id: Option<Uuid>) -> ChatResult<bool> {
        let now = self.now_ms();
        let cutoff = now - HEARTBEAT_TIMEOUT_MS;

        self.with_tx(|tx| {
            require_user(tx, user_id)?;
            if let Some(conversation_id) = conversation_id {
                let conversation = require_conversation(tx, conversation_id)?;
                if !conversation.has_participant(user_id) {
                    return Err(ChatError::Forbidden(format!(
                        "{} is not a participant of {}",
                        user_id, conversation_id
                    )));
                }
            }

            let was_online = query_is_online(tx, user_id, cutoff)?;

            tx.execute(
                "INSERT INTO presence (user_id, conversation_id, last_heartbeat)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id) DO UPDATE SET
                     conversation_id = excluded.conversation_id,
                     last_heartbeat = excluded.last_heartbeat",
                (
                    user_id.to_string(),
                    conversation_id.map(|id| id.to_string()),
                    now,
                ),
            )?;
            tx.execute(
                "UPDATE users SET is_online = 1, last_seen = ?2 WHERE id = ?1",
                (user_id.to_string(), now),
            )?;

            if !was_online {
                debug!("{} is now online", user_id);
            }
            Ok(!was_online)
        })
    }

    /// Explicit sign-off: offline immediately, regardless of heartbeat age.
    pub fn go_offline(&self, user_id: Uuid) -> ChatResult<()> {
        let now = self.now_ms();
        self.with_tx(|tx| {
            let updated = tx.execute(
                "UPDATE users SET is_online = 0, last_seen = ?2 WHERE id = ?1",
                (user_id.to_string(), now),
            )?;
            if updated == 0 {
                return Err(ChatError::not_found("user", user_id));
            }
            tx.execute("DELETE FROM presence WHERE user_id = ?1", [user_id.to_string()])?;
            debug!("{} went offline", user_id);
            Ok(())
        })
    }

    pub fn is_online(&self, user_id: Uuid) -> ChatResult<bool> {
        let cutoff = self.now_ms() - HEARTBEAT_TIMEOUT_MS;
        self.with_conn(|conn| query_is_online(conn, user_id, cutoff))
    }

    pub fn user_presence(&self, user_id: Uuid) -> ChatResult<Option<PresenceStatus>> {
        let cutoff = self.now_ms() - HEARTBEAT_TIMEOUT_MS;
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT u.id, {} AS online, u.last_seen
                     FROM users u LEFT JOIN presence p ON p.user_id = u.id
                     WHERE u.id = ?1",
                    online_predicate(2)
                ),
                (user_id.to_string(), cutoff),
                |row| {
                    Ok(PresenceStatus {
                        user_id: uuid_col(row, 0)?,
                        is_online: row.get(1)?,
                        last_seen: ts_col(row, 2)?,
                    })
                },
            )
            .optional()
        })
    }

    /// Every user currently online, ordered by name.
    pub fn online_users(&self) -> ChatResult<Vec<User>> {
        let cutoff = self.now_ms() - HEARTBEAT_TIMEOUT_MS;
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT u.id, u.external_id, u.email, u.name, u.avatar_url, u.is_online, u.last_seen, u.created_at
                 FROM users u LEFT JOIN presence p ON p.user_id = u.id
                 WHERE {}
                 ORDER BY u.name COLLATE NOCASE",
                online_predicate(1)
            ))?;
            let users = stmt
                .query_map([cutoff], user_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(users)
        })
    }

    /// Users whose fresh heartbeat names this conversation.
    pub fn active_in_conversation(&self, conversation_id: Uuid) -> ChatResult<Vec<Uuid>> {
        let cutoff = self.now_ms() - HEARTBEAT_TIMEOUT_MS;
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id FROM presence
                 WHERE conversation_id = ?1 AND last_heartbeat > ?2
                 ORDER BY user_id",
            )?;
            let ids = stmt
                .query_map((conversation_id.to_string(), cutoff), |row| uuid_col(row, 0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }

    /// Take users whose heartbeat timed out offline: drop their presence row
    /// and clear the stored flag, keeping the last heartbeat as last-seen.
    /// Users still flagged online who never sent a heartbeat are cleared once
    /// their last-seen passes the cutoff. Returns the affected users.
    pub fn reconcile_stale_presence(&self) -> ChatResult<Vec<Uuid>> {
        let cutoff = self.now_ms() - HEARTBEAT_TIMEOUT_MS;
        self.with_tx(|tx| {
            let stale = {
                let mut stmt = tx.prepare(
                    "SELECT user_id, last_heartbeat FROM presence WHERE last_heartbeat <= ?1",
                )?;
                let rows = stmt
                    .query_map([cutoff], |row| Ok((uuid_col(row, 0)?, row.get::<_, i64>(1)?)))?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            };

            for (user_id, last_heartbeat) in &stale {
                let uid = user_id.to_string();
                tx.execute(
                    "UPDATE users SET is_online = 0, last_seen = MAX(last_seen, ?2) WHERE id = ?1",
                    (&uid, last_heartbeat),
                )?;
                tx.execute("DELETE FROM presence WHERE user_id = ?1", [&uid])?;
            }

            let silent = {
                let mut stmt = tx.prepare(
                    "SELECT u.id FROM users u LEFT JOIN presence p ON p.user_id = u.id
                     WHERE u.is_online = 1 AND p.user_id IS NULL AND u.last_seen <= ?1",
                )?;
                let rows = stmt
                    .query_map([cutoff], |row| uuid_col(row, 0))?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            };
            for user_id in &silent {
                tx.execute(
                    "UPDATE users SET is_online = 0 WHERE id = ?1",
                    [user_id.to_string()],
                )?;
            }

            let mut affected: Vec<Uuid> = stale.into_iter().map(|(user_id, _)| user_id).collect();
            affected.extend(silent);
            if !affected.is_empty() {
                info!("Heartbeat timeout took {} users offline", affected.len());
            }
            Ok(affected)
        })
    }
}

fn query_is_online(conn: &Connection, user_id: Uuid, cutoff: i64) -> ChatResult<bool> {
    let online: Option<bool> = conn
        .query_row(
            &format!(
                "SELECT {} FROM users u LEFT JOIN presence p ON p.user_id = u.id WHERE u.id = ?1",
                online_predicate(2)
            ),
            (user_id.to_string(), cutoff),
            |row| row.get(0),
        )
        .optional()?;
    Ok(online.unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use uuid::Uuid;

    use crate::ChatError;
    use crate::test_support::{db, user};

    #[test]
    fn heartbeat_then_timeout() {
        let (db, clock) = db();
        let a = user(&db, "ada");
        db.go_offline(a.id).unwrap();
        assert!(!db.is_online(a.id).unwrap());

        assert!(db.heartbeat(a.id, None).unwrap());
        assert!(db.is_online(a.id).unwrap());

        clock.advance(Duration::seconds(29));
        assert!(db.is_online(a.id).unwrap());
        // a heartbeat while already online is not a transition
        assert!(!db.heartbeat(a.id, None).unwrap());

        clock.advance(Duration::seconds(30));
        assert!(!db.is_online(a.id).unwrap());
        assert!(!db.user_presence(a.id).unwrap().unwrap().is_online);
    }

    #[test]
    fn go_offline_is_immediate() {
        let (db, _) = db();
        let a = user(&db, "ada");

        db.heartbeat(a.id, None).unwrap();
        db.go_offline(a.id).unwrap();
        assert!(!db.is_online(a.id).unwrap());
        assert!(db.online_users().unwrap().is_empty());

        assert!(matches!(
            db.go_offline(Uuid::new_v4()),
            Err(ChatError::NotFound { .. })
        ));
        assert!(!db.is_online(Uuid::new_v4()).unwrap());
    }

    #[test]
    fn active_in_conversation_filters_by_view_and_freshness() {
        let (db, clock) = db();
        let a = user(&db, "ada");
        let b = user(&db, "bob");
        let c = user(&db, "cy");
        let conv = db.create_group("crew", a.id, &[b.id, c.id]).unwrap();
        let other = db.get_or_create_direct(a.id, c.id).unwrap();

        db.heartbeat(a.id, Some(conv.id)).unwrap();
        clock.advance(Duration::seconds(20));
        db.heartbeat(b.id, Some(conv.id)).unwrap();
        db.heartbeat(c.id, Some(other.id)).unwrap();

        let mut expected = vec![a.id, b.id];
        expected.sort();
        assert_eq!(db.active_in_conversation(conv.id).unwrap(), expected);

        clock.advance(Duration::seconds(15));
        assert_eq!(db.active_in_conversation(conv.id).unwrap(), vec![b.id]);

        assert!(matches!(
            db.heartbeat(a.id, Some(Uuid::new_v4())),
            Err(ChatError::NotFound { entity: "conversation", .. })
        ));
    }

    #[test]
    fn heartbeat_into_foreign_conversation_is_forbidden() {
        let (db, _) = db();
        let a = user(&db, "ada");
        let b = user(&db, "bob");
        let eve = user(&db, "eve");
        let conv = db.get_or_create_direct(a.id, b.id).unwrap();

        assert!(matches!(
            db.heartbeat(eve.id, Some(conv.id)),
            Err(ChatError::Forbidden(_))
        ));
        assert!(db.active_in_conversation(conv.id).unwrap().is_empty());

        // eve can still heartbeat without naming a conversation
        db.heartbeat(eve.id, None).unwrap();
        assert!(db.is_online(eve.id).unwrap());
    }

    #[test]
    fn online_users_and_presence_status() {
        let (db, clock) = db();
        let a = user(&db, "ada");
        let b = user(&db, "bob");

        db.heartbeat(a.id, None).unwrap();
        db.go_offline(b.id).unwrap();

        let online: Vec<Uuid> = db.online_users().unwrap().iter().map(|u| u.id).collect();
        assert_eq!(online, vec![a.id]);

        let status = db.user_presence(a.id).unwrap().unwrap();
        assert!(status.is_online);
        assert_eq!(status.user_id, a.id);
        assert!(db.user_presence(Uuid::new_v4()).unwrap().is_none());

        clock.advance(Duration::seconds(31));
        assert!(db.online_users().unwrap().is_empty());
    }

    #[test]
    fn reaper_clears_stale_flags() {
        let (db, clock) = db();
        let a = user(&db, "ada");
        let b = user(&db, "bob");

        db.heartbeat(a.id, None).unwrap();
        let first_beat = db.get_user(a.id).unwrap().unwrap().last_seen;
        clock.advance(Duration::seconds(25));
        db.heartbeat(b.id, None).unwrap();
        clock.advance(Duration::seconds(10));

        assert_eq!(db.reconcile_stale_presence().unwrap(), vec![a.id]);

        let ada = db.get_user(a.id).unwrap().unwrap();
        assert!(!ada.is_online);
        assert_eq!(ada.last_seen, first_beat);
        assert!(db.get_user(b.id).unwrap().unwrap().is_online);
        assert!(db.reconcile_stale_presence().unwrap().is_empty());
    }

    #[test]
    fn signed_in_without_heartbeat_times_out() {
        let (db, clock) = db();
        let a = user(&db, "ada");
        let signed_in = a.last_seen;

        assert!(db.is_online(a.id).unwrap());
        assert!(db.reconcile_stale_presence().unwrap().is_empty());

        clock.advance(Duration::hours(6));
        assert!(!db.is_online(a.id).unwrap());
        assert!(db.online_users().unwrap().is_empty());

        assert_eq!(db.reconcile_stale_presence().unwrap(), vec![a.id]);
        let ada = db.get_user(a.id).unwrap().unwrap();
        assert!(!ada.is_online);
        assert_eq!(ada.last_seen, signed_in);
        assert!(db.reconcile_stale_presence().unwrap().is_empty());

        // a heartbeat after the timeout is a fresh transition
        assert!(db.heartbeat(a.id, None).unwrap());
    }
}
