//! Reaction ledger: at most one reaction per (message, user).

use std::collections::HashMap;

use parlor_types::models::{ReactionChange, ReactionSummary};
use rusqlite::params_from_iter;
use tracing::debug;
use uuid::Uuid;

use crate::Database;
use crate::error::{ChatError, ChatResult};
use crate::messages::query_message;
use crate::models::{OptionalExt, placeholders, uuid_col};

impl Database {
    /// Toggle a reaction. With no reaction yet it is added; the same emoji
    /// again removes it; a different emoji replaces the old one. The check and
    /// the write share one transaction, and the (message, user) primary key
    /// rules out a second live row.
    pub fn toggle_reaction(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) -> ChatResult<ReactionChange> {
        let emoji = validate_emoji(emoji)?;
        let now = self.now_ms();

        self.with_tx(|tx| {
            query_message(tx, message_id)?.ok_or_else(|| ChatError::not_found("message", message_id))?;

            let mid = message_id.to_string();
            let uid = user_id.to_string();
            let existing: Option<String> = tx
                .query_row(
                    "SELECT emoji FROM reactions WHERE message_id = ?1 AND user_id = ?2",
                    (&mid, &uid),
                    |row| row.get(0),
                )
                .optional()?;

            let change = match existing {
                None => {
                    tx.execute(
                        "INSERT INTO reactions (message_id, user_id, emoji, created_at) VALUES (?1, ?2, ?3, ?4)",
                        (&mid, &uid, emoji, now),
                    )?;
                    ReactionChange::Added {
                        emoji: emoji.to_string(),
                    }
                }
                Some(current) if current == emoji => {
                    tx.execute(
                        "DELETE FROM reactions WHERE message_id = ?1 AND user_id = ?2",
                        (&mid, &uid),
                    )?;
                    ReactionChange::Removed { emoji: current }
                }
                Some(previous) => {
                    tx.execute(
                        "UPDATE reactions SET emoji = ?3, created_at = ?4 WHERE message_id = ?1 AND user_id = ?2",
                        (&mid, &uid, emoji, now),
                    )?;
                    ReactionChange::Replaced {
                        previous,
                        emoji: emoji.to_string(),
                    }
                }
            };

            debug!("Reaction on {} by {}: {:?}", message_id, user_id, change);
            Ok(change)
        })
    }

    /// Remove the user's reaction if it is exactly `emoji`. Returns whether
    /// anything was removed.
    pub fn remove_reaction(&self, message_id: Uuid, user_id: Uuid, emoji: &str) -> ChatResult<bool> {
        let emoji = validate_emoji(emoji)?;
        self.with_tx(|tx| {
            let removed = tx.execute(
                "DELETE FROM reactions WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
                (message_id.to_string(), user_id.to_string(), emoji),
            )?;
            Ok(removed > 0)
        })
    }

    pub fn reactions_for_message(&self, message_id: Uuid) -> ChatResult<ReactionSummary> {
        let mut all = self.reactions_for_messages(&[message_id])?;
        Ok(all.remove(&message_id).unwrap_or_default())
    }

    /// Batch-fetch reactions grouped by emoji. Every requested id is present
    /// in the result; messages without reactions map to an empty summary.
    pub fn reactions_for_messages(
        &self,
        message_ids: &[Uuid],
    ) -> ChatResult<HashMap<Uuid, ReactionSummary>> {
        let mut grouped: HashMap<Uuid, ReactionSummary> = message_ids
            .iter()
            .map(|id| (*id, ReactionSummary::new()))
            .collect();

        if message_ids.is_empty() {
            return Ok(grouped);
        }

        let rows = self.with_conn(|conn| {
            let sql = format!(
                "SELECT message_id, user_id, emoji FROM reactions WHERE message_id IN ({})",
                placeholders(message_ids.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    params_from_iter(message_ids.iter().map(Uuid::to_string)),
                    |row| Ok((uuid_col(row, 0)?, uuid_col(row, 1)?, row.get::<_, String>(2)?)),
                )?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        for (message_id, user_id, emoji) in rows {
            grouped
                .entry(message_id)
                .or_default()
                .entry(emoji)
                .or_default()
                .insert(user_id);
        }

        Ok(grouped)
    }
}

fn validate_emoji(emoji: &str) -> ChatResult<&str> {
    let emoji = emoji.trim();
    if emoji.is_empty() {
        return Err(ChatError::Validation("emoji must not be empty".into()));
    }
    if emoji.chars().count() > 32 {
        return Err(ChatError::Validation("emoji label is too long".into()));
    }
    Ok(emoji)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::thread;

    use parlor_types::models::ReactionChange;
    use uuid::Uuid;

    use crate::ChatError;
    use crate::test_support::{db, user};

    #[test]
    fn same_emoji_twice_round_trips_to_empty() {
        let (db, _) = db();
        let a = user(&db, "ada");
        let b = user(&db, "bob");
        let conv = db.get_or_create_direct(a.id, b.id).unwrap();
        let msg = db.send_message(conv.id, a.id, "blob").unwrap();

        assert_eq!(
            db.toggle_reaction(msg.id, b.id, "👍").unwrap(),
            ReactionChange::Added { emoji: "👍".into() }
        );
        assert_eq!(
            db.toggle_reaction(msg.id, b.id, "👍").unwrap(),
            ReactionChange::Removed { emoji: "👍".into() }
        );
        assert!(db.reactions_for_message(msg.id).unwrap().is_empty());
    }

    #[test]
    fn different_emoji_replaces() {
        let (db, _) = db();
        let a = user(&db, "ada");
        let b = user(&db, "bob");
        let conv = db.get_or_create_direct(a.id, b.id).unwrap();
        let msg = db.send_message(conv.id, a.id, "blob").unwrap();

        db.toggle_reaction(msg.id, b.id, "👍").unwrap();
        assert_eq!(
            db.toggle_reaction(msg.id, b.id, "❤️").unwrap(),
            ReactionChange::Replaced {
                previous: "👍".into(),
                emoji: "❤️".into()
            }
        );

        let summary = db.reactions_for_message(msg.id).unwrap();
        assert_eq!(summary.len(), 1);
        assert_eq!(summary["❤️"], BTreeSet::from([b.id]));
    }

    #[test]
    fn batch_groups_by_emoji_with_empty_entries() {
        let (db, _) = db();
        let a = user(&db, "ada");
        let b = user(&db, "bob");
        let c = user(&db, "cy");
        let group = db.create_group("crew", a.id, &[b.id, c.id]).unwrap();
        let m1 = db.send_message(group.id, a.id, "1").unwrap();
        let m2 = db.send_message(group.id, a.id, "2").unwrap();

        db.toggle_reaction(m1.id, b.id, "👍").unwrap();
        db.toggle_reaction(m1.id, c.id, "👍").unwrap();
        db.toggle_reaction(m1.id, a.id, "🎉").unwrap();

        let unknown = Uuid::new_v4();
        let all = db.reactions_for_messages(&[m1.id, m2.id, unknown]).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[&m1.id]["👍"], BTreeSet::from([b.id, c.id]));
        assert_eq!(all[&m1.id]["🎉"], BTreeSet::from([a.id]));
        assert!(all[&m2.id].is_empty());
        assert!(all[&unknown].is_empty());

        assert!(db.reactions_for_messages(&[]).unwrap().is_empty());
    }

    #[test]
    fn explicit_remove_only_matches_exact_emoji() {
        let (db, _) = db();
        let a = user(&db, "ada");
        let b = user(&db, "bob");
        let conv = db.get_or_create_direct(a.id, b.id).unwrap();
        let msg = db.send_message(conv.id, a.id, "blob").unwrap();

        db.toggle_reaction(msg.id, b.id, "👍").unwrap();
        assert!(!db.remove_reaction(msg.id, b.id, "❤️").unwrap());
        assert!(db.remove_reaction(msg.id, b.id, " 👍 ").unwrap());
        assert!(!db.remove_reaction(msg.id, b.id, "👍").unwrap());
        assert!(matches!(
            db.remove_reaction(msg.id, b.id, ""),
            Err(ChatError::Validation(_))
        ));
    }

    #[test]
    fn toggle_validates_input() {
        let (db, _) = db();
        let a = user(&db, "ada");
        assert!(matches!(
            db.toggle_reaction(Uuid::new_v4(), a.id, "👍"),
            Err(ChatError::NotFound { entity: "message", .. })
        ));
        assert!(matches!(
            db.toggle_reaction(Uuid::new_v4(), a.id, "  "),
            Err(ChatError::Validation(_))
        ));
    }

    #[test]
    fn concurrent_toggles_leave_at_most_one_row() {
        let (db, _) = db();
        let a = user(&db, "ada");
        let b = user(&db, "bob");
        let conv = db.get_or_create_direct(a.id, b.id).unwrap();
        let msg = db.send_message(conv.id, a.id, "blob").unwrap();
        let db = Arc::new(db);

        let handles: Vec<_> = ["👍", "❤️", "👍", "🎉"]
            .into_iter()
            .map(|emoji| {
                let db = db.clone();
                thread::spawn(move || db.toggle_reaction(msg.id, b.id, emoji).unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let summary = db.reactions_for_message(msg.id).unwrap();
        let rows: usize = summary.values().map(|users| users.len()).sum();
        assert!(rows <= 1);
    }
}
