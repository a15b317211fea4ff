//! Messaging pipeline: appending messages and the side effects of sending.

use std::collections::HashMap;

use parlor_types::models::{Conversation, Message, MessageWithSender, UnreadCount};
use rusqlite::Connection;
use tracing::{debug, info};
use uuid::Uuid;

use crate::conversations::require_conversation;
use crate::error::{ChatError, ChatResult};
use crate::models::{MESSAGE_COLUMNS, OptionalExt, message_from_row, millis_to_dt};
use crate::unread::{increment_counter, reset_counter};
use crate::users::{query_user, query_users};
use crate::{DEFAULT_MESSAGE_LIMIT, DELETED_MESSAGE_MARKER, Database, MAX_MESSAGE_LIMIT, MESSAGE_PREVIEW};

/// Everything a send changed, for callers that publish change events.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub message: Message,
    /// The conversation after its preview and timestamp were bumped.
    pub conversation: Conversation,
    /// Recipients' unread counters after the fan-out.
    pub recipients: Vec<(Uuid, UnreadCount)>,
}

impl Database {
    /// Append a message and return it.
    pub fn send_message(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        content: &str,
    ) -> ChatResult<Message> {
        self.deliver_message(conversation_id, sender_id, content)
            .map(|delivery| delivery.message)
    }

    /// Append a message and apply every effect of sending in one transaction:
    /// insert the message, bump the conversation preview, reset the sender's
    /// unread counter, increment every other participant's counter and clear
    /// the sender's typing indicator. Any failure rolls all of it back.
    pub fn deliver_message(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        content: &str,
    ) -> ChatResult<Delivery> {
        if content.is_empty() {
            return Err(ChatError::Validation("message content must not be empty".into()));
        }

        let now = self.now_ms();
        self.with_tx(|tx| {
            let conversation = require_conversation(tx, conversation_id)?;
            if !conversation.has_participant(sender_id) {
                return Err(ChatError::Forbidden(format!(
                    "{} is not a participant of {}",
                    sender_id, conversation_id
                )));
            }

            let message_id = Uuid::new_v4();
            let cid = conversation_id.to_string();
            tx.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, content, is_deleted, created_at)
                 VALUES (?1, ?2, ?3, ?4, 0, ?5)",
                (message_id.to_string(), &cid, sender_id.to_string(), content, now),
            )?;

            tx.execute(
                "UPDATE conversations SET last_message_at = ?2, last_message_preview = ?3 WHERE id = ?1",
                (&cid, now, MESSAGE_PREVIEW),
            )?;

            reset_counter(tx, conversation_id, sender_id, now)?;

            let mut recipients = Vec::new();
            for participant in conversation.participants() {
                if participant == sender_id {
                    continue;
                }
                let counter = increment_counter(tx, conversation_id, participant, now)?;
                recipients.push((participant, counter));
            }

            tx.execute(
                "DELETE FROM typing_indicators WHERE conversation_id = ?1 AND user_id = ?2",
                (&cid, sender_id.to_string()),
            )?;

            debug!(
                "Message {} in {} fanned out to {} recipients",
                message_id,
                conversation_id,
                recipients.len()
            );

            let created_at = millis_to_dt(now)?;
            Ok(Delivery {
                message: Message {
                    id: message_id,
                    conversation_id,
                    sender_id,
                    content: content.to_string(),
                    is_deleted: false,
                    created_at,
                    updated_at: None,
                },
                conversation: Conversation {
                    last_message_at: created_at,
                    last_message_preview: Some(MESSAGE_PREVIEW.to_string()),
                    ..conversation
                },
                recipients,
            })
        })
    }

    /// Soft-delete a message. Only its sender may delete it. The row stays in
    /// place with its content replaced by the deletion marker; deleting an
    /// already deleted message changes nothing.
    pub fn soft_delete_message(&self, message_id: Uuid, requester_id: Uuid) -> ChatResult<Message> {
        let now = self.now_ms();
        self.with_tx(|tx| {
            let message =
                query_message(tx, message_id)?.ok_or_else(|| ChatError::not_found("message", message_id))?;

            if message.sender_id != requester_id {
                return Err(ChatError::Forbidden(format!(
                    "only the sender may delete message {}",
                    message_id
                )));
            }
            if message.is_deleted {
                return Ok(message);
            }

            tx.execute(
                "UPDATE messages SET is_deleted = 1, content = ?2, updated_at = ?3 WHERE id = ?1",
                (message_id.to_string(), DELETED_MESSAGE_MARKER, now),
            )?;
            info!("Message {} deleted by its sender", message_id);

            Ok(Message {
                is_deleted: true,
                content: DELETED_MESSAGE_MARKER.to_string(),
                updated_at: Some(millis_to_dt(now)?),
                ..message
            })
        })
    }

    /// The most recent `limit` messages (default 50, at most 200) in
    /// chronological order, each with its sender's profile.
    pub fn list_messages(
        &self,
        conversation_id: Uuid,
        limit: Option<u32>,
    ) -> ChatResult<Vec<MessageWithSender>> {
        let limit = limit
            .unwrap_or(DEFAULT_MESSAGE_LIMIT)
            .clamp(1, MAX_MESSAGE_LIMIT);

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE conversation_id = ?1
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?2"
            ))?;
            let mut messages = stmt
                .query_map((conversation_id.to_string(), limit), message_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            messages.reverse();

            with_senders(conn, messages)
        })
    }

    pub fn get_message(&self, message_id: Uuid) -> ChatResult<Option<MessageWithSender>> {
        self.with_conn(|conn| match query_message(conn, message_id)? {
            Some(message) => {
                let sender = query_user(conn, message.sender_id)?;
                Ok(Some(MessageWithSender { message, sender }))
            }
            None => Ok(None),
        })
    }
}

pub(crate) fn query_message(conn: &Connection, id: Uuid) -> ChatResult<Option<Message>> {
    conn.query_row(
        &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
        [id.to_string()],
        message_from_row,
    )
    .optional()
}

fn with_senders(conn: &Connection, messages: Vec<Message>) -> ChatResult<Vec<MessageWithSender>> {
    let mut sender_ids: Vec<Uuid> = messages.iter().map(|m| m.sender_id).collect();
    sender_ids.sort();
    sender_ids.dedup();

    let senders: HashMap<Uuid, _> = query_users(conn, &sender_ids)?
        .into_iter()
        .map(|u| (u.id, u))
        .collect();

    Ok(messages
        .into_iter()
        .map(|message| {
            let sender = senders.get(&message.sender_id).cloned();
            MessageWithSender { message, sender }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use uuid::Uuid;

    use crate::test_support::{db, user};
    use crate::{ChatError, DELETED_MESSAGE_MARKER, MESSAGE_PREVIEW};

    #[test]
    fn send_updates_preview_and_fans_out() {
        let (db, clock) = db();
        let a = user(&db, "ada");
        let b = user(&db, "bob");
        let c = user(&db, "cy");
        let group = db.create_group("crew", a.id, &[b.id, c.id]).unwrap();

        db.send_message(group.id, b.id, "x1").unwrap();
        let before_b = db.unread_count(group.id, b.id).unwrap();
        let before_c = db.unread_count(group.id, c.id).unwrap();

        clock.advance(Duration::seconds(10));
        let delivery = db.deliver_message(group.id, a.id, "secret-blob").unwrap();

        assert_eq!(db.unread_count(group.id, a.id).unwrap(), 0);
        assert_eq!(db.unread_count(group.id, b.id).unwrap(), before_b + 1);
        assert_eq!(db.unread_count(group.id, c.id).unwrap(), before_c + 1);
        assert_eq!(delivery.recipients.len(), 2);

        let stored = db.get_conversation(group.id).unwrap().unwrap();
        assert_eq!(stored.last_message_at, delivery.message.created_at);
        assert_eq!(stored.last_message_preview.as_deref(), Some(MESSAGE_PREVIEW));
        assert_eq!(stored, delivery.conversation);
    }

    #[test]
    fn send_preconditions() {
        let (db, _) = db();
        let a = user(&db, "ada");
        let b = user(&db, "bob");
        let outsider = user(&db, "eve");
        let conv = db.get_or_create_direct(a.id, b.id).unwrap();

        assert!(matches!(
            db.send_message(Uuid::new_v4(), a.id, "hi"),
            Err(ChatError::NotFound { entity: "conversation", .. })
        ));
        assert!(matches!(
            db.send_message(conv.id, outsider.id, "hi"),
            Err(ChatError::Forbidden(_))
        ));
        assert!(matches!(
            db.send_message(conv.id, a.id, ""),
            Err(ChatError::Validation(_))
        ));
        assert!(db.list_messages(conv.id, None).unwrap().is_empty());
        assert_eq!(db.unread_count(conv.id, b.id).unwrap(), 0);
    }

    #[test]
    fn failed_fan_out_rolls_back_everything() {
        let (db, _) = db();
        let a = user(&db, "ada");
        let b = user(&db, "bob");
        let conv = db.get_or_create_direct(a.id, b.id).unwrap();

        db.with_conn(|conn| {
            conn.execute_batch(
                "CREATE TRIGGER fail_fan_out BEFORE INSERT ON unread_counters
                 WHEN NEW.count = 1
                 BEGIN SELECT RAISE(ABORT, 'counter write failed'); END;",
            )?;
            Ok(())
        })
        .unwrap();

        assert!(matches!(
            db.send_message(conv.id, a.id, "hi"),
            Err(ChatError::Storage(_))
        ));

        let stored = db.get_conversation(conv.id).unwrap().unwrap();
        assert_eq!(stored.last_message_preview, None);
        assert_eq!(stored.last_message_at, conv.last_message_at);
        assert!(db.list_messages(conv.id, None).unwrap().is_empty());
    }

    #[test]
    fn list_is_chronological_and_limited() {
        let (db, clock) = db();
        let a = user(&db, "ada");
        let b = user(&db, "bob");
        let conv = db.get_or_create_direct(a.id, b.id).unwrap();

        for i in 0..60 {
            clock.advance(Duration::milliseconds(5));
            let sender = if i % 2 == 0 { a.id } else { b.id };
            db.send_message(conv.id, sender, &format!("m{i}")).unwrap();
        }

        let page = db.list_messages(conv.id, None).unwrap();
        assert_eq!(page.len(), 50);
        assert_eq!(page.first().unwrap().message.content, "m10");
        assert_eq!(page.last().unwrap().message.content, "m59");
        assert!(page.windows(2).all(|w| w[0].message.created_at <= w[1].message.created_at));
        assert_eq!(page[0].sender.as_ref().map(|u| u.name.as_str()), Some("ada"));

        let small = db.list_messages(conv.id, Some(3)).unwrap();
        let contents: Vec<&str> = small.iter().map(|m| m.message.content.as_str()).collect();
        assert_eq!(contents, vec!["m57", "m58", "m59"]);

        assert!(db.list_messages(Uuid::new_v4(), None).unwrap().is_empty());
    }

    #[test]
    fn messages_sent_in_the_same_millisecond_keep_insert_order() {
        let (db, _) = db();
        let a = user(&db, "ada");
        let b = user(&db, "bob");
        let conv = db.get_or_create_direct(a.id, b.id).unwrap();

        for content in ["first", "second", "third"] {
            db.send_message(conv.id, a.id, content).unwrap();
        }

        let contents: Vec<String> = db
            .list_messages(conv.id, None)
            .unwrap()
            .into_iter()
            .map(|m| m.message.content)
            .collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
    }

    #[test]
    fn soft_delete_keeps_a_tombstone() {
        let (db, clock) = db();
        let a = user(&db, "ada");
        let b = user(&db, "bob");
        let conv = db.get_or_create_direct(a.id, b.id).unwrap();

        let msg = db.send_message(conv.id, a.id, "original").unwrap();
        db.send_message(conv.id, b.id, "reply").unwrap();

        assert!(matches!(
            db.soft_delete_message(msg.id, b.id),
            Err(ChatError::Forbidden(_))
        ));
        assert!(matches!(
            db.soft_delete_message(Uuid::new_v4(), a.id),
            Err(ChatError::NotFound { entity: "message", .. })
        ));

        clock.advance(Duration::seconds(1));
        let deleted = db.soft_delete_message(msg.id, a.id).unwrap();
        assert!(deleted.is_deleted);
        assert!(deleted.updated_at.is_some());

        let listed = db.list_messages(conv.id, None).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].message.id, msg.id);
        assert!(listed[0].message.is_deleted);
        assert_eq!(listed[0].message.content, DELETED_MESSAGE_MARKER);
        assert_eq!(listed[0].message.updated_at, deleted.updated_at);

        // a second delete is a no-op
        clock.advance(Duration::seconds(1));
        let again = db.soft_delete_message(msg.id, a.id).unwrap();
        assert_eq!(again.updated_at, deleted.updated_at);
    }

    #[test]
    fn get_message_resolves_sender() {
        let (db, _) = db();
        let a = user(&db, "ada");
        let b = user(&db, "bob");
        let conv = db.get_or_create_direct(a.id, b.id).unwrap();
        let msg = db.send_message(conv.id, a.id, "hello").unwrap();

        let found = db.get_message(msg.id).unwrap().unwrap();
        assert_eq!(found.message, msg);
        assert_eq!(found.sender.unwrap().id, a.id);
        assert!(db.get_message(Uuid::new_v4()).unwrap().is_none());
    }
}
