use anyhow::Result;
use rusqlite::{OptionalExtension, params};

use crate::Database;
use crate::models::{MessageListRow, MessageRow, PublicUserRow};
use crate::users::public_user_from_row;

// is_read is the viewer's perspective: for messages from others, their own
// receipt; for their own messages, whether any recipient has read it yet.
const MESSAGE_LIST_COLUMNS: &str = "m.id, m.conversation_id, m.sender_id, u.username, u.fullname,
       u.avatar_url, m.content, m.kind, m.media_url, m.created_at,
       CASE WHEN m.sender_id = ?2
            THEN EXISTS(SELECT 1 FROM read_receipts r WHERE r.message_id = m.id)
            ELSE EXISTS(SELECT 1 FROM read_receipts r
                        WHERE r.message_id = m.id AND r.user_id = ?2)
       END AS is_read";

impl Database {
    // -- Messages --

    /// Append a message and advance the conversation's last-message pointer
    /// in the same transaction, so both become visible together.
    pub fn insert_message(
        &self,
        id: &str,
        conversation_id: &str,
        sender_id: &str,
        content: Option<&str>,
        kind: &str,
        media_ref: Option<&str>,
        media_url: Option<&str>,
        now: i64,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO messages
                     (id, conversation_id, sender_id, content, kind, media_ref, media_url, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![id, conversation_id, sender_id, content, kind, media_ref, media_url, now],
            )?;
            tx.execute(
                "UPDATE conversations SET last_message_id = ?1, last_message_time = ?2 WHERE id = ?3",
                params![id, now, conversation_id],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, conversation_id, sender_id, content, kind, media_ref, media_url,
                            is_deleted, created_at
                     FROM messages WHERE id = ?1",
                    [id],
                    |row| {
                        Ok(MessageRow {
                            id: row.get(0)?,
                            conversation_id: row.get(1)?,
                            sender_id: row.get(2)?,
                            content: row.get(3)?,
                            kind: row.get(4)?,
                            media_ref: row.get(5)?,
                            media_url: row.get(6)?,
                            is_deleted: row.get(7)?,
                            created_at: row.get(8)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Newest `limit` visible messages, newest first. Caller reverses for
    /// chronological display. JOIN users to fetch the sender profile in a
    /// single query (eliminates N+1); `is_read` is the viewer's receipt state.
    pub fn list_messages(
        &self,
        conversation_id: &str,
        viewer_id: &str,
        limit: u32,
    ) -> Result<Vec<MessageListRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_LIST_COLUMNS}
                 FROM messages m
                 JOIN users u ON u.id = m.sender_id
                 WHERE m.conversation_id = ?1 AND m.is_deleted = 0
                 ORDER BY m.created_at DESC, m.id DESC
                 LIMIT ?3"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![conversation_id, viewer_id, limit], message_list_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// The most recent non-deleted message, for conversation summaries.
    pub fn last_visible_message(
        &self,
        conversation_id: &str,
        viewer_id: &str,
    ) -> Result<Option<MessageListRow>> {
        Ok(self.list_messages(conversation_id, viewer_id, 1)?.into_iter().next())
    }

    pub fn soft_delete_message(&self, id: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute("UPDATE messages SET is_deleted = 1 WHERE id = ?1", [id])?;
            Ok(())
        })
    }

    // -- Read receipts --

    /// Idempotently record receipts for the given message ids. Ids outside
    /// the conversation and the reader's own messages are skipped. Returns
    /// the ids that were newly marked; re-marking is a no-op.
    pub fn mark_read(
        &self,
        conversation_id: &str,
        user_id: &str,
        message_ids: &[String],
        now: i64,
    ) -> Result<Vec<String>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let mut newly_marked = Vec::new();
            for message_id in message_ids {
                let changed = tx.execute(
                    "INSERT OR IGNORE INTO read_receipts (message_id, user_id, read_at)
                     SELECT m.id, ?2, ?3 FROM messages m
                     WHERE m.id = ?1 AND m.conversation_id = ?4 AND m.sender_id <> ?2",
                    params![message_id, user_id, now, conversation_id],
                )?;
                if changed > 0 {
                    newly_marked.push(message_id.clone());
                }
            }
            tx.commit()?;
            Ok(newly_marked)
        })
    }

    /// Non-deleted messages from other senders lacking a receipt for `user_id`.
    pub fn unread_count(&self, conversation_id: &str, user_id: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages m
                 WHERE m.conversation_id = ?1
                   AND m.sender_id <> ?2
                   AND m.is_deleted = 0
                   AND NOT EXISTS (SELECT 1 FROM read_receipts r
                                   WHERE r.message_id = m.id AND r.user_id = ?2)",
                params![conversation_id, user_id],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    // -- Typing indicators --

    /// Upsert the single (conversation, user) indicator row. Rows are never
    /// deleted; staleness is a read-side predicate.
    pub fn upsert_typing(
        &self,
        conversation_id: &str,
        user_id: &str,
        is_typing: bool,
        now: i64,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO typing_indicators (conversation_id, user_id, is_typing, last_typing_time)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(conversation_id, user_id)
                 DO UPDATE SET is_typing = excluded.is_typing,
                               last_typing_time = excluded.last_typing_time",
                params![conversation_id, user_id, is_typing, now],
            )?;
            Ok(())
        })
    }

    /// Participants other than `exclude_user` typing more recently than
    /// `cutoff`. Indicators older than the window count as not-typing even
    /// without an explicit stop signal.
    pub fn typing_users(
        &self,
        conversation_id: &str,
        exclude_user: &str,
        cutoff: i64,
    ) -> Result<Vec<PublicUserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.username, u.fullname, u.avatar_url
                 FROM typing_indicators t
                 JOIN users u ON u.id = t.user_id
                 WHERE t.conversation_id = ?1
                   AND t.user_id <> ?2
                   AND t.is_typing = 1
                   AND t.last_typing_time > ?3",
            )?;
            let rows = stmt
                .query_map(params![conversation_id, exclude_user, cutoff], public_user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn message_list_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageListRow> {
    Ok(MessageListRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        sender_username: row.get(3)?,
        sender_fullname: row.get(4)?,
        sender_avatar_url: row.get(5)?,
        content: row.get(6)?,
        kind: row.get(7)?,
        media_url: row.get(8)?,
        created_at: row.get(9)?,
        is_read: row.get(10)?,
    })
}

#[cfg(test)]
mod tests {
    use crate::test_util::{add_user, test_db};
    use crate::Database;
    use uuid::Uuid;

    fn send_text(db: &Database, conv: &str, sender: &str, content: &str, at: i64) -> String {
        let id = Uuid::new_v4().to_string();
        db.insert_message(&id, conv, sender, Some(content), "text", None, None, at)
            .unwrap();
        id
    }

    #[test]
    fn send_advances_last_message_pointer_atomically() {
        let db = test_db();
        let alice = add_user(&db, "alice");
        let bob = add_user(&db, "bob");
        let (conv, _) = db.create_or_get_direct(&alice, &bob, 0).unwrap();

        let mid = send_text(&db, &conv, &alice, "hi", 5_000);

        let row = db.get_conversation(&conv).unwrap().unwrap();
        assert_eq!(row.last_message_id.as_deref(), Some(mid.as_str()));
        assert_eq!(row.last_message_time, 5_000);
    }

    #[test]
    fn unread_count_tracks_receipts() {
        let db = test_db();
        let alice = add_user(&db, "alice");
        let bob = add_user(&db, "bob");
        let (conv, _) = db.create_or_get_direct(&alice, &bob, 0).unwrap();

        let m1 = send_text(&db, &conv, &alice, "one", 1_000);
        send_text(&db, &conv, &alice, "two", 2_000);

        // Sender sees nothing unread; recipient sees both
        assert_eq!(db.unread_count(&conv, &alice).unwrap(), 0);
        assert_eq!(db.unread_count(&conv, &bob).unwrap(), 2);

        let marked = db.mark_read(&conv, &bob, &[m1.clone()], 3_000).unwrap();
        assert_eq!(marked, vec![m1.clone()]);
        assert_eq!(db.unread_count(&conv, &bob).unwrap(), 1);

        // Re-marking is a no-op, not an error
        let marked_again = db.mark_read(&conv, &bob, &[m1], 4_000).unwrap();
        assert!(marked_again.is_empty());
        assert_eq!(db.unread_count(&conv, &bob).unwrap(), 1);
    }

    #[test]
    fn own_messages_never_get_receipts() {
        let db = test_db();
        let alice = add_user(&db, "alice");
        let bob = add_user(&db, "bob");
        let (conv, _) = db.create_or_get_direct(&alice, &bob, 0).unwrap();

        let mine = send_text(&db, &conv, &alice, "mine", 1_000);
        let marked = db.mark_read(&conv, &alice, &[mine], 2_000).unwrap();
        assert!(marked.is_empty());
    }

    #[test]
    fn mark_read_ignores_foreign_conversation_ids() {
        let db = test_db();
        let alice = add_user(&db, "alice");
        let bob = add_user(&db, "bob");
        let carol = add_user(&db, "carol");
        let (conv_ab, _) = db.create_or_get_direct(&alice, &bob, 0).unwrap();
        let (conv_ac, _) = db.create_or_get_direct(&alice, &carol, 0).unwrap();

        let in_ab = send_text(&db, &conv_ab, &alice, "hello bob", 1_000);

        // Bob passes the right message id but the wrong conversation
        let marked = db.mark_read(&conv_ac, &bob, &[in_ab.clone()], 2_000).unwrap();
        assert!(marked.is_empty());
        assert_eq!(db.unread_count(&conv_ab, &bob).unwrap(), 1);
    }

    #[test]
    fn soft_deleted_messages_vanish_from_lists_and_counts() {
        let db = test_db();
        let alice = add_user(&db, "alice");
        let bob = add_user(&db, "bob");
        let (conv, _) = db.create_or_get_direct(&alice, &bob, 0).unwrap();

        let mid = send_text(&db, &conv, &alice, "oops", 1_000);
        assert_eq!(db.list_messages(&conv, &bob, 50).unwrap().len(), 1);
        assert_eq!(db.unread_count(&conv, &bob).unwrap(), 1);

        db.soft_delete_message(&mid).unwrap();
        assert!(db.list_messages(&conv, &bob, 50).unwrap().is_empty());
        assert_eq!(db.unread_count(&conv, &bob).unwrap(), 0);
    }

    #[test]
    fn list_is_newest_first_with_read_state() {
        let db = test_db();
        let alice = add_user(&db, "alice");
        let bob = add_user(&db, "bob");
        let (conv, _) = db.create_or_get_direct(&alice, &bob, 0).unwrap();

        let m1 = send_text(&db, &conv, &alice, "first", 1_000);
        send_text(&db, &conv, &alice, "second", 2_000);
        db.mark_read(&conv, &bob, &[m1.clone()], 3_000).unwrap();

        let rows = db.list_messages(&conv, &bob, 50).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].content.as_deref(), Some("second"));
        assert!(!rows[0].is_read);
        assert_eq!(rows[1].id, m1);
        assert!(rows[1].is_read);
        assert_eq!(rows[1].sender_username, "alice");
    }

    #[test]
    fn sender_sees_read_state_flip_when_recipient_reads() {
        let db = test_db();
        let alice = add_user(&db, "alice");
        let bob = add_user(&db, "bob");
        let (conv, _) = db.create_or_get_direct(&alice, &bob, 0).unwrap();

        let mid = send_text(&db, &conv, &alice, "hi", 1_000);

        // Before Bob reads: unread on his side, unread tick on hers
        let bob_view = db.list_messages(&conv, &bob, 50).unwrap();
        assert!(!bob_view[0].is_read);
        let alice_view = db.list_messages(&conv, &alice, 50).unwrap();
        assert!(!alice_view[0].is_read);

        db.mark_read(&conv, &bob, &[mid], 2_000).unwrap();
        assert_eq!(db.unread_count(&conv, &bob).unwrap(), 0);

        let alice_view = db.list_messages(&conv, &alice, 50).unwrap();
        assert!(alice_view[0].is_read);
    }

    #[test]
    fn typing_window_excludes_stale_and_self() {
        let db = test_db();
        let alice = add_user(&db, "alice");
        let bob = add_user(&db, "bob");
        let (conv, _) = db.create_or_get_direct(&alice, &bob, 0).unwrap();

        db.upsert_typing(&conv, &bob, true, 10_000).unwrap();

        // Within the window from Alice's perspective
        let now = 12_000;
        let typing = db.typing_users(&conv, &alice, now - 5_000).unwrap();
        assert_eq!(typing.len(), 1);
        assert_eq!(typing[0].username, "bob");

        // Bob never sees himself
        assert!(db.typing_users(&conv, &bob, now - 5_000).unwrap().is_empty());

        // Stale without any stop signal
        let later = 16_000;
        assert!(db.typing_users(&conv, &alice, later - 5_000).unwrap().is_empty());

        // Explicit stop wins immediately even inside the window
        db.upsert_typing(&conv, &bob, false, 12_500).unwrap();
        assert!(db.typing_users(&conv, &alice, now - 5_000).unwrap().is_empty());
    }
}
