use anyhow::Result;
use rusqlite::{OptionalExtension, params};
use uuid::Uuid;

use crate::Database;
use crate::models::{ConversationRow, PublicUserRow};
use crate::users::public_user_from_row;

/// Normalized participant-pair key for direct conversations.
/// Order-independent so the UNIQUE index holds for both call orders.
pub fn direct_key(a: &str, b: &str) -> String {
    if a <= b {
        format!("{}:{}", a, b)
    } else {
        format!("{}:{}", b, a)
    }
}

impl Database {
    /// Find or create the direct conversation for {caller, other}.
    /// Returns (conversation_id, created). Lookup and insert run in one
    /// transaction; `ON CONFLICT DO NOTHING` + re-select makes concurrent
    /// duplicate calls converge on a single row.
    pub fn create_or_get_direct(
        &self,
        caller_id: &str,
        other_id: &str,
        now: i64,
    ) -> Result<(String, bool)> {
        let key = direct_key(caller_id, other_id);

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            if let Some(id) = tx
                .query_row(
                    "SELECT id FROM conversations WHERE direct_key = ?1",
                    [&key],
                    |row| row.get::<_, String>(0),
                )
                .optional()?
            {
                tx.commit()?;
                return Ok((id, false));
            }

            let id = Uuid::new_v4().to_string();
            let inserted = tx.execute(
                "INSERT INTO conversations (id, is_group, direct_key, last_message_time)
                 VALUES (?1, 0, ?2, ?3)
                 ON CONFLICT(direct_key) DO NOTHING",
                params![id, key, now],
            )?;

            if inserted == 0 {
                // Lost a race; the unique index kept exactly one row.
                let existing: String = tx.query_row(
                    "SELECT id FROM conversations WHERE direct_key = ?1",
                    [&key],
                    |row| row.get(0),
                )?;
                tx.commit()?;
                return Ok((existing, false));
            }

            tx.execute(
                "INSERT INTO conversation_participants (conversation_id, user_id) VALUES (?1, ?2)",
                params![id, caller_id],
            )?;
            tx.execute(
                "INSERT INTO conversation_participants (conversation_id, user_id) VALUES (?1, ?2)",
                params![id, other_id],
            )?;

            tx.commit()?;
            Ok((id, true))
        })
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, is_group, name, image_url, last_message_id, last_message_time
                     FROM conversations WHERE id = ?1",
                    [id],
                    |row| {
                        Ok(ConversationRow {
                            id: row.get(0)?,
                            is_group: row.get(1)?,
                            name: row.get(2)?,
                            image_url: row.get(3)?,
                            last_message_id: row.get(4)?,
                            last_message_time: row.get(5)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn is_participant(&self, conversation_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM conversation_participants
                     WHERE conversation_id = ?1 AND user_id = ?2",
                    params![conversation_id, user_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// All conversations the user participates in, most recent activity first.
    pub fn conversations_for_user(&self, user_id: &str) -> Result<Vec<ConversationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.is_group, c.name, c.image_url, c.last_message_id, c.last_message_time
                 FROM conversations c
                 JOIN conversation_participants p ON p.conversation_id = c.id
                 WHERE p.user_id = ?1
                 ORDER BY c.last_message_time DESC",
            )?;
            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(ConversationRow {
                        id: row.get(0)?,
                        is_group: row.get(1)?,
                        name: row.get(2)?,
                        image_url: row.get(3)?,
                        last_message_id: row.get(4)?,
                        last_message_time: row.get(5)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Participants of a conversation other than `user_id`, with profiles.
    pub fn other_participants(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<Vec<PublicUserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.username, u.fullname, u.avatar_url
                 FROM conversation_participants p
                 JOIN users u ON u.id = p.user_id
                 WHERE p.conversation_id = ?1 AND p.user_id <> ?2",
            )?;
            let rows = stmt
                .query_map(params![conversation_id, user_id], public_user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::direct_key;
    use crate::test_util::{add_user, test_db};

    #[test]
    fn direct_key_is_order_independent() {
        assert_eq!(direct_key("a", "b"), direct_key("b", "a"));
        assert_eq!(direct_key("a", "b"), "a:b");
    }

    #[test]
    fn create_or_get_deduplicates_both_orders() {
        let db = test_db();
        let alice = add_user(&db, "alice");
        let bob = add_user(&db, "bob");

        let (id1, created1) = db.create_or_get_direct(&alice, &bob, 1_000).unwrap();
        assert!(created1);

        let (id2, created2) = db.create_or_get_direct(&bob, &alice, 2_000).unwrap();
        assert!(!created2);
        assert_eq!(id1, id2);

        let convs = db.conversations_for_user(&alice).unwrap();
        assert_eq!(convs.len(), 1);
        assert_eq!(convs[0].last_message_time, 1_000);
    }

    #[test]
    fn participants_are_recorded_on_creation() {
        let db = test_db();
        let alice = add_user(&db, "alice");
        let bob = add_user(&db, "bob");
        let carol = add_user(&db, "carol");

        let (id, _) = db.create_or_get_direct(&alice, &bob, 0).unwrap();

        assert!(db.is_participant(&id, &alice).unwrap());
        assert!(db.is_participant(&id, &bob).unwrap());
        assert!(!db.is_participant(&id, &carol).unwrap());

        let others = db.other_participants(&id, &alice).unwrap();
        assert_eq!(others.len(), 1);
        assert_eq!(others[0].username, "bob");
    }

    #[test]
    fn conversations_order_by_recent_activity() {
        let db = test_db();
        let alice = add_user(&db, "alice");
        let bob = add_user(&db, "bob");
        let carol = add_user(&db, "carol");

        let (with_bob, _) = db.create_or_get_direct(&alice, &bob, 1_000).unwrap();
        let (with_carol, _) = db.create_or_get_direct(&alice, &carol, 2_000).unwrap();

        let convs = db.conversations_for_user(&alice).unwrap();
        assert_eq!(convs[0].id, with_carol);
        assert_eq!(convs[1].id, with_bob);
    }
}
