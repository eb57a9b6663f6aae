use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, params};

use crate::Database;
use crate::models::{PublicUserRow, UserRow};

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: &str,
        username: &str,
        fullname: &str,
        avatar_url: Option<&str>,
        password_hash: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, fullname, avatar_url, password)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, username, fullname, avatar_url, password_hash],
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    pub fn get_public_user(&self, id: &str) -> Result<Option<PublicUserRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, username, fullname, avatar_url FROM users WHERE id = ?1",
                    [id],
                    public_user_from_row,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Substring match on username or fullname, caller excluded.
    pub fn search_users(&self, caller_id: &str, term: &str, limit: u32) -> Result<Vec<PublicUserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, username, fullname, avatar_url FROM users
                 WHERE id <> ?1
                   AND (instr(lower(username), lower(?2)) > 0
                        OR instr(lower(fullname), lower(?2)) > 0)
                 ORDER BY username
                 LIMIT ?3",
            )?;
            let rows = stmt
                .query_map(params![caller_id, term, limit], public_user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Follow graph --

    /// Returns true if the follow edge was newly created.
    pub fn follow(&self, follower_id: &str, following_id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO follows (follower_id, following_id) VALUES (?1, ?2)",
                params![follower_id, following_id],
            )?;
            Ok(changed > 0)
        })
    }

    /// Returns true if an edge existed and was removed.
    pub fn unfollow(&self, follower_id: &str, following_id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "DELETE FROM follows WHERE follower_id = ?1 AND following_id = ?2",
                params![follower_id, following_id],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn following_of(&self, user_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT following_id FROM follows WHERE follower_id = ?1")?;
            let ids = stmt
                .query_map([user_id], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    // column is a fixed identifier chosen by the callers above, never user input
    let sql = format!(
        "SELECT id, username, fullname, avatar_url, password, created_at
         FROM users WHERE {} = ?1",
        column
    );
    let row = conn
        .query_row(&sql, [value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                fullname: row.get(2)?,
                avatar_url: row.get(3)?,
                password: row.get(4)?,
                created_at: row.get(5)?,
            })
        })
        .optional()?;
    Ok(row)
}

pub(crate) fn public_user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PublicUserRow> {
    Ok(PublicUserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        fullname: row.get(2)?,
        avatar_url: row.get(3)?,
    })
}

#[cfg(test)]
mod tests {
    use crate::test_util::{add_user, test_db};

    #[test]
    fn follow_is_idempotent() {
        let db = test_db();
        let alice = add_user(&db, "alice");
        let bob = add_user(&db, "bob");

        assert!(db.follow(&alice, &bob).unwrap());
        assert!(!db.follow(&alice, &bob).unwrap());
        assert_eq!(db.following_of(&alice).unwrap(), vec![bob.clone()]);

        assert!(db.unfollow(&alice, &bob).unwrap());
        assert!(!db.unfollow(&alice, &bob).unwrap());
        assert!(db.following_of(&alice).unwrap().is_empty());
    }

    #[test]
    fn search_excludes_caller_and_matches_substrings() {
        let db = test_db();
        let alice = add_user(&db, "alice");
        add_user(&db, "alicia");
        add_user(&db, "bob");

        let hits = db.search_users(&alice, "ali", 20).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].username, "alicia");

        // fullname matches too ("bob Fullname")
        let hits = db.search_users(&alice, "fullname", 20).unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn duplicate_username_is_rejected() {
        let db = test_db();
        add_user(&db, "alice");
        let err = db.create_user("some-id", "alice", "Alice Again", None, "hash");
        assert!(err.is_err());
    }
}
