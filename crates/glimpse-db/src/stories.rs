use anyhow::Result;
use rusqlite::{OptionalExtension, params};
use std::collections::HashSet;

use crate::Database;
use crate::models::{StoryRow, StoryViewerRow};

const STORY_COLUMNS: &str = "id, owner_id, media_ref, media_url, media_type, caption,
       views_count, likes_count, created_at, expires_at";

impl Database {
    // -- Stories --

    pub fn insert_story(
        &self,
        id: &str,
        owner_id: &str,
        media_ref: &str,
        media_url: &str,
        media_type: &str,
        caption: Option<&str>,
        now: i64,
        expires_at: i64,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO stories
                     (id, owner_id, media_ref, media_url, media_type, caption, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![id, owner_id, media_ref, media_url, media_type, caption, now, expires_at],
            )?;
            Ok(())
        })
    }

    pub fn get_story(&self, id: &str) -> Result<Option<StoryRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {STORY_COLUMNS} FROM stories WHERE id = ?1");
            let row = conn.query_row(&sql, [id], story_from_row).optional()?;
            Ok(row)
        })
    }

    /// All unexpired stories, newest first. Feed filtering by follow graph
    /// happens at the caller.
    pub fn active_stories(&self, now: i64) -> Result<Vec<StoryRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {STORY_COLUMNS} FROM stories
                 WHERE expires_at > ?1
                 ORDER BY created_at DESC, id DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([now], story_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// A single user's unexpired stories, newest first.
    pub fn active_stories_for_user(&self, owner_id: &str, now: i64) -> Result<Vec<StoryRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {STORY_COLUMNS} FROM stories
                 WHERE owner_id = ?1 AND expires_at > ?2
                 ORDER BY created_at DESC, id DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![owner_id, now], story_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Views --

    /// Record a view and bump the counter in one transaction. Duplicate
    /// views are a silent no-op; returns whether a view was newly recorded.
    /// Owner views must be filtered by the caller before reaching here.
    pub fn record_story_view(&self, story_id: &str, user_id: &str, now: i64) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO story_views (story_id, user_id, viewed_at)
                 VALUES (?1, ?2, ?3)",
                params![story_id, user_id, now],
            )?;
            if inserted > 0 {
                tx.execute(
                    "UPDATE stories SET views_count = views_count + 1 WHERE id = ?1",
                    [story_id],
                )?;
            }
            tx.commit()?;
            Ok(inserted > 0)
        })
    }

    /// Which of `story_ids` the user has viewed. Batch query so feed
    /// assembly is one round-trip instead of one per story.
    pub fn viewed_story_ids(&self, user_id: &str, story_ids: &[String]) -> Result<HashSet<String>> {
        if story_ids.is_empty() {
            return Ok(HashSet::new());
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> =
                (2..=story_ids.len() + 1).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT story_id FROM story_views WHERE user_id = ?1 AND story_id IN ({})",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let mut sql_params: Vec<&dyn rusqlite::types::ToSql> = vec![&user_id];
            sql_params.extend(story_ids.iter().map(|id| id as &dyn rusqlite::types::ToSql));

            let ids = stmt
                .query_map(sql_params.as_slice(), |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<HashSet<_>, _>>()?;
            Ok(ids)
        })
    }

    /// Viewers of a story with profiles, newest first.
    pub fn story_viewers(&self, story_id: &str) -> Result<Vec<StoryViewerRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.username, u.fullname, u.avatar_url, v.viewed_at
                 FROM story_views v
                 JOIN users u ON u.id = v.user_id
                 WHERE v.story_id = ?1
                 ORDER BY v.viewed_at DESC",
            )?;
            let rows = stmt
                .query_map([story_id], |row| {
                    Ok(StoryViewerRow {
                        user_id: row.get(0)?,
                        username: row.get(1)?,
                        fullname: row.get(2)?,
                        avatar_url: row.get(3)?,
                        viewed_at: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Likes --

    /// Toggle a like: removes if present, inserts if not, keeping the
    /// denormalized counter in step within the same transaction. Returns
    /// the new liked state, or None if the story does not exist.
    pub fn toggle_story_like(&self, story_id: &str, user_id: &str, now: i64) -> Result<Option<bool>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let exists: Option<i64> = tx
                .query_row("SELECT 1 FROM stories WHERE id = ?1", [story_id], |row| row.get(0))
                .optional()?;
            if exists.is_none() {
                return Ok(None);
            }

            let existing: Option<i64> = tx
                .query_row(
                    "SELECT 1 FROM story_likes WHERE story_id = ?1 AND user_id = ?2",
                    params![story_id, user_id],
                    |row| row.get(0),
                )
                .optional()?;

            let liked = if existing.is_some() {
                tx.execute(
                    "DELETE FROM story_likes WHERE story_id = ?1 AND user_id = ?2",
                    params![story_id, user_id],
                )?;
                tx.execute(
                    "UPDATE stories SET likes_count = MAX(likes_count - 1, 0) WHERE id = ?1",
                    [story_id],
                )?;
                false
            } else {
                tx.execute(
                    "INSERT INTO story_likes (story_id, user_id, created_at) VALUES (?1, ?2, ?3)",
                    params![story_id, user_id, now],
                )?;
                tx.execute(
                    "UPDATE stories SET likes_count = likes_count + 1 WHERE id = ?1",
                    [story_id],
                )?;
                true
            };

            tx.commit()?;
            Ok(Some(liked))
        })
    }

    pub fn story_like_count(&self, story_id: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM story_likes WHERE story_id = ?1",
                [story_id],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    // -- Teardown --

    /// Remove a story row with its view and like records. Returns whether
    /// the row still existed; deleting an already-removed story is success,
    /// so owner deletes and the expiry sweep can race safely.
    pub fn delete_story_rows(&self, story_id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM story_views WHERE story_id = ?1", [story_id])?;
            tx.execute("DELETE FROM story_likes WHERE story_id = ?1", [story_id])?;
            let removed = tx.execute("DELETE FROM stories WHERE id = ?1", [story_id])?;
            tx.commit()?;
            Ok(removed > 0)
        })
    }

    /// Stories past expiry, pending cleanup: (id, owner_id, media_ref).
    pub fn expired_stories(&self, now: i64) -> Result<Vec<(String, String, String)>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, owner_id, media_ref FROM stories WHERE expires_at <= ?1")?;
            let rows = stmt
                .query_map([now], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn story_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoryRow> {
    Ok(StoryRow {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        media_ref: row.get(2)?,
        media_url: row.get(3)?,
        media_type: row.get(4)?,
        caption: row.get(5)?,
        views_count: row.get(6)?,
        likes_count: row.get(7)?,
        created_at: row.get(8)?,
        expires_at: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use crate::test_util::{add_user, test_db};
    use crate::Database;
    use uuid::Uuid;

    const DAY_MS: i64 = 24 * 60 * 60 * 1000;

    fn add_story(db: &Database, owner: &str, at: i64) -> String {
        let id = Uuid::new_v4().to_string();
        let media_ref = Uuid::new_v4().to_string();
        db.insert_story(
            &id,
            owner,
            &media_ref,
            &format!("/media/{}", media_ref),
            "image",
            None,
            at,
            at + DAY_MS,
        )
        .unwrap();
        id
    }

    #[test]
    fn like_toggle_alternates_and_counter_matches_rows() {
        let db = test_db();
        let alice = add_user(&db, "alice");
        let bob = add_user(&db, "bob");
        let story = add_story(&db, &alice, 0);

        assert_eq!(db.toggle_story_like(&story, &bob, 1_000).unwrap(), Some(true));
        let row = db.get_story(&story).unwrap().unwrap();
        assert_eq!(row.likes_count, 1);
        assert_eq!(db.story_like_count(&story).unwrap(), 1);

        assert_eq!(db.toggle_story_like(&story, &bob, 2_000).unwrap(), Some(false));
        let row = db.get_story(&story).unwrap().unwrap();
        assert_eq!(row.likes_count, 0);
        assert_eq!(db.story_like_count(&story).unwrap(), 0);

        // Distinct users accumulate independently
        assert_eq!(db.toggle_story_like(&story, &alice, 3_000).unwrap(), Some(true));
        assert_eq!(db.toggle_story_like(&story, &bob, 3_500).unwrap(), Some(true));
        assert_eq!(db.get_story(&story).unwrap().unwrap().likes_count, 2);
    }

    #[test]
    fn like_on_missing_story_reports_absence() {
        let db = test_db();
        let bob = add_user(&db, "bob");
        assert_eq!(db.toggle_story_like("no-such-story", &bob, 0).unwrap(), None);
    }

    #[test]
    fn views_count_exactly_once_per_user() {
        let db = test_db();
        let alice = add_user(&db, "alice");
        let bob = add_user(&db, "bob");
        let story = add_story(&db, &alice, 0);

        assert!(db.record_story_view(&story, &bob, 1_000).unwrap());
        assert!(!db.record_story_view(&story, &bob, 2_000).unwrap());
        assert!(!db.record_story_view(&story, &bob, 3_000).unwrap());

        let row = db.get_story(&story).unwrap().unwrap();
        assert_eq!(row.views_count, 1);

        let viewers = db.story_viewers(&story).unwrap();
        assert_eq!(viewers.len(), 1);
        assert_eq!(viewers[0].username, "bob");
        assert_eq!(viewers[0].viewed_at, 1_000);
    }

    #[test]
    fn expiry_boundary_is_exact() {
        let db = test_db();
        let alice = add_user(&db, "alice");
        let created = 1_000_000;
        let story = add_story(&db, &alice, created);
        let expires = created + DAY_MS;

        // One minute before expiry: visible
        let active = db.active_stories(expires - 60_000).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, story);

        // At expiry: gone (expires_at > now is false)
        assert!(db.active_stories(expires).unwrap().is_empty());
        assert!(db.active_stories_for_user(&alice, expires).unwrap().is_empty());

        // ...but still stored, pending cleanup
        assert!(db.get_story(&story).unwrap().is_some());
        let expired = db.expired_stories(expires).unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].0, story);
        assert_eq!(expired[0].1, alice);
    }

    #[test]
    fn teardown_removes_views_and_is_idempotent() {
        let db = test_db();
        let alice = add_user(&db, "alice");
        let bob = add_user(&db, "bob");
        let story = add_story(&db, &alice, 0);

        db.record_story_view(&story, &bob, 1_000).unwrap();
        db.toggle_story_like(&story, &bob, 1_500).unwrap();

        assert!(db.delete_story_rows(&story).unwrap());
        assert!(db.get_story(&story).unwrap().is_none());
        assert!(db.story_viewers(&story).unwrap().is_empty());
        assert_eq!(db.story_like_count(&story).unwrap(), 0);

        // Already gone is success, not failure
        assert!(!db.delete_story_rows(&story).unwrap());
    }

    #[test]
    fn viewed_ids_batch_lookup() {
        let db = test_db();
        let alice = add_user(&db, "alice");
        let bob = add_user(&db, "bob");
        let s1 = add_story(&db, &alice, 1_000);
        let s2 = add_story(&db, &alice, 2_000);

        db.record_story_view(&s1, &bob, 3_000).unwrap();

        let viewed = db
            .viewed_story_ids(&bob, &[s1.clone(), s2.clone()])
            .unwrap();
        assert!(viewed.contains(&s1));
        assert!(!viewed.contains(&s2));

        assert!(db.viewed_story_ids(&bob, &[]).unwrap().is_empty());
    }

    #[test]
    fn active_stories_newest_first() {
        let db = test_db();
        let alice = add_user(&db, "alice");
        let s1 = add_story(&db, &alice, 1_000);
        let s2 = add_story(&db, &alice, 2_000);

        let rows = db.active_stories_for_user(&alice, 3_000).unwrap();
        assert_eq!(rows[0].id, s2);
        assert_eq!(rows[1].id, s1);
    }
}
