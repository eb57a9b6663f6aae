use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id          TEXT PRIMARY KEY,
                username    TEXT NOT NULL UNIQUE,
                fullname    TEXT NOT NULL,
                avatar_url  TEXT,
                password    TEXT NOT NULL,
                created_at  TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE conversations (
                id                  TEXT PRIMARY KEY,
                is_group            INTEGER NOT NULL DEFAULT 0,
                name                TEXT,
                image_url           TEXT,
                -- normalized 'min:max' participant pair; NULL for groups.
                -- The UNIQUE index is the backstop against concurrent
                -- duplicate creation of the same direct pair.
                direct_key          TEXT UNIQUE,
                last_message_id     TEXT,
                last_message_time   INTEGER NOT NULL
            );

            CREATE TABLE conversation_participants (
                conversation_id TEXT NOT NULL REFERENCES conversations(id),
                user_id         TEXT NOT NULL REFERENCES users(id),
                PRIMARY KEY (conversation_id, user_id)
            );

            CREATE TABLE messages (
                id              TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL REFERENCES conversations(id),
                sender_id       TEXT NOT NULL REFERENCES users(id),
                content         TEXT,
                kind            TEXT NOT NULL,
                media_ref       TEXT,
                media_url       TEXT,
                is_deleted      INTEGER NOT NULL DEFAULT 0,
                edited_at       INTEGER,
                created_at      INTEGER NOT NULL
            );

            CREATE INDEX idx_messages_conversation
                ON messages(conversation_id, created_at);

            CREATE TABLE read_receipts (
                message_id  TEXT NOT NULL REFERENCES messages(id),
                user_id     TEXT NOT NULL REFERENCES users(id),
                read_at     INTEGER NOT NULL,
                PRIMARY KEY (message_id, user_id)
            );

            CREATE TABLE typing_indicators (
                conversation_id     TEXT NOT NULL REFERENCES conversations(id),
                user_id             TEXT NOT NULL REFERENCES users(id),
                is_typing           INTEGER NOT NULL,
                last_typing_time    INTEGER NOT NULL,
                PRIMARY KEY (conversation_id, user_id)
            );

            CREATE TABLE stories (
                id          TEXT PRIMARY KEY,
                owner_id    TEXT NOT NULL REFERENCES users(id),
                media_ref   TEXT NOT NULL,
                media_url   TEXT NOT NULL,
                media_type  TEXT NOT NULL,
                caption     TEXT,
                views_count INTEGER NOT NULL DEFAULT 0,
                likes_count INTEGER NOT NULL DEFAULT 0,
                created_at  INTEGER NOT NULL,
                expires_at  INTEGER NOT NULL
            );

            CREATE INDEX idx_stories_owner ON stories(owner_id, created_at);
            CREATE INDEX idx_stories_expiry ON stories(expires_at);

            CREATE TABLE story_views (
                story_id    TEXT NOT NULL REFERENCES stories(id),
                user_id     TEXT NOT NULL REFERENCES users(id),
                viewed_at   INTEGER NOT NULL,
                PRIMARY KEY (story_id, user_id)
            );

            CREATE TABLE story_likes (
                story_id    TEXT NOT NULL REFERENCES stories(id),
                user_id     TEXT NOT NULL REFERENCES users(id),
                created_at  INTEGER NOT NULL,
                PRIMARY KEY (story_id, user_id)
            );

            CREATE TABLE follows (
                follower_id     TEXT NOT NULL REFERENCES users(id),
                following_id    TEXT NOT NULL REFERENCES users(id),
                PRIMARY KEY (follower_id, following_id)
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
