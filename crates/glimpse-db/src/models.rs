//! Database row types — these map directly to SQLite rows.
//! Distinct from the glimpse-types API models to keep the DB layer
//! independent.

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub fullname: String,
    pub avatar_url: Option<String>,
    pub password: String,
    pub created_at: String,
}

/// Credential-free projection used for joins into summaries and lists.
pub struct PublicUserRow {
    pub id: String,
    pub username: String,
    pub fullname: String,
    pub avatar_url: Option<String>,
}

pub struct ConversationRow {
    pub id: String,
    pub is_group: bool,
    pub name: Option<String>,
    pub image_url: Option<String>,
    pub last_message_id: Option<String>,
    pub last_message_time: i64,
}

pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: Option<String>,
    pub kind: String,
    pub media_ref: Option<String>,
    pub media_url: Option<String>,
    pub is_deleted: bool,
    pub created_at: i64,
}

/// Message enriched with sender profile and the viewer's read state,
/// as returned by the conversation timeline query.
pub struct MessageListRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub sender_username: String,
    pub sender_fullname: String,
    pub sender_avatar_url: Option<String>,
    pub content: Option<String>,
    pub kind: String,
    pub media_url: Option<String>,
    pub created_at: i64,
    pub is_read: bool,
}

pub struct StoryRow {
    pub id: String,
    pub owner_id: String,
    pub media_ref: String,
    pub media_url: String,
    pub media_type: String,
    pub caption: Option<String>,
    pub views_count: i64,
    pub likes_count: i64,
    pub created_at: i64,
    pub expires_at: i64,
}

pub struct StoryViewerRow {
    pub user_id: String,
    pub username: String,
    pub fullname: String,
    pub avatar_url: Option<String>,
    pub viewed_at: i64,
}
