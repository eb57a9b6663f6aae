//! Row -> API type conversions shared across handlers.

use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use glimpse_db::models::{MessageListRow, PublicUserRow, StoryRow};
use glimpse_types::api::{MessageView, StoryView};
use glimpse_types::models::{MessageKind, StoryMediaType, UserPublic};

pub(crate) fn parse_uuid(raw: &str, what: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} id '{}': {}", what, raw, e);
        Uuid::default()
    })
}

pub(crate) fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_else(|| {
        warn!("Timestamp {} out of range", ms);
        DateTime::default()
    })
}

pub(crate) fn user_public(row: PublicUserRow) -> UserPublic {
    UserPublic {
        id: parse_uuid(&row.id, "user"),
        username: row.username,
        fullname: row.fullname,
        avatar_url: row.avatar_url,
    }
}

pub(crate) fn message_view(row: MessageListRow) -> MessageView {
    let kind = MessageKind::parse(&row.kind).unwrap_or_else(|| {
        warn!("Corrupt message kind '{}' on message '{}'", row.kind, row.id);
        MessageKind::Text
    });

    MessageView {
        id: parse_uuid(&row.id, "message"),
        conversation_id: parse_uuid(&row.conversation_id, "conversation"),
        sender: UserPublic {
            id: parse_uuid(&row.sender_id, "user"),
            username: row.sender_username,
            fullname: row.sender_fullname,
            avatar_url: row.sender_avatar_url,
        },
        content: row.content,
        kind,
        media_url: row.media_url,
        created_at: ms_to_datetime(row.created_at),
        is_read: row.is_read,
    }
}

pub(crate) fn story_view(row: StoryRow) -> StoryView {
    let media_type = StoryMediaType::parse(&row.media_type).unwrap_or_else(|| {
        warn!("Corrupt media type '{}' on story '{}'", row.media_type, row.id);
        StoryMediaType::Image
    });

    StoryView {
        id: parse_uuid(&row.id, "story"),
        owner_id: parse_uuid(&row.owner_id, "user"),
        media_url: row.media_url,
        media_type,
        caption: row.caption,
        views_count: row.views_count.max(0) as u64,
        likes_count: row.likes_count.max(0) as u64,
        created_at: ms_to_datetime(row.created_at),
        expires_at: ms_to_datetime(row.expires_at),
    }
}
