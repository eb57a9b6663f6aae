use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{MessageKind, StoryMediaType, UserPublic};

// -- JWT Claims --

/// JWT claims shared across glimpse-api (REST middleware) and glimpse-gateway
/// (WebSocket authentication). Canonical definition lives here in
/// glimpse-types to eliminate duplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub fullname: String,
    pub password: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub username: String,
    pub token: String,
}

// -- Conversations --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateConversationRequest {
    pub other_user_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct CreateConversationResponse {
    pub conversation_id: Uuid,
    pub created: bool,
}

#[derive(Debug, Serialize)]
pub struct ConversationSummary {
    pub id: Uuid,
    pub is_group: bool,
    pub name: Option<String>,
    pub image_url: Option<String>,
    pub participants: Vec<UserPublic>,
    pub last_message: Option<MessageView>,
    pub last_message_time: DateTime<Utc>,
    pub unread_count: u64,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub content: Option<String>,
    pub kind: MessageKind,
    pub media_ref: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageView {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender: UserPublic,
    pub content: Option<String>,
    pub kind: MessageKind,
    pub media_url: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Whether the requesting user has a read receipt for this message.
    pub is_read: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MarkReadRequest {
    pub message_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct UnreadCountResponse {
    pub unread_count: u64,
}

// -- Typing --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetTypingRequest {
    pub is_typing: bool,
}

// -- Stories --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateStoryRequest {
    pub media_ref: Uuid,
    pub media_type: StoryMediaType,
    pub caption: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoryView {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub media_url: String,
    pub media_type: StoryMediaType,
    pub caption: Option<String>,
    pub views_count: u64,
    pub likes_count: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct StoryGroup {
    pub user: UserPublic,
    pub stories: Vec<StoryView>,
    pub has_unseen: bool,
    pub is_own: bool,
}

#[derive(Debug, Serialize)]
pub struct ToggleLikeResponse {
    pub liked: bool,
}

#[derive(Debug, Serialize)]
pub struct StoryViewerEntry {
    pub user: UserPublic,
    pub viewed_at: DateTime<Utc>,
}

// -- Media --

#[derive(Debug, Serialize)]
pub struct CreateUploadResponse {
    pub media_ref: Uuid,
    pub upload_url: String,
}

// -- Users --

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
}
