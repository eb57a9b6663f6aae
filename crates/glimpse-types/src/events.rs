use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::MessageKind;

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid, username: String },

    /// A user came online or went offline
    PresenceUpdate {
        user_id: Uuid,
        username: String,
        online: bool,
    },

    /// A new message was posted to a conversation
    MessageCreate {
        id: Uuid,
        conversation_id: Uuid,
        sender_id: Uuid,
        sender_username: String,
        kind: MessageKind,
        content: Option<String>,
        media_url: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// A message was soft-deleted by its sender
    MessageDelete {
        conversation_id: Uuid,
        message_id: Uuid,
    },

    /// A participant read one or more messages
    MessagesRead {
        conversation_id: Uuid,
        user_id: Uuid,
        message_ids: Vec<Uuid>,
    },

    /// A participant's typing state changed
    TypingUpdate {
        conversation_id: Uuid,
        user_id: Uuid,
        username: String,
        is_typing: bool,
    },

    /// A new story went live
    StoryCreate {
        story_id: Uuid,
        owner_id: Uuid,
        username: String,
    },

    /// A story was removed by its owner or the expiry sweep
    StoryDelete { story_id: Uuid, owner_id: Uuid },

    /// A story like was toggled
    StoryLike {
        story_id: Uuid,
        user_id: Uuid,
        liked: bool,
    },
}

impl GatewayEvent {
    /// Returns the conversation_id if this event is scoped to a specific
    /// conversation. Events that return `None` are global and should be
    /// delivered to all clients.
    pub fn conversation_id(&self) -> Option<Uuid> {
        match self {
            Self::MessageCreate { conversation_id, .. } => Some(*conversation_id),
            Self::MessageDelete { conversation_id, .. } => Some(*conversation_id),
            Self::MessagesRead { conversation_id, .. } => Some(*conversation_id),
            Self::TypingUpdate { conversation_id, .. } => Some(*conversation_id),
            // Ready, PresenceUpdate and story events are global
            _ => None,
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Subscribe to events for specific conversations.
    /// The server will only forward conversation-scoped events (messages,
    /// receipts, typing) for conversations the client has subscribed to.
    Subscribe { conversation_ids: Vec<Uuid> },
}
