use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};

use glimpse_db::now_ms;
use glimpse_types::api::{
    Claims, ConversationSummary, CreateConversationRequest, CreateConversationResponse,
};

use crate::auth::{AppState, resolve_user};
use crate::convert::{message_view, ms_to_datetime, parse_uuid, user_public};
use crate::error::{ApiError, ApiResult};
use crate::run_blocking;

/// Find or create the direct conversation with another user. Idempotent:
/// both call orders and concurrent duplicates converge on one conversation.
pub async fn create_or_get(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateConversationRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.other_user_id == claims.sub {
        return Err(ApiError::InvalidArgument(
            "cannot start a conversation with yourself".into(),
        ));
    }

    let response = run_blocking(move || {
        let caller = resolve_user(&state.db, &claims)?;

        let other = state
            .db
            .get_user_by_id(&req.other_user_id.to_string())?
            .ok_or(ApiError::NotFound("user"))?;

        let (conversation_id, created) =
            state.db.create_or_get_direct(&caller.id, &other.id, now_ms())?;

        Ok(CreateConversationResponse {
            conversation_id: parse_uuid(&conversation_id, "conversation"),
            created,
        })
    })
    .await?;

    let status = if response.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(response)))
}

/// All conversations for the caller, most recent activity first, each with
/// the other participants' profiles, the last visible message, and the
/// caller's unread count.
pub async fn list(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let summaries = run_blocking(move || {
        let caller = resolve_user(&state.db, &claims)?;

        let conversations = state.db.conversations_for_user(&caller.id)?;
        let mut summaries = Vec::with_capacity(conversations.len());

        for conv in conversations {
            let participants = state
                .db
                .other_participants(&conv.id, &caller.id)?
                .into_iter()
                .map(user_public)
                .collect();

            let last_message = state
                .db
                .last_visible_message(&conv.id, &caller.id)?
                .map(message_view);

            let unread_count = state.db.unread_count(&conv.id, &caller.id)?;

            summaries.push(ConversationSummary {
                id: parse_uuid(&conv.id, "conversation"),
                is_group: conv.is_group,
                name: conv.name,
                image_url: conv.image_url,
                participants,
                last_message,
                last_message_time: ms_to_datetime(conv.last_message_time),
                unread_count,
            });
        }

        Ok(summaries)
    })
    .await?;

    Ok(Json(summaries))
}
