use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

use glimpse_db::now_ms;
use glimpse_types::api::{Claims, MarkReadRequest, SendMessageRequest, UnreadCountResponse};
use glimpse_types::events::GatewayEvent;
use glimpse_types::models::MessageKind;

use crate::auth::{AppState, resolve_user};
use crate::convert::{message_view, parse_uuid};
use crate::error::{ApiError, ApiResult};
use crate::run_blocking;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    50
}

fn validate_payload(req: &SendMessageRequest) -> Result<(), ApiError> {
    match req.kind {
        MessageKind::Text => {
            if req.content.as_deref().map_or(true, |c| c.trim().is_empty()) {
                return Err(ApiError::InvalidArgument(
                    "text messages require content".into(),
                ));
            }
        }
        _ => {
            if req.media_ref.is_none() {
                return Err(ApiError::InvalidArgument(format!(
                    "{} messages require a media reference",
                    req.kind.as_str()
                )));
            }
        }
    }
    Ok(())
}

pub async fn send(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    validate_payload(&req)?;

    // Gate on conversation membership before touching storage
    let gate_state = state.clone();
    let gate_claims = claims.clone();
    let caller = run_blocking(move || {
        let caller = resolve_user(&gate_state.db, &gate_claims)?;
        let cid = conversation_id.to_string();
        gate_state
            .db
            .get_conversation(&cid)?
            .ok_or(ApiError::NotFound("conversation"))?;
        if !gate_state.db.is_participant(&cid, &caller.id)? {
            return Err(ApiError::Forbidden("not a participant of this conversation"));
        }
        Ok(caller)
    })
    .await?;

    // Media refs must resolve to a display URL before the message exists
    let media_url = match req.media_ref {
        Some(media_ref) => Some(
            state
                .media
                .resolve_url(media_ref)
                .await
                .ok_or(ApiError::MediaNotFound)?,
        ),
        None => None,
    };

    let message_id = Uuid::new_v4();
    let now = now_ms();

    let insert_state = state.clone();
    let sender_id = caller.id.clone();
    let content = req.content.clone();
    let media_url_db = media_url.clone();
    run_blocking(move || {
        insert_state.db.insert_message(
            &message_id.to_string(),
            &conversation_id.to_string(),
            &sender_id,
            content.as_deref(),
            req.kind.as_str(),
            req.media_ref.map(|r| r.to_string()).as_deref(),
            media_url_db.as_deref(),
            now,
        )?;
        Ok(())
    })
    .await?;

    let timestamp = crate::convert::ms_to_datetime(now);

    state.dispatcher.broadcast(GatewayEvent::MessageCreate {
        id: message_id,
        conversation_id,
        sender_id: claims.sub,
        sender_username: claims.username.clone(),
        kind: req.kind,
        content: req.content,
        media_url,
        timestamp,
    });

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "message_id": message_id })),
    ))
}

/// Messages in chronological order, soft-deleted rows excluded, enriched
/// with sender profiles and the caller's read state.
pub async fn list(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let limit = query.limit.min(200);

    let messages = run_blocking(move || {
        let caller = resolve_user(&state.db, &claims)?;
        let cid = conversation_id.to_string();

        state
            .db
            .get_conversation(&cid)?
            .ok_or(ApiError::NotFound("conversation"))?;
        if !state.db.is_participant(&cid, &caller.id)? {
            return Err(ApiError::Forbidden("not a participant of this conversation"));
        }

        let mut rows = state.db.list_messages(&cid, &caller.id, limit)?;
        rows.reverse(); // newest-first from the DB; clients want chronological
        Ok(rows.into_iter().map(message_view).collect::<Vec<_>>())
    })
    .await?;

    Ok(Json(messages))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<MarkReadRequest>,
) -> ApiResult<impl IntoResponse> {
    let mark_state = state.clone();
    let mark_claims = claims.clone();
    let newly_marked = run_blocking(move || {
        let caller = resolve_user(&mark_state.db, &mark_claims)?;
        let cid = conversation_id.to_string();

        mark_state
            .db
            .get_conversation(&cid)?
            .ok_or(ApiError::NotFound("conversation"))?;
        if !mark_state.db.is_participant(&cid, &caller.id)? {
            return Err(ApiError::Forbidden("not a participant of this conversation"));
        }

        let ids: Vec<String> = req.message_ids.iter().map(|id| id.to_string()).collect();
        let marked = mark_state.db.mark_read(&cid, &caller.id, &ids, now_ms())?;
        Ok(marked)
    })
    .await?;

    if !newly_marked.is_empty() {
        state.dispatcher.broadcast(GatewayEvent::MessagesRead {
            conversation_id,
            user_id: claims.sub,
            message_ids: newly_marked
                .iter()
                .map(|id| parse_uuid(id, "message"))
                .collect(),
        });
    }

    Ok(StatusCode::NO_CONTENT)
}

pub async fn unread_count(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let count = run_blocking(move || {
        let caller = resolve_user(&state.db, &claims)?;
        let cid = conversation_id.to_string();

        state
            .db
            .get_conversation(&cid)?
            .ok_or(ApiError::NotFound("conversation"))?;
        if !state.db.is_participant(&cid, &caller.id)? {
            return Err(ApiError::Forbidden("not a participant of this conversation"));
        }

        Ok(state.db.unread_count(&cid, &caller.id)?)
    })
    .await?;

    Ok(Json(UnreadCountResponse {
        unread_count: count,
    }))
}

/// Soft-delete: sender only, permanent, hides the message immediately and
/// releases any media it carried.
pub async fn delete(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let del_state = state.clone();
    let del_claims = claims.clone();
    let (conversation_id, media_ref) = run_blocking(move || {
        let caller = resolve_user(&del_state.db, &del_claims)?;

        let message = del_state
            .db
            .get_message(&message_id.to_string())?
            .ok_or(ApiError::NotFound("message"))?;

        // Only the sender can delete their own message
        if message.sender_id != caller.id {
            return Err(ApiError::Forbidden("only the sender can delete a message"));
        }

        del_state.db.soft_delete_message(&message.id)?;
        Ok((message.conversation_id, message.media_ref))
    })
    .await?;

    if let Some(media_ref) = media_ref.and_then(|r| r.parse::<Uuid>().ok()) {
        if let Err(e) = state.media.release(media_ref).await {
            tracing::warn!("Failed to release media {}: {}", media_ref, e);
        }
    }

    state.dispatcher.broadcast(GatewayEvent::MessageDelete {
        conversation_id: parse_uuid(&conversation_id, "conversation"),
        message_id,
    });

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::validate_payload;
    use glimpse_types::api::SendMessageRequest;
    use glimpse_types::models::MessageKind;
    use uuid::Uuid;

    fn req(kind: MessageKind, content: Option<&str>, media: bool) -> SendMessageRequest {
        SendMessageRequest {
            content: content.map(str::to_string),
            kind,
            media_ref: media.then(Uuid::new_v4),
        }
    }

    #[test]
    fn text_requires_content() {
        assert!(validate_payload(&req(MessageKind::Text, Some("hi"), false)).is_ok());
        assert!(validate_payload(&req(MessageKind::Text, None, false)).is_err());
        assert!(validate_payload(&req(MessageKind::Text, Some("   "), false)).is_err());
        // media_ref alone does not satisfy a text message
        assert!(validate_payload(&req(MessageKind::Text, None, true)).is_err());
    }

    #[test]
    fn media_kinds_require_a_reference() {
        for kind in [MessageKind::Image, MessageKind::Video, MessageKind::Audio] {
            assert!(validate_payload(&req(kind, None, true)).is_ok());
            assert!(validate_payload(&req(kind, None, false)).is_err());
            // an optional caption alongside media is fine
            assert!(validate_payload(&req(kind, Some("caption"), true)).is_ok());
        }
    }
}
