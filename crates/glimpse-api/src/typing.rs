use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use glimpse_db::now_ms;
use glimpse_types::api::{Claims, SetTypingRequest};
use glimpse_types::events::GatewayEvent;

use crate::auth::{AppState, resolve_user};
use crate::convert::user_public;
use crate::error::{ApiError, ApiResult};
use crate::run_blocking;

/// Indicators older than this are treated as not-typing without an explicit
/// stop signal, so a client that crashes mid-type goes quiet on its own.
/// Clients debounce and send their own stop; this is only the safety net.
pub const TYPING_WINDOW_MS: i64 = 5_000;

pub async fn set_typing(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SetTypingRequest>,
) -> ApiResult<impl IntoResponse> {
    let set_state = state.clone();
    let set_claims = claims.clone();
    run_blocking(move || {
        let caller = resolve_user(&set_state.db, &set_claims)?;
        let cid = conversation_id.to_string();

        set_state
            .db
            .get_conversation(&cid)?
            .ok_or(ApiError::NotFound("conversation"))?;
        if !set_state.db.is_participant(&cid, &caller.id)? {
            return Err(ApiError::Forbidden("not a participant of this conversation"));
        }

        set_state
            .db
            .upsert_typing(&cid, &caller.id, req.is_typing, now_ms())?;
        Ok(())
    })
    .await?;

    state.dispatcher.broadcast(GatewayEvent::TypingUpdate {
        conversation_id,
        user_id: claims.sub,
        username: claims.username.clone(),
        is_typing: req.is_typing,
    });

    Ok(StatusCode::NO_CONTENT)
}

/// Participants other than the caller currently typing, per the staleness
/// window.
pub async fn list_typing(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let users = run_blocking(move || {
        let caller = resolve_user(&state.db, &claims)?;
        let cid = conversation_id.to_string();

        state
            .db
            .get_conversation(&cid)?
            .ok_or(ApiError::NotFound("conversation"))?;
        if !state.db.is_participant(&cid, &caller.id)? {
            return Err(ApiError::Forbidden("not a participant of this conversation"));
        }

        let cutoff = now_ms() - TYPING_WINDOW_MS;
        let rows = state.db.typing_users(&cid, &caller.id, cutoff)?;
        Ok(rows.into_iter().map(user_public).collect::<Vec<_>>())
    })
    .await?;

    Ok(Json(users))
}
