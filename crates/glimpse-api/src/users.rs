use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use glimpse_types::api::{Claims, SearchQuery};
use glimpse_types::models::UserPublic;

use crate::auth::{AppState, resolve_user};
use crate::convert::{parse_uuid, user_public};
use crate::error::{ApiError, ApiResult};
use crate::run_blocking;

pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let user = run_blocking(move || {
        let caller = resolve_user(&state.db, &claims)?;
        Ok(UserPublic {
            id: parse_uuid(&caller.id, "user"),
            username: caller.username,
            fullname: caller.fullname,
            avatar_url: caller.avatar_url,
        })
    })
    .await?;

    Ok(Json(user))
}

/// Directory search for starting conversations. Caller excluded; short
/// terms return nothing rather than everything.
pub async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let users = run_blocking(move || {
        let caller = resolve_user(&state.db, &claims)?;

        if query.q.len() < 2 {
            return Ok(Vec::new());
        }

        let rows = state.db.search_users(&caller.id, &query.q, 20)?;
        Ok(rows.into_iter().map(user_public).collect())
    })
    .await?;

    Ok(Json::<Vec<UserPublic>>(users))
}

pub async fn follow(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    if user_id == claims.sub {
        return Err(ApiError::InvalidArgument("cannot follow yourself".into()));
    }

    run_blocking(move || {
        let caller = resolve_user(&state.db, &claims)?;
        let target = user_id.to_string();

        state
            .db
            .get_public_user(&target)?
            .ok_or(ApiError::NotFound("user"))?;

        // Idempotent: an existing edge is a no-op
        state.db.follow(&caller.id, &target)?;
        Ok(())
    })
    .await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn unfollow(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    run_blocking(move || {
        let caller = resolve_user(&state.db, &claims)?;
        // Removing a missing edge is a no-op, same as re-following
        state.db.unfollow(&caller.id, &user_id.to_string())?;
        Ok(())
    })
    .await?;

    Ok(StatusCode::NO_CONTENT)
}
