use axum::{
    Extension, Json,
    body::Body,
    extract::{Path, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use bytes::Bytes;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use glimpse_types::api::{Claims, CreateUploadResponse};

use crate::auth::{AppState, resolve_user};
use crate::error::{ApiError, ApiResult};
use crate::run_blocking;

/// Mint an upload target. The client PUTs raw bytes to the returned URL and
/// then references `media_ref` from a message or story.
pub async fn create_upload(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let gate_state = state.clone();
    run_blocking(move || {
        resolve_user(&gate_state.db, &claims)?;
        Ok(())
    })
    .await?;

    let media_ref = state.media.create_upload().await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateUploadResponse {
            media_ref,
            upload_url: state.media.display_url(media_ref),
        }),
    ))
}

pub async fn upload(
    State(state): State<AppState>,
    Path(media_ref): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let gate_state = state.clone();
    run_blocking(move || {
        resolve_user(&gate_state.db, &claims)?;
        Ok(())
    })
    .await?;

    if body.is_empty() {
        return Err(ApiError::InvalidArgument("empty upload".into()));
    }

    if !state.media.store(media_ref, &body).await? {
        return Err(ApiError::NotFound("upload target"));
    }

    Ok(StatusCode::NO_CONTENT)
}

/// Stream a stored blob back to the client.
pub async fn serve(
    State(state): State<AppState>,
    Path(media_ref): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let file = state
        .media
        .open(media_ref)
        .await?
        .ok_or(ApiError::NotFound("media"))?;

    let stream = ReaderStream::new(file);
    let body = Body::from_stream(stream);

    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        body,
    ))
}
