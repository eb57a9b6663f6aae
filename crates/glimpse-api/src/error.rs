use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

/// Error taxonomy surfaced to clients. Everything maps to a status code and
/// a JSON body; nothing is retried server-side.
#[derive(Debug, Error)]
pub enum ApiError {
    /// No verified caller; re-authentication required.
    #[error("not authenticated")]
    Unauthenticated,

    /// Caller resolved but lacks permission (not a participant, not an owner).
    #[error("forbidden: {0}")]
    Forbidden(&'static str),

    /// Referenced record does not exist or was already removed.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Malformed input; not retryable without client-side correction.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A storage reference did not resolve to a display URL. Distinct from
    /// NotFound: it implies an upload/storage inconsistency, not a missing
    /// record.
    #[error("media reference did not resolve")]
    MediaNotFound,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::Unauthenticated => (StatusCode::UNAUTHORIZED, self.to_string()),
            Self::Forbidden(_) => (StatusCode::FORBIDDEN, self.to_string()),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            Self::InvalidArgument(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            Self::MediaNotFound => (StatusCode::UNPROCESSABLE_ENTITY, self.to_string()),
            Self::Internal(e) => {
                error!("internal error: {:#}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string())
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_the_taxonomy() {
        assert_eq!(
            ApiError::Unauthenticated.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::Forbidden("not a participant").into_response().status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::NotFound("conversation").into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::InvalidArgument("bad".into()).into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::MediaNotFound.into_response().status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn internal_errors_do_not_leak_details() {
        let resp = ApiError::Internal(anyhow::anyhow!("db path /secret exploded")).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
