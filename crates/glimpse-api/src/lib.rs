pub mod auth;
pub mod conversations;
pub mod error;
pub mod media;
pub mod messages;
pub mod middleware;
pub mod stories;
pub mod typing;
pub mod users;

pub(crate) mod convert;

use error::{ApiError, ApiResult};
use tracing::error;

/// Run a blocking DB closure off the async runtime.
pub(crate) async fn run_blocking<T, F>(f: F) -> ApiResult<T>
where
    F: FnOnce() -> ApiResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::Internal(anyhow::anyhow!("blocked task failed: {}", e))
    })?
}
