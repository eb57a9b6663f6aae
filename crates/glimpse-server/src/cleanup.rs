use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use glimpse_api::auth::AppStateInner;
use glimpse_api::stories;

/// Background task that sweeps expired stories.
///
/// Runs on an interval; each tick removes every story past its `expires_at`
/// with the same teardown as an owner delete. The sweep tolerates races with
/// owner deletes, so errors here are logged, never fatal.
pub async fn run_cleanup_loop(state: Arc<AppStateInner>, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        interval.tick().await;

        if let Err(e) = stories::cleanup_expired(&state).await {
            warn!("Story cleanup error: {}", e);
        }
    }
}
