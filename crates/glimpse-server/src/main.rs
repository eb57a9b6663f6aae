mod cleanup;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{DefaultBodyLimit, State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{delete, get, post, put},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use glimpse_api::auth::{self, AppState, AppStateInner};
use glimpse_api::middleware::require_auth;
use glimpse_api::{conversations, media, messages, stories, typing, users};
use glimpse_gateway::connection;
use glimpse_gateway::dispatcher::Dispatcher;

/// Uploads above this are rejected at the body layer.
const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "glimpse=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("GLIMPSE_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("GLIMPSE_DB_PATH").unwrap_or_else(|_| "glimpse.db".into());
    let media_dir = std::env::var("GLIMPSE_MEDIA_DIR").unwrap_or_else(|_| "media".into());
    let host = std::env::var("GLIMPSE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("GLIMPSE_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let cleanup_interval_secs: u64 = std::env::var("GLIMPSE_CLEANUP_INTERVAL_SECS")
        .unwrap_or_else(|_| "300".into())
        .parse()?;

    // Init storage
    let db = glimpse_db::Database::open(&PathBuf::from(&db_path))?;
    let media_store = glimpse_media::MediaStore::new(PathBuf::from(&media_dir)).await?;

    // Shared state
    let dispatcher = Dispatcher::new();
    let app_state: AppState = Arc::new(AppStateInner {
        db,
        media: media_store,
        dispatcher: dispatcher.clone(),
        jwt_secret: jwt_secret.clone(),
    });

    // Story expiry sweep (the scheduler collaborator)
    tokio::spawn(cleanup::run_cleanup_loop(
        app_state.clone(),
        cleanup_interval_secs,
    ));

    // Routes
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(app_state.clone());

    let protected_routes = Router::new()
        .route(
            "/conversations",
            post(conversations::create_or_get).get(conversations::list),
        )
        .route(
            "/conversations/{conversation_id}/messages",
            get(messages::list).post(messages::send),
        )
        .route(
            "/conversations/{conversation_id}/read",
            post(messages::mark_read),
        )
        .route(
            "/conversations/{conversation_id}/unread",
            get(messages::unread_count),
        )
        .route(
            "/conversations/{conversation_id}/typing",
            put(typing::set_typing).get(typing::list_typing),
        )
        .route("/messages/{message_id}", delete(messages::delete))
        .route("/stories", post(stories::create))
        .route("/stories/feed", get(stories::feed))
        .route("/stories/{story_id}/view", post(stories::record_view))
        .route("/stories/{story_id}/like", post(stories::toggle_like))
        .route("/stories/{story_id}/viewers", get(stories::viewers))
        .route("/stories/{story_id}", delete(stories::delete))
        .route("/users/me", get(users::me))
        .route("/users/search", get(users::search))
        .route("/users/{user_id}/stories", get(stories::user_stories))
        .route(
            "/users/{user_id}/follow",
            post(users::follow).delete(users::unfollow),
        )
        .route("/media", post(media::create_upload))
        .route(
            "/media/{media_ref}",
            put(media::upload).get(media::serve),
        )
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(middleware::from_fn(require_auth))
        .with_state(app_state.clone());

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(app_state);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Glimpse server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let dispatcher = state.dispatcher.clone();
    let jwt_secret = state.jwt_secret.clone();
    ws.on_upgrade(move |socket| connection::handle_connection(socket, dispatcher, jwt_secret))
}
